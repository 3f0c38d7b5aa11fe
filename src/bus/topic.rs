use std::{fmt, marker::PhantomData};

/// Типизированный ключ темы: имя + тип значения на уровне компиляции.
///
/// Позволяет объявить темы один раз и не повторять тип в каждом месте
/// использования:
///
/// ```
/// use livebus::{Topic, TopicRegistry};
///
/// const GREETING: Topic<String> = Topic::new("greeting");
///
/// let registry = TopicRegistry::new();
/// let channel = registry.topic(&GREETING).unwrap();
/// channel.publish("hello".to_string());
/// assert_eq!(channel.value().as_deref(), Some("hello"));
/// ```
pub struct Topic<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Topic<T> {}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
