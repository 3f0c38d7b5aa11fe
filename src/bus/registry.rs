use std::{
    any::{type_name, Any, TypeId},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use livebus_error::BusError;

use super::{channel::TopicChannel, main_loop::MainContext, topic::Topic};
use crate::config::BusConfig;

type TopicKey = Arc<str>;

/// Канал со стёртым типом значения.
struct ErasedChannel {
    type_id: TypeId,
    type_name: &'static str,
    /// Всегда `TopicChannel<T>` с `TypeId::of::<T>() == type_id`.
    channel: Box<dyn Any + Send + Sync>,
}

impl ErasedChannel {
    fn new<T>(channel: TopicChannel<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            channel: Box::new(channel),
        }
    }

    fn typed<T>(
        &self,
        topic: &str,
    ) -> Result<TopicChannel<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        if self.type_id != TypeId::of::<T>() {
            return Err(self.mismatch::<T>(topic));
        }
        self.channel
            .downcast_ref::<TopicChannel<T>>()
            .cloned()
            .ok_or_else(|| self.mismatch::<T>(topic))
    }

    fn mismatch<T>(
        &self,
        topic: &str,
    ) -> BusError {
        BusError::TypeMismatch {
            topic: topic.to_string(),
            expected: self.type_name,
            actual: type_name::<T>(),
        }
    }
}

/// Снимок счётчиков реестра.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryMetrics {
    pub topics: usize,
    pub lookups: u64,
    pub created: u64,
}

/// Реестр тем: имя темы → ровно один канал на всё время жизни реестра.
///
/// Каналы создаются лениво при первом обращении. Поиск идёт без глобальной
/// блокировки; создание сериализуется одной блокировкой с повторной
/// проверкой под ней, поэтому одновременные первые обращения из разных
/// потоков получают один и тот же канал.
///
/// Реестр передаётся потребителям явно (обычно как `Arc<TopicRegistry>`);
/// несколько реестров полностью изолированы друг от друга.
pub struct TopicRegistry {
    channels: DashMap<TopicKey, ErasedChannel>,
    create_lock: Mutex<()>,
    main: Option<Arc<dyn MainContext>>,
    config: BusConfig,
    lookups: AtomicU64,
    created: AtomicU64,
    threshold_warned: AtomicBool,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            channels: DashMap::new(),
            create_lock: Mutex::new(()),
            main: None,
            config,
            lookups: AtomicU64::new(0),
            created: AtomicU64::new(0),
            threshold_warned: AtomicBool::new(false),
        }
    }

    /// Назначает главный контекст для отложенной доставки. Каналы, созданные
    /// после этого, смогут выполнять `publish_deferred`.
    pub fn with_main_context(
        mut self,
        main: Arc<dyn MainContext>,
    ) -> Self {
        self.main = Some(main);
        self
    }

    /// Возвращает канал темы, создавая его при первом обращении.
    ///
    /// # Ошибки
    /// [`BusError::TypeMismatch`], если тема уже создана с другим типом
    /// значения.
    pub fn get_or_create<T>(
        &self,
        key: &str,
    ) -> Result<TopicChannel<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.channels.get(key) {
            return entry.typed(key);
        }

        let _guard = self.create_lock.lock();
        // Повторная проверка: канал мог создать другой поток.
        if let Some(entry) = self.channels.get(key) {
            return entry.typed(key);
        }

        let name: TopicKey = Arc::from(key);
        let channel = TopicChannel::<T>::build(
            Arc::clone(&name),
            self.main.clone(),
            self.config.deferred_policy,
        );
        self.channels
            .insert(name, ErasedChannel::new(channel.clone()));
        self.created.fetch_add(1, Ordering::Relaxed);

        debug!(topic = key, value_type = type_name::<T>(), "Topic channel created");
        self.check_threshold();
        Ok(channel)
    }

    /// Синоним [`get_or_create`](Self::get_or_create).
    pub fn channel<T>(
        &self,
        key: &str,
    ) -> Result<TopicChannel<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.get_or_create(key)
    }

    /// Канал для типизированного ключа [`Topic`].
    pub fn topic<T>(
        &self,
        topic: &Topic<T>,
    ) -> Result<TopicChannel<T>, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.get_or_create(topic.name())
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.channels.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Имена всех созданных тем, отсортированные.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn metrics(&self) -> RegistryMetrics {
        RegistryMetrics {
            topics: self.channels.len(),
            lookups: self.lookups.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn main_context(&self) -> Option<&Arc<dyn MainContext>> {
        self.main.as_ref()
    }

    fn check_threshold(&self) {
        let topics = self.channels.len();
        if topics > self.config.topic_warn_threshold
            && !self.threshold_warned.swap(true, Ordering::Relaxed)
        {
            warn!(
                topics,
                threshold = self.config.topic_warn_threshold,
                "Topic count exceeded threshold; topics are never removed"
            );
        }
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.channels.len())
            .field("has_main_context", &self.main.is_some())
            .field("config", &self.config)
            .finish()
    }
}
