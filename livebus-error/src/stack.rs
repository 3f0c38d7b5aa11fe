use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, StatusCode};

/// Ошибка шины с цепочкой контекстов.
///
/// Корневая ошибка хранится как `Arc<dyn ErrorExt>`, поэтому `StackError`
/// дёшево клонируется. Каждый контекст запоминает место вызова.
#[derive(Clone)]
pub struct StackError {
    root: Arc<dyn ErrorExt>,
    contexts: Vec<ErrorContext>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            root: Arc::new(err),
            contexts: Vec::new(),
        }
    }

    /// Добавляет контекст (снаружи внутрь: последний добавленный идёт первым
    /// в `Display`).
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.contexts.push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.root.status_code()
    }

    pub fn root(&self) -> &dyn ErrorExt {
        self.root.as_ref()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.root.metrics_tags()
    }

    pub fn downcast_ref<E: ErrorExt>(&self) -> Option<&E> {
        self.root.as_any().downcast_ref::<E>()
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let contexts: Vec<String> = self
            .contexts
            .iter()
            .map(|ctx| {
                format!(
                    "{} at {}:{}",
                    ctx.message,
                    ctx.location.file(),
                    ctx.location.line()
                )
            })
            .collect();
        f.debug_struct("StackError")
            .field("status_code", &self.status_code())
            .field("root", &self.root.to_string())
            .field("contexts", &contexts)
            .finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for ctx in self.contexts.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.root)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.root.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BusError;

    fn mismatch() -> BusError {
        BusError::TypeMismatch {
            topic: "haha".to_string(),
            expected: "alloc::string::String",
            actual: "u32",
        }
    }

    /// Тест проверяет порядок контекстов и сохранение кода корневой ошибки.
    #[test]
    fn test_context_chain() {
        let err = StackError::new(mismatch())
            .context("resolving channel")
            .context("screen setup");

        assert_eq!(err.status_code(), StatusCode::TypeMismatch);
        assert_eq!(err.contexts().len(), 2);
        assert_eq!(err.contexts()[0].message, "resolving channel");
        assert!(err.contexts()[0].location.file().ends_with("stack.rs"));
        assert!(err
            .to_string()
            .starts_with("screen setup: resolving channel: topic 'haha'"));
    }

    #[test]
    fn test_downcast() {
        let err = StackError::from(BusError::MainContextClosed);
        assert_eq!(
            err.downcast_ref::<BusError>(),
            Some(&BusError::MainContextClosed)
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
