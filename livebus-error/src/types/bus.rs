use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки шины тем.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Тема уже создана с другим типом значения.
    #[error("topic '{topic}' carries {expected}, requested as {actual}")]
    TypeMismatch {
        topic: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Один и тот же наблюдатель подключён к теме из разных областей жизни.
    #[error("observer {observer} is already attached to '{topic}' under another scope")]
    ObserverScopeConflict { topic: String, observer: u64 },

    /// Отложенная публикация без назначенного main context.
    #[error("topic '{topic}' has no main context for deferred delivery")]
    NoMainContext { topic: String },

    /// Main context остановлен и больше не принимает задачи.
    #[error("main context is shut down")]
    MainContextClosed,

    /// Ошибка загрузки или валидации конфигурации.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Ошибка инициализации логирования.
    #[error("logging initialization failed: {reason}")]
    Logging { reason: String },
}

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TypeMismatch { .. } => StatusCode::TypeMismatch,
            Self::ObserverScopeConflict { .. } => StatusCode::ObserverConflict,
            Self::NoMainContext { .. } => StatusCode::NoMainContext,
            Self::MainContextClosed => StatusCode::MainContextClosed,
            Self::Config { .. } => StatusCode::ConfigInvalid,
            Self::Logging { .. } => StatusCode::LoggingInitFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::TypeMismatch { topic, .. }
            | Self::ObserverScopeConflict { topic, .. }
            | Self::NoMainContext { topic } => {
                tags.push(("topic", topic.clone()));
            }
            _ => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет соответствие вариантов кодам статуса.
    #[test]
    fn test_status_codes() {
        let cases = [
            (
                BusError::TypeMismatch {
                    topic: "t".into(),
                    expected: "a",
                    actual: "b",
                },
                StatusCode::TypeMismatch,
            ),
            (
                BusError::ObserverScopeConflict {
                    topic: "t".into(),
                    observer: 7,
                },
                StatusCode::ObserverConflict,
            ),
            (
                BusError::NoMainContext { topic: "t".into() },
                StatusCode::NoMainContext,
            ),
            (BusError::MainContextClosed, StatusCode::MainContextClosed),
            (
                BusError::Config {
                    reason: "x".into(),
                },
                StatusCode::ConfigInvalid,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code(), code, "{err}");
        }
    }

    /// Тест проверяет, что теги содержат имя темы.
    #[test]
    fn test_metrics_tags_include_topic() {
        let err = BusError::NoMainContext {
            topic: "good".into(),
        };
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "topic" && v == "good"));
    }

    #[test]
    fn test_display() {
        let err = BusError::ObserverScopeConflict {
            topic: "haha".into(),
            observer: 3,
        };
        assert_eq!(
            err.to_string(),
            "observer 3 is already attached to 'haha' under another scope"
        );
    }
}
