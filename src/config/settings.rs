use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use livebus_error::{ensure, BusError, BusResult, ResultExt};

/// Префикс переменных окружения.
pub const ENV_PREFIX: &str = "LIVEBUS";

/// Политика отложенной публикации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredPolicy {
    /// Каждая отложенная публикация ставится в очередь и доставляется.
    #[default]
    Queue,
    /// Пока задача в очереди, новые значения лишь заменяют ожидающее;
    /// доставляется последнее.
    Coalesce,
}

/// Формат вывода логов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень (`info`) или полная директива EnvFilter (`livebus=trace,info`).
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// Директива фильтра, собранная из конфигурации.
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            "info".to_string()
        } else {
            level.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub deferred_policy: DeferredPolicy,
    /// После превышения этого числа тем реестр один раз пишет предупреждение.
    pub topic_warn_threshold: usize,
    pub logging: LoggingConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            deferred_policy: DeferredPolicy::Queue,
            topic_warn_threshold: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl BusConfig {
    /// Значения по умолчанию + переменные окружения `LIVEBUS_*`.
    ///
    /// Вложенные ключи разделяются `__`: `LIVEBUS_LOGGING__LEVEL=debug`.
    pub fn load() -> BusResult<Self> {
        Self::build(None)
    }

    /// Файл конфигурации (формат по расширению) + переменные окружения.
    pub fn load_from(path: impl AsRef<Path>) -> BusResult<Self> {
        let path = path.as_ref();
        Self::build(Some(path))
            .with_context(|| format!("loading configuration from {}", path.display()))
    }

    fn build(path: Option<&Path>) -> BusResult<Self> {
        let mut builder = Config::builder()
            // Значения по умолчанию
            .set_default("deferred_policy", "queue")
            .and_then(|b| b.set_default("topic_warn_threshold", 256_i64))
            .and_then(|b| b.set_default("logging.level", "info"))
            .and_then(|b| b.set_default("logging.format", "compact"))
            .and_then(|b| b.set_default("logging.with_ansi", true))
            .and_then(|b| b.set_default("logging.with_target", true))
            .and_then(|b| b.set_default("logging.with_thread_ids", false))
            .map_err(config_error)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: BusConfig = builder
            // Переменные окружения с префиксом LIVEBUS_
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(config_error)
            .context("building bus configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BusResult<()> {
        ensure!(
            self.topic_warn_threshold > 0,
            BusError::Config {
                reason: "topic_warn_threshold must be positive".to_string(),
            }
        );
        Ok(())
    }
}

fn config_error(err: ConfigError) -> BusError {
    BusError::Config {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use livebus_error::StatusCode;
    use serial_test::serial;

    use super::*;

    const ENV_KEYS: [&str; 3] = [
        "LIVEBUS_DEFERRED_POLICY",
        "LIVEBUS_TOPIC_WARN_THRESHOLD",
        "LIVEBUS_LOGGING__LEVEL",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    /// Тест проверяет, что без окружения загружаются значения по умолчанию.
    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let cfg = BusConfig::load().unwrap();
        assert_eq!(cfg, BusConfig::default());
    }

    /// Тест проверяет переопределение через переменные окружения,
    /// включая вложенные ключи.
    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("LIVEBUS_DEFERRED_POLICY", "coalesce");
        env::set_var("LIVEBUS_TOPIC_WARN_THRESHOLD", "8");
        env::set_var("LIVEBUS_LOGGING__LEVEL", "debug");

        let cfg = BusConfig::load();
        clear_env();
        let cfg = cfg.unwrap();

        assert_eq!(cfg.deferred_policy, DeferredPolicy::Coalesce);
        assert_eq!(cfg.topic_warn_threshold, 8);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Compact);
    }

    /// Тест проверяет, что нулевой порог отклоняется валидацией.
    #[test]
    #[serial]
    fn test_zero_threshold_rejected() {
        clear_env();
        env::set_var("LIVEBUS_TOPIC_WARN_THRESHOLD", "0");
        let result = BusConfig::load();
        clear_env();

        let err = result.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
    }

    /// Тест проверяет загрузку из TOML-файла.
    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "deferred_policy = \"coalesce\"\n[logging]\nformat = \"json\"\nwith_ansi = false"
        )
        .unwrap();

        let cfg = BusConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.deferred_policy, DeferredPolicy::Coalesce);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(!cfg.logging.with_ansi);
        assert_eq!(cfg.topic_warn_threshold, 256);
    }

    /// Тест проверяет, что отсутствующий файл даёт ошибку с контекстом.
    #[test]
    #[serial]
    fn test_missing_file_has_context() {
        clear_env();
        let err = BusConfig::load_from("/definitely/missing/livebus.toml").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
        assert!(err
            .contexts()
            .iter()
            .any(|c| c.message.contains("loading configuration")));
    }

    #[test]
    fn test_filter_directive() {
        let mut cfg = LoggingConfig::default();
        assert_eq!(cfg.filter_directive(), "info");
        cfg.level = "  ".into();
        assert_eq!(cfg.filter_directive(), "info");
        cfg.level = "livebus=trace,warn".into();
        assert_eq!(cfg.filter_directive(), "livebus=trace,warn");
    }
}
