use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Директива по умолчанию, если конфигурация содержит некорректную.
const FALLBACK_DIRECTIVE: &str = "info";

/// Собирает `EnvFilter`: `RUST_LOG` имеет приоритет над конфигурацией.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    let directive = config.filter_directive();
    match EnvFilter::try_new(&directive) {
        Ok(filter) => filter,
        Err(e) => {
            // Подписчик ещё не установлен, поэтому пишем напрямую в stderr.
            eprintln!(
                "Invalid log filter directive from config ('{directive}'): {e}; falling back to '{FALLBACK_DIRECTIVE}'"
            );
            EnvFilter::new(FALLBACK_DIRECTIVE)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::Layer;

    use super::*;

    fn config_with(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            ..LoggingConfig::default()
        }
    }

    /// Тест проверяет, что без RUST_LOG используется уровень из конфигурации.
    #[test]
    #[serial]
    fn test_filter_from_config() {
        env::remove_var("RUST_LOG");
        let filter = build_filter_from_config(&config_with("warn"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    /// Тест проверяет, что RUST_LOG переопределяет конфигурацию.
    #[test]
    #[serial]
    fn test_env_overrides_config() {
        env::set_var("RUST_LOG", "trace");
        let filter = build_filter_from_config(&config_with("warn"));
        env::remove_var("RUST_LOG");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    /// Тест проверяет откат на `info` при некорректной директиве.
    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        assert!(EnvFilter::try_new("livebus=notalevel").is_err());

        let filter = build_filter_from_config(&config_with("livebus=notalevel"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
