//! Инициализация логирования на `tracing-subscriber`.
//!
//! Ядро шины только пишет события через `tracing`; подписчика
//! устанавливает приложение, вызывая [`init_logging`] один раз при старте.

mod filters;
mod formatter;

pub use filters::build_filter_from_config;
pub use formatter::{build_formatter_from_config, build_formatter_with_writer};
use livebus_error::{BusError, BusResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Устанавливает глобальный подписчик: `EnvFilter` + fmt-слой.
///
/// Повторный вызов возвращает ошибку [`BusError::Logging`].
pub fn init_logging(config: &LoggingConfig) -> BusResult<()> {
    let env_filter = filters::build_filter_from_config(config);
    let fmt_layer = formatter::build_formatter_from_config(config);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| BusError::Logging {
            reason: e.to_string(),
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.filter_directive(),
        format = ?config.format,
        "Logging system initialized"
    );
    Ok(())
}
