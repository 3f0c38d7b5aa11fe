//! Конфигурация шины и логирования.

pub mod settings;

pub use settings::*;
