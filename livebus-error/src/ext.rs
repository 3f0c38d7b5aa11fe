use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок, которые можно положить в [`StackError`](crate::StackError).
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode;

    /// Нужен для downcast из `StackError` к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Теги для логов и метрик: тип ошибки и код.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().code().to_string()),
        ]
    }

    /// Короткое имя типа ошибки, без пути модуля.
    fn type_name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }
}
