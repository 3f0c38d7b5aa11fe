//! Шина тем (topic bus) с «липкой» доставкой последнего значения.
//!
//! Модуль реализует внутрипроцессную типизированную pub/sub-шину:
//!
//! - `registry`: ключ темы → ровно один канал, создаётся лениво.
//! - `channel`: текущее значение темы, набор наблюдателей, немедленная и
//!   отложенная публикация, подключение fresh/sticky.
//! - `observer`: наблюдатель и его подключение к каналу (версии, отключение).
//! - `scope`: область жизни, по завершении которой наблюдатели отключаются
//!   автоматически.
//! - `main_loop`: контекст, в котором выполняется отложенная доставка.
//! - `topic`: типизированный ключ темы.
//!
//! Публичный API переэкспортирует основные типы всех подмодулей.

pub mod channel;
pub mod main_loop;
pub mod observer;
pub mod registry;
pub mod scope;
pub mod topic;

pub use channel::*;
pub use main_loop::*;
pub use observer::{AttachMode, Observer, ObserverId};
pub use registry::*;
pub use scope::*;
pub use topic::*;
