//! In-process typed topic bus with lifecycle-scoped observers.
//!
//! A [`TopicRegistry`] maps topic names to [`TopicChannel`]s. A channel keeps
//! the latest value, delivers publishes to attached observers and detaches
//! them automatically when their [`Scope`] ends.

/// Registry, channels, observers, scopes and the deferred-delivery context.
pub mod bus;
/// Bus configuration loading (defaults, file, `LIVEBUS_*` environment).
pub mod config;
/// `tracing-subscriber` initialization.
pub mod logging;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Core bus types.
pub use bus::{
    AttachMode, ChannelStats, ListenerId, MainContext, MainLoop, Observer, ObserverId,
    RegistryMetrics, Scope, ScopeId, ScopeListener, ScopeState, Task, Topic, TopicChannel,
    TopicRegistry,
};
/// Configuration.
pub use config::{BusConfig, DeferredPolicy, LogFormat, LoggingConfig};
/// Errors.
pub use livebus_error::{BusError, BusResult, ErrorExt, StackError, StatusCode};
/// Logging.
pub use logging::init_logging;
