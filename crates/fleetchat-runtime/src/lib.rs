//! Fleet Chat plugin runtime.
//!
//! Hosts untrusted plugins in isolated workers and owns their whole
//! lifecycle: loading, execution, resource policing, and teardown. The
//! actual evaluation of plugin code is behind the [`PluginEngine`] seam, so
//! the runtime itself never embeds an interpreter.
//!
//! - **[`manager`]** -- [`PluginManager`], the registry and the single
//!   owner of worker creation and destruction.
//! - **[`loader`]** -- [`PluginLoader`], source resolution, the security
//!   pipeline, and the `init` handshake.
//! - **[`worker`]** -- the per-plugin worker task, its handle, and the
//!   worker state machine.
//! - **[`protocol`]** -- the typed request/response/event messages every
//!   worker interaction crosses.
//! - **[`tracker`]** -- [`ResourceTracker`], memory sampling and the
//!   termination channel.
//! - **[`engine`]** -- the [`PluginEngine`] and [`EngineFactory`] traits
//!   hosts implement.
//!
//! Built for a multi-threaded tokio runtime; every public handle is cheap
//! to clone and safe to share.

pub mod engine;
pub mod error;
pub mod loader;
pub mod manager;
pub mod protocol;
pub mod tracker;
pub mod worker;

#[cfg(test)]
pub(crate) mod fixtures;

pub use engine::{EngineContext, EngineError, EngineFactory, PluginEngine};
pub use error::{Result, RuntimeError};
pub use loader::{ActivatedPlugin, PluginLoader, PluginSource, ResolvedPlugin, discover};
pub use manager::{CommandRef, PluginInfo, PluginManager};
pub use protocol::{
    ExecutionResult, InitPayload, InvokePayload, RequestPayload, WorkerEvent, WorkerRequest,
    WorkerResponse,
};
pub use tracker::{
    PingPolicy, ResourceTracker, Termination, TerminationReason, TrackerConfig,
};
pub use worker::{ConsoleSink, MemoryGauge, WorkerHandle, WorkerState, WorkerStatus};
