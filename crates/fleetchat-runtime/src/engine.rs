//! The execution engine seam.
//!
//! A [`PluginEngine`] is the unit that actually evaluates wrapped plugin
//! code inside a worker. The runtime is engine-agnostic: whatever isolation
//! primitive the host embeds (a JS engine, a subprocess, a test fixture)
//! plugs in here, and the worker drives it through the message protocol.
//! Engines are created per spawn by an injected [`EngineFactory`] — explicit
//! dependency injection, never a process-wide lookup.

use std::sync::Arc;

use async_trait::async_trait;

use fleetchat_manifest::PluginManifest;
use fleetchat_sandbox::{CapabilitySurface, WrappedProgram};

use crate::worker::ConsoleSink;

/// Everything an engine receives at the `init` handshake.
pub struct EngineContext {
    pub plugin_id: String,
    pub manifest: Arc<PluginManifest>,
    /// The wrapped executable unit (prologue + plugin body).
    pub program: WrappedProgram,
    /// The bound capability surface; the only path out of the sandbox.
    pub surface: CapabilitySurface,
    /// Sink for unsolicited console records, multiplexed onto the worker
    /// channel.
    pub console: ConsoleSink,
}

/// Failure modes of an engine call.
///
/// `Command` failures are handled errors: they become a failed response and
/// the worker stays usable. `Fatal` failures tear the worker down.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    Command {
        message: String,
        stack: Option<String>,
    },

    #[error("fatal: {message}")]
    Fatal {
        message: String,
        stack: Option<String>,
    },
}

impl EngineError {
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            stack: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            stack: None,
        }
    }
}

/// One plugin execution unit, owned by exactly one worker task.
#[async_trait]
pub trait PluginEngine: Send {
    /// Evaluate the wrapped program and prepare command dispatch.
    async fn initialize(&mut self, ctx: EngineContext) -> Result<(), EngineError>;

    /// Run a no-view command to completion.
    async fn invoke(
        &mut self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError>;

    /// Run a view command, returning its render payload. Defaults to the
    /// same dispatch as [`invoke`](PluginEngine::invoke).
    async fn render(
        &mut self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        self.invoke(command, args).await
    }

    /// Replace the engine-side state snapshot.
    async fn set_state(&mut self, state: serde_json::Value) -> Result<(), EngineError>;

    /// Read the engine-side state snapshot.
    async fn get_state(&self) -> Result<serde_json::Value, EngineError>;

    /// Current memory footprint in bytes, as reported by the engine.
    fn memory_usage(&self) -> u64;
}

/// Creates one engine per worker spawn.
pub trait EngineFactory: Send + Sync {
    fn create_engine(&self, plugin_id: &str) -> Box<dyn PluginEngine>;
}

/// Any `Fn(&str) -> Box<dyn PluginEngine>` closure is a factory.
impl<F> EngineFactory for F
where
    F: Fn(&str) -> Box<dyn PluginEngine> + Send + Sync,
{
    fn create_engine(&self, plugin_id: &str) -> Box<dyn PluginEngine> {
        self(plugin_id)
    }
}
