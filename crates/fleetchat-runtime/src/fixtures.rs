//! Test doubles shared across the runtime's test modules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleetchat_manifest::{PluginManifest, parse_manifest};
use fleetchat_sandbox::{
    CapabilitySurface, ConsoleLevel, HttpRequest, HttpResponse, Notification, PlatformBridge,
    SandboxPolicy, ShellOutput, create_sandbox, wrap_plugin_code,
};

use crate::engine::{EngineContext, EngineError, EngineFactory, PluginEngine};
use crate::protocol::InitPayload;
use crate::worker::ConsoleSink;

/// The manifest most tests load: two commands, storage requested via the
/// legacy `localStorage` token.
pub(crate) const TODO_MANIFEST: &str = r#"{
    "name": "todo-list",
    "version": "1.0.0",
    "description": "Manage todos",
    "commands": [
        {"name": "list-todos", "title": "List Todos", "mode": "view"},
        {"name": "add-todo", "title": "Add Todo", "mode": "no-view"}
    ],
    "permissions": ["localStorage"]
}"#;

pub(crate) fn todo_manifest() -> PluginManifest {
    parse_manifest(TODO_MANIFEST).unwrap()
}

pub(crate) fn allow_all_policy() -> SandboxPolicy {
    SandboxPolicy::new().allow_all()
}

pub(crate) fn null_bridge() -> Arc<dyn PlatformBridge> {
    Arc::new(NullBridge)
}

pub(crate) fn surface(plugin: &str) -> CapabilitySurface {
    let config = create_sandbox(&todo_manifest(), &allow_all_policy());
    CapabilitySurface::bind(plugin, config, null_bridge())
}

pub(crate) fn init_payload() -> InitPayload {
    let manifest = todo_manifest();
    let config = create_sandbox(&manifest, &allow_all_policy());
    let program = wrap_plugin_code("export function run() {}", &config);
    InitPayload {
        manifest,
        config,
        program,
    }
}

/// Wrap a `Fn() -> FixtureEngine` as an engine factory.
pub(crate) fn factory<F>(build: F) -> Arc<dyn EngineFactory>
where
    F: Fn() -> FixtureEngine + Send + Sync + 'static,
{
    Arc::new(move |_plugin: &str| Box::new(build()) as Box<dyn PluginEngine>)
}

/// Bridge whose operations all trivially succeed.
pub(crate) struct NullBridge;

#[async_trait]
impl PlatformBridge for NullBridge {
    async fn http_request(&self, _request: HttpRequest) -> fleetchat_sandbox::Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            headers: vec![],
            body: String::new(),
        })
    }

    async fn clipboard_read(&self) -> fleetchat_sandbox::Result<String> {
        Ok(String::new())
    }

    async fn clipboard_write(&self, _text: String) -> fleetchat_sandbox::Result<()> {
        Ok(())
    }

    async fn run_command(
        &self,
        _command: String,
        _args: Vec<String>,
    ) -> fleetchat_sandbox::Result<ShellOutput> {
        Ok(ShellOutput {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn notify(&self, _notification: Notification) -> fleetchat_sandbox::Result<()> {
        Ok(())
    }
}

/// Scripted response to one command invocation.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Succeed with this value.
    Value(serde_json::Value),
    /// Fail with a handled command error.
    Fail(String),
    /// Fail fatally, tearing the worker down.
    Fatal(String),
    /// Sleep, then succeed with this value.
    SleepThen(Duration, serde_json::Value),
    /// Never return.
    Hang,
    /// Emit a console record, then succeed with this value.
    Console(ConsoleLevel, String, serde_json::Value),
}

/// Engine driven entirely by per-command scripted behaviors.
pub(crate) struct FixtureEngine {
    behaviors: HashMap<String, Behavior>,
    state: serde_json::Value,
    memory: u64,
    fail_init: Option<String>,
    console: Option<ConsoleSink>,
}

impl FixtureEngine {
    pub(crate) fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            state: serde_json::Value::Null,
            memory: 1024,
            fail_init: None,
            console: None,
        }
    }

    pub(crate) fn on(mut self, command: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(command.to_owned(), behavior);
        self
    }

    pub(crate) fn with_memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    pub(crate) fn failing_init(mut self, message: &str) -> Self {
        self.fail_init = Some(message.to_owned());
        self
    }
}

#[async_trait]
impl PluginEngine for FixtureEngine {
    async fn initialize(&mut self, ctx: EngineContext) -> Result<(), EngineError> {
        if let Some(message) = self.fail_init.take() {
            return Err(EngineError::command(message));
        }
        self.console = Some(ctx.console);
        Ok(())
    }

    async fn invoke(
        &mut self,
        command: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        match self.behaviors.get(command).cloned() {
            Some(Behavior::Value(value)) => Ok(value),
            Some(Behavior::Fail(message)) => Err(EngineError::command(message)),
            Some(Behavior::Fatal(message)) => Err(EngineError::fatal(message)),
            Some(Behavior::SleepThen(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(Behavior::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Some(Behavior::Console(level, message, value)) => {
                if let Some(console) = &self.console {
                    console.emit(level, message);
                }
                Ok(value)
            }
            None => Err(EngineError::command(format!("unknown command `{command}`"))),
        }
    }

    async fn set_state(&mut self, state: serde_json::Value) -> Result<(), EngineError> {
        self.state = state;
        Ok(())
    }

    async fn get_state(&self) -> Result<serde_json::Value, EngineError> {
        Ok(self.state.clone())
    }

    fn memory_usage(&self) -> u64 {
        self.memory
    }
}
