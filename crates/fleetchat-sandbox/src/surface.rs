//! The bound capability surface.
//!
//! [`CapabilitySurface`] is the capability object injected into an executed
//! plugin unit. Every operation re-checks the grant computed at load time and
//! then delegates to the platform bridge; nothing here performs a native
//! operation directly. The surface is `Clone + Send + Sync` and safe to call
//! concurrently from multiple busy workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fleetchat_manifest::Capability;

use crate::bridge::{HttpRequest, HttpResponse, Notification, PlatformBridge, ShellOutput};
use crate::console::SecureConsole;
use crate::error::{Result, SandboxError};
use crate::fetch::SecureFetch;
use crate::policy::SandboxConfig;

/// Per-plugin key/value state, passed by handle rather than looked up in any
/// process-wide map. Dropped together with the plugin.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().expect("state lock poisoned").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner
            .write()
            .expect("state lock poisoned")
            .insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.write().expect("state lock poisoned").remove(key)
    }

    /// Snapshot of the whole state map, used by the `getState` protocol
    /// message.
    pub fn snapshot(&self) -> serde_json::Value {
        let map = self.inner.read().expect("state lock poisoned");
        serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// The restricted API surface handed to one plugin instance.
#[derive(Clone)]
pub struct CapabilitySurface {
    plugin: String,
    config: SandboxConfig,
    bridge: Arc<dyn PlatformBridge>,
    console: SecureConsole,
    fetch: SecureFetch,
    state: StateHandle,
}

impl CapabilitySurface {
    /// Bind a surface for one plugin under its computed grant.
    pub fn bind(
        plugin: impl Into<String>,
        config: SandboxConfig,
        bridge: Arc<dyn PlatformBridge>,
    ) -> Self {
        let plugin = plugin.into();
        Self {
            console: SecureConsole::new(&plugin),
            fetch: SecureFetch::new(config.clone(), Arc::clone(&bridge)),
            state: StateHandle::new(),
            plugin,
            config,
            bridge,
        }
    }

    /// The grant this surface enforces.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The plugin's console proxy.
    pub fn console(&self) -> &SecureConsole {
        &self.console
    }

    /// The plugin's state handle.
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    fn check(&self, capability: Capability) -> Result<()> {
        if self.config.is_granted(capability) {
            Ok(())
        } else {
            tracing::warn!(
                plugin = %self.plugin,
                capability = %capability,
                "capability call denied"
            );
            Err(SandboxError::PermissionDenied { capability })
        }
    }

    /// Network access; gated on [`Capability::Network`] plus the domain
    /// allow-list inside [`SecureFetch`].
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.fetch.fetch(request).await
    }

    /// Persistent key/value read; gated on [`Capability::Storage`].
    pub fn storage_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.check(Capability::Storage)?;
        Ok(self.state.get(key))
    }

    /// Persistent key/value write; gated on [`Capability::Storage`].
    pub fn storage_set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.check(Capability::Storage)?;
        self.state.set(key, value);
        Ok(())
    }

    /// Clipboard read; gated on [`Capability::Clipboard`].
    pub async fn clipboard_read(&self) -> Result<String> {
        self.check(Capability::Clipboard)?;
        self.bridge.clipboard_read().await
    }

    /// Clipboard write; gated on [`Capability::Clipboard`].
    pub async fn clipboard_write(&self, text: String) -> Result<()> {
        self.check(Capability::Clipboard)?;
        self.bridge.clipboard_write(text).await
    }

    /// Shell execution; gated on [`Capability::Shell`].
    pub async fn run_command(&self, command: String, args: Vec<String>) -> Result<ShellOutput> {
        self.check(Capability::Shell)?;
        self.bridge.run_command(command, args).await
    }

    /// Desktop notification; gated on [`Capability::Notifications`].
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        self.check(Capability::Notifications)?;
        self.bridge.notify(notification).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
