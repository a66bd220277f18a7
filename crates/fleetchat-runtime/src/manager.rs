//! The plugin manager.
//!
//! [`PluginManager`] owns the registry of loaded plugins and is the only
//! place workers are created or destroyed. Every failure class funnels into
//! the same teardown path: execution timeouts, fatal worker errors, memory
//! verdicts from the tracker, and failed liveness probes all end in
//! `force_unload`, so a condemned worker can never linger half-alive in the
//! registry.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::mpsc;

use fleetchat_manifest::{Capability, CommandMode, CommandSpec, PluginManifest};
use fleetchat_sandbox::SandboxConfig;

use crate::error::{Result, RuntimeError};
use crate::loader::{PluginLoader, PluginSource};
use crate::protocol::{ExecutionResult, InvokePayload, RequestPayload};
use crate::tracker::{PingPolicy, ResourceTracker, Termination, TerminationReason, TrackerConfig};
use crate::worker::{WorkerHandle, WorkerState, WorkerStatus};

/// Depth of the shared termination channel.
const TERMINATION_CHANNEL: usize = 64;

/// One registry slot.
struct PluginEntry {
    manifest: Arc<PluginManifest>,
    config: SandboxConfig,
    /// Absent only while the slot is a reservation during `load`.
    handle: Option<WorkerHandle>,
    status: WorkerStatus,
    last_activity: DateTime<Utc>,
    /// Recorded origin, kept for `reload` and ping-policy restarts.
    source: PluginSource,
}

impl PluginEntry {
    /// Apply a status transition, refusing moves the state machine forbids.
    fn set_status(&mut self, plugin_id: &str, to: WorkerStatus) -> bool {
        if self.status.can_transition(to) {
            tracing::debug!(plugin = %plugin_id, from = ?self.status, ?to, "status transition");
            self.status = to;
            true
        } else {
            tracing::warn!(
                plugin = %plugin_id,
                from = ?self.status,
                ?to,
                "refusing invalid status transition"
            );
            false
        }
    }
}

/// A loaded plugin as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub manifest: PluginManifest,
    /// Capabilities actually granted at load time.
    pub granted: BTreeSet<Capability>,
    pub status: WorkerStatus,
}

/// One launcher entry: a command together with the plugin that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRef {
    pub plugin_id: String,
    pub command: CommandSpec,
}

/// Owns every loaded plugin and its worker.
pub struct PluginManager {
    plugins: DashMap<String, PluginEntry>,
    loader: PluginLoader,
    tracker: ResourceTracker,
    terminations: mpsc::Sender<Termination>,
}

impl PluginManager {
    /// Build a manager and start its background tasks (termination reaper,
    /// resource sampler, and the liveness prober when configured).
    pub fn new(loader: PluginLoader, config: TrackerConfig) -> Arc<Self> {
        let (term_tx, term_rx) = mpsc::channel(TERMINATION_CHANNEL);
        let tracker = ResourceTracker::spawn(config, term_tx.clone());

        let manager = Arc::new(Self {
            plugins: DashMap::new(),
            loader,
            tracker,
            terminations: term_tx,
        });

        tokio::spawn(reaper_loop(Arc::downgrade(&manager), term_rx));
        if manager.tracker.config().ping_interval.is_some() {
            tokio::spawn(ping_loop(Arc::downgrade(&manager)));
        }
        manager
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Load a plugin: resolve its source, reserve its registry slot, run
    /// the security pipeline, and bring up the worker. Returns the plugin
    /// id (the manifest name).
    ///
    /// The slot is reserved before the worker is brought up, so concurrent
    /// loads of the same id resolve to exactly one winner; the rest fail
    /// with [`RuntimeError::AlreadyLoaded`].
    pub async fn load(&self, source: PluginSource) -> Result<String> {
        let resolved = self.loader.resolve(&source).await?;
        let plugin_id = resolved.manifest.name.clone();

        match self.plugins.entry(plugin_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RuntimeError::AlreadyLoaded(plugin_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PluginEntry {
                    manifest: Arc::new(resolved.manifest.clone()),
                    config: SandboxConfig {
                        granted: BTreeSet::new(),
                        allowed_domains: BTreeSet::new(),
                    },
                    handle: None,
                    status: WorkerStatus::Initializing,
                    last_activity: Utc::now(),
                    source,
                });
            }
        }

        let activated = match self
            .loader
            .activate(&plugin_id, resolved, self.terminations.clone())
            .await
        {
            Ok(activated) => activated,
            Err(error) => {
                // Failed loads leave no trace in the registry.
                self.plugins.remove(&plugin_id);
                return Err(error);
            }
        };

        let gauge = activated.handle.memory_gauge();
        match self.plugins.get_mut(&plugin_id) {
            Some(mut entry) => {
                entry.manifest = Arc::clone(&activated.manifest);
                entry.config = activated.config;
                entry.handle = Some(activated.handle);
                entry.last_activity = Utc::now();
                entry.set_status(&plugin_id, WorkerStatus::Ready);
            }
            None => {
                // The reservation was unloaded while the worker came up.
                activated.handle.dispose().await;
                return Err(RuntimeError::NotFound(plugin_id));
            }
        }
        self.tracker.watch(&plugin_id, gauge);

        tracing::info!(plugin = %plugin_id, "plugin loaded");
        Ok(plugin_id)
    }

    /// Load every plugin candidate under a directory, skipping (and
    /// logging) the ones that fail so one broken plugin cannot block the
    /// rest. Returns the ids that loaded.
    pub async fn load_directory(&self, dir: &Path) -> Result<Vec<String>> {
        let sources = crate::loader::discover(dir).await?;
        let mut loaded = Vec::new();
        for source in sources {
            match self.load(source.clone()).await {
                Ok(plugin_id) => loaded.push(plugin_id),
                Err(error) => {
                    tracing::warn!(?source, %error, "skipping plugin that failed to load");
                }
            }
        }
        Ok(loaded)
    }

    /// Unload a plugin: remove it from the registry, stop resource
    /// sampling, and dispose its worker. The removal happens first, so a
    /// concurrent `execute` observes `NotFound` rather than a dying
    /// worker.
    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        let (_, entry) = self
            .plugins
            .remove(plugin_id)
            .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))?;
        self.tracker.unwatch(plugin_id);

        if let Some(handle) = entry.handle {
            handle.dispose().await;
        }
        tracing::info!(plugin = %plugin_id, "plugin unloaded");
        Ok(())
    }

    /// Unload a plugin and load it again from its recorded source.
    pub async fn reload(&self, plugin_id: &str) -> Result<String> {
        let source = self
            .plugins
            .get(plugin_id)
            .map(|entry| entry.source.clone())
            .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))?;
        self.unload(plugin_id).await?;
        self.load(source).await
    }

    /// Involuntary teardown, shared by every failure class. Marks the
    /// entry as errored (when the transition is legal), then runs the
    /// normal unload path. Missing entries are ignored; the plugin may
    /// already be gone.
    pub async fn force_unload(&self, plugin_id: &str, reason: TerminationReason) {
        if let Some(mut entry) = self.plugins.get_mut(plugin_id) {
            entry.set_status(plugin_id, WorkerStatus::Error);
        } else {
            return;
        }
        let error = RuntimeError::from_termination(plugin_id, reason);
        tracing::warn!(plugin = %plugin_id, %error, "force-unloading plugin");
        let _ = self.unload(plugin_id).await;
    }

    /// Dispose every loaded plugin.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        for plugin_id in ids {
            let _ = self.unload(&plugin_id).await;
        }
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Run one command on a loaded plugin.
    ///
    /// The worker is busy for the duration; a second call in that window
    /// fails with [`RuntimeError::NotReady`]. A handled command failure is
    /// a successful call with `success == false` and the worker stays
    /// usable; a watchdog timeout condemns the worker and returns
    /// [`RuntimeError::Timeout`].
    pub async fn execute(
        &self,
        plugin_id: &str,
        command: &str,
        args: serde_json::Value,
    ) -> Result<ExecutionResult> {
        self.dispatch(plugin_id, command, args, false).await
    }

    /// Run a command through the render dispatch regardless of its declared
    /// mode. Same status rules and watchdog as [`execute`](Self::execute).
    pub async fn render(
        &self,
        plugin_id: &str,
        command: &str,
        args: serde_json::Value,
    ) -> Result<ExecutionResult> {
        self.dispatch(plugin_id, command, args, true).await
    }

    async fn dispatch(
        &self,
        plugin_id: &str,
        command: &str,
        args: serde_json::Value,
        force_render: bool,
    ) -> Result<ExecutionResult> {
        let (handle, payload) = {
            let mut entry = self
                .plugins
                .get_mut(plugin_id)
                .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))?;
            if entry.status != WorkerStatus::Ready {
                return Err(RuntimeError::NotReady {
                    plugin: plugin_id.to_owned(),
                    status: entry.status,
                });
            }
            let Some(handle) = entry.handle.clone() else {
                return Err(RuntimeError::NotReady {
                    plugin: plugin_id.to_owned(),
                    status: entry.status,
                });
            };

            let invoke = InvokePayload {
                command: command.to_owned(),
                args,
            };
            // View commands go through the render dispatch.
            let is_view = force_render
                || matches!(
                    entry.manifest.command(command),
                    Some(spec) if spec.mode == CommandMode::View
                );
            let payload = if is_view {
                RequestPayload::Render(invoke)
            } else {
                RequestPayload::Execute(invoke)
            };

            entry.set_status(plugin_id, WorkerStatus::Busy);
            entry.last_activity = Utc::now();
            (handle, payload)
        };

        let started = Instant::now();
        let timeout = self.tracker.config().response_timeout;
        match handle.request_timeout(payload, timeout).await {
            Ok(response) => {
                if let Some(mut entry) = self.plugins.get_mut(plugin_id) {
                    entry.set_status(plugin_id, WorkerStatus::Ready);
                    entry.last_activity = Utc::now();
                }
                Ok(ExecutionResult {
                    success: response.is_ok(),
                    data: response.result,
                    error: response.error,
                    duration: started.elapsed(),
                })
            }
            Err(error @ RuntimeError::Timeout { .. }) => {
                let limit_ms = timeout.as_millis() as u64;
                self.force_unload(plugin_id, TerminationReason::Timeout { limit_ms })
                    .await;
                Err(error)
            }
            Err(error) => {
                // The worker died under us; the reaper owns the cleanup.
                if let Some(mut entry) = self.plugins.get_mut(plugin_id) {
                    entry.set_status(plugin_id, WorkerStatus::Error);
                }
                Err(error)
            }
        }
    }

    /// Replace a plugin's persisted state snapshot.
    pub async fn set_plugin_state(&self, plugin_id: &str, state: serde_json::Value) -> Result<()> {
        let handle = self.live_handle(plugin_id)?;
        let response = handle
            .request_timeout(
                RequestPayload::SetState(state),
                self.tracker.config().response_timeout,
            )
            .await?;
        match response.error {
            None => Ok(()),
            Some(message) => Err(RuntimeError::WorkerFatal {
                plugin: plugin_id.to_owned(),
                message,
                stack: response.stack,
            }),
        }
    }

    /// Read a plugin's persisted state snapshot.
    pub async fn get_plugin_state(&self, plugin_id: &str) -> Result<serde_json::Value> {
        let handle = self.live_handle(plugin_id)?;
        let response = handle
            .request_timeout(
                RequestPayload::GetState,
                self.tracker.config().response_timeout,
            )
            .await?;
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Probe a plugin's worker for liveness.
    pub async fn ping(&self, plugin_id: &str) -> Result<()> {
        let handle = self.live_handle(plugin_id)?;
        let response = handle
            .request_timeout(
                RequestPayload::Ping,
                self.tracker.config().response_timeout,
            )
            .await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(RuntimeError::WorkerFatal {
                plugin: plugin_id.to_owned(),
                message: response.error.unwrap_or_else(|| "ping failed".into()),
                stack: None,
            })
        }
    }

    fn live_handle(&self, plugin_id: &str) -> Result<WorkerHandle> {
        let entry = self
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))?;
        match (&entry.handle, entry.status) {
            (Some(handle), WorkerStatus::Ready | WorkerStatus::Busy) => Ok(handle.clone()),
            _ => Err(RuntimeError::NotReady {
                plugin: plugin_id.to_owned(),
                status: entry.status,
            }),
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Every loaded plugin, in registry order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|entry| PluginInfo {
                id: entry.key().clone(),
                manifest: (*entry.manifest).clone(),
                granted: entry.config.granted.clone(),
                status: entry.status,
            })
            .collect()
    }

    /// Flat launcher view: every command of every loaded plugin.
    pub fn list_commands(&self) -> Vec<CommandRef> {
        self.plugins
            .iter()
            .flat_map(|entry| {
                let plugin_id = entry.key().clone();
                entry
                    .manifest
                    .commands
                    .iter()
                    .map(|command| CommandRef {
                        plugin_id: plugin_id.clone(),
                        command: command.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Point-in-time state of one plugin's worker.
    pub fn state(&self, plugin_id: &str) -> Result<WorkerState> {
        let entry = self
            .plugins
            .get(plugin_id)
            .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))?;
        Ok(WorkerState {
            id: plugin_id.to_owned(),
            status: entry.status,
            last_activity: entry.last_activity,
            memory_usage: entry.handle.as_ref().map_or(0, WorkerHandle::memory_usage),
        })
    }

    /// The capability grant a plugin received at load time.
    pub fn grant(&self, plugin_id: &str) -> Result<SandboxConfig> {
        self.plugins
            .get(plugin_id)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| RuntimeError::NotFound(plugin_id.to_owned()))
    }
}

/// Consumes termination verdicts and applies them. Exits when the manager
/// is dropped or the channel closes.
async fn reaper_loop(manager: Weak<PluginManager>, mut verdicts: mpsc::Receiver<Termination>) {
    while let Some(Termination { plugin_id, reason }) = verdicts.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.force_unload(&plugin_id, reason).await;
    }
}

/// Periodically probes every ready worker and applies the configured ping
/// policy to the ones that stop answering.
async fn ping_loop(manager: Weak<PluginManager>) {
    let (ping_interval, response_timeout, policy) = {
        let Some(manager) = manager.upgrade() else {
            return;
        };
        let config = manager.tracker.config();
        let Some(ping_interval) = config.ping_interval else {
            return;
        };
        (ping_interval, config.response_timeout, config.ping_policy)
    };

    let mut attempts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut interval = tokio::time::interval(ping_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };

        let ready: Vec<(String, WorkerHandle)> = manager
            .plugins
            .iter()
            .filter(|entry| entry.status == WorkerStatus::Ready)
            .filter_map(|entry| {
                entry
                    .handle
                    .clone()
                    .map(|handle| (entry.key().clone(), handle))
            })
            .collect();

        for (plugin_id, handle) in ready {
            let alive = matches!(
                handle
                    .request_timeout(RequestPayload::Ping, response_timeout)
                    .await,
                Ok(ref response) if response.is_ok()
            );
            if alive {
                attempts.remove(&plugin_id);
                continue;
            }

            tracing::warn!(plugin = %plugin_id, "liveness probe failed");
            let restart = match policy {
                PingPolicy::MarkError => false,
                PingPolicy::Restart { max_attempts } => {
                    let n = attempts.entry(plugin_id.clone()).or_insert(0);
                    *n += 1;
                    *n <= max_attempts
                }
            };
            if restart {
                if let Err(error) = manager.reload(&plugin_id).await {
                    tracing::warn!(plugin = %plugin_id, %error, "restart after failed probe did not succeed");
                }
            } else {
                manager
                    .force_unload(&plugin_id, TerminationReason::PingFailed)
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
