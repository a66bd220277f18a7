//! Plugin source resolution and worker activation.
//!
//! The loader turns a [`PluginSource`] into a running worker in two steps:
//! `resolve` reads source and manifest from wherever they live, and
//! `activate` runs the security pipeline (static scan, grant computation,
//! code wrapping, surface binding) and drives the `init` handshake. The
//! split lets the manager reserve a registry slot between the two.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use fleetchat_manifest::{
    ManifestError, PluginManifest, extract_manifest_from_code, load_manifest,
};
use fleetchat_sandbox::{
    CapabilitySurface, PlatformBridge, SandboxConfig, SandboxPolicy, create_sandbox,
    validate_code, wrap_plugin_code,
};

use crate::engine::EngineFactory;
use crate::error::{Result, RuntimeError};
use crate::protocol::{InitPayload, RequestPayload};
use crate::tracker::Termination;
use crate::worker::{WorkerHandle, spawn_worker};

/// File name the loader expects plugin source under.
pub const SOURCE_FILE: &str = "index.js";

/// Side-car manifest file name; optional when the source embeds one.
pub const MANIFEST_FILE: &str = "manifest.json";

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a plugin comes from. Kept by the manager so a plugin can be
/// reloaded or restarted from the same origin later.
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// A directory holding `index.js` and, optionally, `manifest.json`.
    Directory(PathBuf),
    /// In-memory source, with an optional pre-parsed manifest. Without one
    /// the source must embed a manifest block.
    Inline {
        code: String,
        manifest: Option<PluginManifest>,
    },
}

/// A source resolved to its manifest and raw code, not yet activated.
#[derive(Debug, Clone)]
pub struct ResolvedPlugin {
    pub manifest: PluginManifest,
    pub code: String,
}

/// A successfully activated plugin: everything the manager registers.
pub struct ActivatedPlugin {
    pub manifest: Arc<PluginManifest>,
    pub config: SandboxConfig,
    pub handle: WorkerHandle,
}

/// Resolves and activates plugins under one policy, bridge, and engine
/// factory.
pub struct PluginLoader {
    policy: SandboxPolicy,
    bridge: Arc<dyn PlatformBridge>,
    factory: Arc<dyn EngineFactory>,
    init_timeout: Duration,
}

impl PluginLoader {
    pub fn new(
        policy: SandboxPolicy,
        bridge: Arc<dyn PlatformBridge>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            policy,
            bridge,
            factory,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    /// Override the `init` handshake deadline.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Read a source's manifest and code. No side effects beyond I/O.
    ///
    /// Directory sources prefer the side-car `manifest.json`; without one
    /// the source file must embed a manifest block.
    pub async fn resolve(&self, source: &PluginSource) -> Result<ResolvedPlugin> {
        match source {
            PluginSource::Directory(dir) => {
                let code = tokio::fs::read_to_string(dir.join(SOURCE_FILE)).await?;

                let sidecar = dir.join(MANIFEST_FILE);
                let manifest = if sidecar.is_file() {
                    load_manifest(&sidecar)?
                } else {
                    extract_manifest_from_code(&code)?.ok_or_else(|| {
                        ManifestError::NotFound {
                            path: sidecar.clone(),
                        }
                    })?
                };
                Ok(ResolvedPlugin { manifest, code })
            }
            PluginSource::Inline { code, manifest } => {
                let manifest = match manifest {
                    Some(manifest) => manifest.clone(),
                    None => extract_manifest_from_code(code)?.ok_or_else(|| {
                        ManifestError::MissingField {
                            field: "manifest".into(),
                        }
                    })?,
                };
                Ok(ResolvedPlugin {
                    manifest,
                    code: code.clone(),
                })
            }
        }
    }

    /// Run the security pipeline and bring up a worker for a resolved
    /// plugin.
    ///
    /// A worker that fails or times out during the `init` handshake is
    /// disposed before the error is returned; activation never leaks a
    /// half-alive worker.
    pub async fn activate(
        &self,
        plugin_id: &str,
        resolved: ResolvedPlugin,
        terminations: mpsc::Sender<Termination>,
    ) -> Result<ActivatedPlugin> {
        validate_code(&resolved.code)?;

        let config = create_sandbox(&resolved.manifest, &self.policy);
        let program = wrap_plugin_code(&resolved.code, &config);
        let surface =
            CapabilitySurface::bind(plugin_id, config.clone(), Arc::clone(&self.bridge));
        let engine = self.factory.create_engine(plugin_id);
        let handle = spawn_worker(plugin_id, engine, surface, terminations);

        let init = RequestPayload::Init(InitPayload {
            manifest: resolved.manifest.clone(),
            config: config.clone(),
            program,
        });
        match handle.request_timeout(init, self.init_timeout).await {
            Ok(response) if response.is_ok() => {
                tracing::info!(
                    plugin = %plugin_id,
                    granted = ?config.granted,
                    "plugin activated"
                );
                Ok(ActivatedPlugin {
                    manifest: Arc::new(resolved.manifest),
                    config,
                    handle,
                })
            }
            Ok(response) => {
                handle.dispose().await;
                Err(RuntimeError::InitFailed {
                    message: response
                        .error
                        .unwrap_or_else(|| "initialization failed".into()),
                    stack: response.stack,
                })
            }
            Err(error) => {
                handle.dispose().await;
                Err(error)
            }
        }
    }

}

/// Scan a directory for plugin candidates: immediate subdirectories
/// containing a source file, in name order.
pub async fn discover(dir: &Path) -> Result<Vec<PluginSource>> {
    let mut sources = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() && path.join(SOURCE_FILE).is_file() {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources.into_iter().map(PluginSource::Directory).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
