//! Plugin code wrapping.
//!
//! [`wrap_plugin_code`] produces the final executable unit handed to an
//! execution engine. A generated prologue binds exactly the whitelisted
//! capability surface into local names and shadows ambient host bindings, so
//! the plugin body cannot reach anything it was not explicitly given. The
//! surface arrives as a single injected `__surface` object — explicit
//! dependency injection, never global-scope mutation.

use serde::{Deserialize, Serialize};

use fleetchat_manifest::Capability;

use crate::policy::SandboxConfig;

/// Name of the injected capability object.
pub const SURFACE_BINDING: &str = "__surface";

/// Entry-point symbol engines invoke after evaluating the wrapped source.
pub const ENTRY_SYMBOL: &str = "__fleet_main";

/// Ambient bindings shadowed in the prologue regardless of grant.
///
/// Mirrors the host globals rejected by the static scan; shadowing them makes
/// the wrapped unit safe even if a scanner gap lets a reference through.
const SHADOWED_BINDINGS: &[&str] = &[
    "globalThis",
    "window",
    "document",
    "process",
    "require",
    "eval",
    "Function",
    "XMLHttpRequest",
    "WebSocket",
    "importScripts",
];

/// The executable unit produced by wrapping: prologue + plugin body.
///
/// Serializable because it crosses the worker protocol inside the `init`
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedProgram {
    /// Complete source to evaluate.
    pub source: String,
    /// Symbol the engine calls to run a command dispatch.
    pub entry: String,
}

/// Capability surface member bound for a granted capability.
fn binding_for(capability: Capability) -> &'static str {
    match capability {
        Capability::Storage => "storage",
        Capability::Network => "fetch",
        Capability::Filesystem => "fs",
        Capability::Clipboard => "clipboard",
        Capability::Shell => "shell",
        Capability::Notifications => "notifications",
    }
}

/// Wrap validated plugin source for execution under the given grant.
pub fn wrap_plugin_code(code: &str, config: &SandboxConfig) -> WrappedProgram {
    let mut source = String::with_capacity(code.len() + 512);

    source.push_str("\"use strict\";\n");

    // Console is always available; everything else follows the grant.
    source.push_str(&format!("const console = {SURFACE_BINDING}.console;\n"));
    for capability in &config.granted {
        let name = binding_for(*capability);
        source.push_str(&format!("const {name} = {SURFACE_BINDING}.{name};\n"));
    }

    // Shadow ambient host bindings the plugin must not see. Granted surface
    // names are already bound above and are skipped.
    let granted_names: Vec<&str> = config.granted.iter().map(|c| binding_for(*c)).collect();
    for shadowed in SHADOWED_BINDINGS {
        if !granted_names.contains(shadowed) {
            source.push_str(&format!("const {shadowed} = undefined;\n"));
        }
    }

    source.push_str(&format!("function {ENTRY_SYMBOL}() {{\n"));
    source.push_str(code);
    source.push_str("\n}\n");

    WrappedProgram {
        source,
        entry: ENTRY_SYMBOL.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
