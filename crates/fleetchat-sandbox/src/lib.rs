//! Fleet Chat capability sandbox.
//!
//! This crate decides what untrusted plugin code is allowed to do and builds
//! the restricted API surface bound into it. It never performs a native
//! operation itself: that is the platform bridge's job, and the bridge is
//! only ever reached through capability checks that default to deny.
//!
//! - **[`policy`]** -- [`SandboxPolicy`] (host allow-list) and
//!   [`SandboxConfig`] (the per-plugin grant, computed once at load as the
//!   intersection of manifest request and policy).
//! - **[`scan`]** -- [`validate_code`], the static pre-execution scanner.
//! - **[`wrap`]** -- [`wrap_plugin_code`], which produces the executable
//!   unit with a capability-binding prologue.
//! - **[`surface`]** -- [`CapabilitySurface`], the injected capability
//!   object, and [`StateHandle`] for per-plugin state.
//! - **[`bridge`]** -- the [`PlatformBridge`] trait hosts implement.
//! - **[`console`]** / **[`fetch`]** -- the secure console and network
//!   proxies.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod bridge;
pub mod console;
pub mod error;
pub mod fetch;
pub mod policy;
pub mod scan;
pub mod surface;
pub mod wrap;

pub use bridge::{HttpRequest, HttpResponse, Notification, PlatformBridge, ShellOutput};
pub use console::{ConsoleLevel, ConsoleRecord, SecureConsole};
pub use error::{Result, SandboxError};
pub use fetch::SecureFetch;
pub use policy::{SandboxConfig, SandboxPolicy, create_sandbox};
pub use scan::validate_code;
pub use surface::{CapabilitySurface, StateHandle};
pub use wrap::{ENTRY_SYMBOL, SURFACE_BINDING, WrappedProgram, wrap_plugin_code};
