//! Fleet Chat plugin manifest model and parser.
//!
//! A manifest declares everything the host needs to know about a plugin
//! before any of its code runs: identity, the commands it contributes, the
//! permissions it requests, and its user preferences.
//!
//! - **[`types`]** -- [`PluginManifest`] and friends: the immutable,
//!   validated data model.
//! - **[`parser`]** -- [`parse_manifest`], [`extract_manifest_from_code`],
//!   and [`load_manifest`]: JSON parsing plus field-level validation.
//! - **[`error`]** -- [`ManifestError`] enumerates every failure mode.
//!
//! Validation fails closed: unknown permission tokens, unknown command
//! modes, and unknown preference types are all hard errors.

pub mod error;
pub mod parser;
pub mod types;

pub use error::{ManifestError, Result};
pub use parser::{extract_manifest_from_code, load_manifest, parse_manifest};
pub use types::{
    Capability, CommandMode, CommandSpec, PluginManifest, PreferenceKind, PreferenceOption,
    PreferenceSpec,
};
