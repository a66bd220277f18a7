//! Manifest parsing and validation.
//!
//! Parsing is two-stage: the JSON is first deserialized into a loose raw
//! structure, then validated field by field into [`PluginManifest`]. This
//! keeps error reporting precise (missing field vs. bad value vs. unknown
//! permission) instead of surfacing everything as a generic serde error.
//!
//! A manifest can live in a side-car `manifest.json` file or be embedded in
//! the plugin source behind a `@fleet-manifest` marker:
//!
//! ```text
//! // @fleet-manifest
//! // {
//! //   "name": "todo-list",
//! //   "version": "1.0.0",
//! //   "commands": [{ "name": "list-todos", "title": "List Todos", "mode": "view" }]
//! // }
//! ```

use std::collections::HashSet;
use std::path::Path;

use crate::error::{ManifestError, Result};
use crate::types::{
    Capability, CommandMode, CommandSpec, PluginManifest, PreferenceKind, PreferenceOption,
    PreferenceSpec,
};

/// Manifest schema version this host understands.
const SUPPORTED_MANIFEST_VERSION: u64 = 1;

/// Marker that introduces an embedded manifest block in plugin source.
const EMBEDDED_MARKER: &str = "@fleet-manifest";

// ---------------------------------------------------------------------------
// Raw (pre-validation) structures
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    manifest_version: Option<u64>,
    description: Option<String>,
    author: Option<String>,
    icon: Option<String>,
    license: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    commands: Option<Vec<RawCommand>>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    preferences: Vec<RawPreference>,
}

#[derive(Debug, serde::Deserialize)]
struct RawCommand {
    name: Option<String>,
    title: Option<String>,
    description: Option<String>,
    mode: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawPreference {
    name: Option<String>,
    title: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    required: bool,
    default: Option<serde_json::Value>,
    #[serde(default)]
    options: Vec<RawPreferenceOption>,
}

#[derive(Debug, serde::Deserialize)]
struct RawPreferenceOption {
    title: String,
    value: String,
}

// ---------------------------------------------------------------------------
// Parsing entry points
// ---------------------------------------------------------------------------

/// Parse and validate a manifest from its JSON text.
pub fn parse_manifest(source: &str) -> Result<PluginManifest> {
    let raw: RawManifest = serde_json::from_str(source)?;
    validate(raw)
}

/// Scan plugin source for an embedded manifest block.
///
/// Returns `Ok(None)` when the source carries no `@fleet-manifest` marker,
/// signaling the loader to fall back to a side-car manifest file. When a
/// marker is present the block must parse and validate; a broken embedded
/// manifest is an error, not a silent fallback.
pub fn extract_manifest_from_code(code: &str) -> Result<Option<PluginManifest>> {
    let Some(marker_pos) = code.find(EMBEDDED_MARKER) else {
        return Ok(None);
    };

    let after_marker = &code[marker_pos + EMBEDDED_MARKER.len()..];
    let block = extract_json_block(after_marker).ok_or_else(|| ManifestError::InvalidField {
        field: "manifest".into(),
        reason: "no JSON object follows the @fleet-manifest marker".into(),
    })?;

    parse_manifest(&block).map(Some)
}

/// Read a manifest file from disk and parse it.
pub fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ManifestError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ManifestError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    parse_manifest(&content)
}

/// Extract the first balanced `{ ... }` block, ignoring line-comment
/// prefixes so the manifest can live inside `//` comments.
fn extract_json_block(text: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        let stripped = trimmed
            .strip_prefix("//")
            .or_else(|| trimmed.strip_prefix('*'))
            .unwrap_or(trimmed);
        cleaned.push_str(stripped);
        cleaned.push('\n');
    }

    let start = cleaned.find('{')?;
    let bytes = cleaned.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(cleaned[start..=i].to_owned());
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(raw: RawManifest) -> Result<PluginManifest> {
    if let Some(v) = raw.manifest_version
        && v != SUPPORTED_MANIFEST_VERSION
    {
        return Err(ManifestError::UnsupportedVersion {
            version: v.to_string(),
        });
    }

    let name = require(raw.name, "name")?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ManifestError::InvalidField {
            field: "name".into(),
            reason: format!("`{name}` is not a valid plugin slug"),
        });
    }

    let version = require(raw.version, "version")?;
    if version.is_empty() {
        return Err(ManifestError::InvalidField {
            field: "version".into(),
            reason: "version must not be empty".into(),
        });
    }

    let raw_commands = raw.commands.ok_or_else(|| ManifestError::MissingField {
        field: "commands".into(),
    })?;

    let mut seen = HashSet::new();
    let mut commands = Vec::with_capacity(raw_commands.len());
    for raw_cmd in raw_commands {
        let cmd = validate_command(raw_cmd)?;
        if !seen.insert(cmd.name.clone()) {
            return Err(ManifestError::DuplicateCommand { name: cmd.name });
        }
        commands.push(cmd);
    }

    let mut permissions = Vec::with_capacity(raw.permissions.len());
    for token in &raw.permissions {
        let cap = Capability::from_token(token).ok_or_else(|| ManifestError::UnknownPermission {
            token: token.clone(),
        })?;
        if !permissions.contains(&cap) {
            permissions.push(cap);
        }
    }

    let preferences = raw
        .preferences
        .into_iter()
        .map(validate_preference)
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        plugin = %name,
        commands = commands.len(),
        permissions = permissions.len(),
        "manifest validated"
    );

    Ok(PluginManifest {
        name,
        version,
        description: raw.description,
        author: raw.author,
        icon: raw.icon,
        license: raw.license,
        categories: raw.categories,
        commands,
        permissions,
        preferences,
    })
}

fn validate_command(raw: RawCommand) -> Result<CommandSpec> {
    let name = require(raw.name, "commands[].name")?;
    let title = require(raw.title, "commands[].title")?;
    let mode_str = require(raw.mode, "commands[].mode")?;

    let mode = match mode_str.as_str() {
        "view" => CommandMode::View,
        "no-view" => CommandMode::NoView,
        other => {
            return Err(ManifestError::InvalidField {
                field: format!("commands[{name}].mode"),
                reason: format!("`{other}` is not one of `view`, `no-view`"),
            });
        }
    };

    Ok(CommandSpec {
        name,
        title,
        description: raw.description,
        mode,
        keywords: raw.keywords,
    })
}

fn validate_preference(raw: RawPreference) -> Result<PreferenceSpec> {
    let name = require(raw.name, "preferences[].name")?;
    let kind_str = require(raw.kind, "preferences[].type")?;

    let kind = match kind_str.as_str() {
        "textfield" => PreferenceKind::Textfield,
        "password" => PreferenceKind::Password,
        "checkbox" => PreferenceKind::Checkbox,
        "dropdown" => PreferenceKind::Dropdown,
        "textarea" => PreferenceKind::Textarea,
        other => {
            return Err(ManifestError::InvalidField {
                field: format!("preferences[{name}].type"),
                reason: format!("`{other}` is not a supported preference type"),
            });
        }
    };

    let options: Vec<PreferenceOption> = raw
        .options
        .into_iter()
        .map(|o| PreferenceOption {
            title: o.title,
            value: o.value,
        })
        .collect();

    if kind == PreferenceKind::Dropdown && options.is_empty() {
        return Err(ManifestError::InvalidField {
            field: format!("preferences[{name}].options"),
            reason: "dropdown preferences need at least one option".into(),
        });
    }

    Ok(PreferenceSpec {
        name,
        title: raw.title,
        kind,
        required: raw.required,
        default: raw.default,
        options,
    })
}

fn require(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| ManifestError::MissingField {
        field: field.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
