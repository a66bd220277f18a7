//! Manifest type definitions.
//!
//! A plugin manifest declares a plugin's identity, the commands it
//! contributes to the launcher, the permissions it requests, and the
//! preferences it exposes to the user. Manifests are parsed once at load
//! time and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// A fully parsed and validated plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin slug (e.g. `todo-list`). Used as the plugin id.
    pub name: String,

    /// Semantic version string (e.g. `1.2.0`).
    pub version: String,

    /// Short human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Author name or handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Icon identifier or path, interpreted by the UI layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// SPDX license identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Store categories for discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    /// Commands contributed by this plugin, in declaration order.
    pub commands: Vec<CommandSpec>,

    /// Capabilities the plugin requests. What it actually receives is
    /// decided by the sandbox policy, never by this list alone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Capability>,

    /// User-configurable preferences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences: Vec<PreferenceSpec>,
}

impl PluginManifest {
    /// Look up a command by name.
    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Whether the manifest requests the given capability.
    pub fn requests(&self, capability: Capability) -> bool {
        self.permissions.contains(&capability)
    }
}

/// A single launcher command declared by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command name, unique within the manifest.
    pub name: String,

    /// Display title shown in the launcher.
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How the command presents itself when invoked.
    pub mode: CommandMode,

    /// Extra search keywords for launcher matching.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Presentation mode of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMode {
    /// Renders a view when invoked.
    #[serde(rename = "view")]
    View,
    /// Runs to completion without rendering anything.
    #[serde(rename = "no-view")]
    NoView,
}

/// A capability token a plugin may request.
///
/// The set is closed and host-defined: tokens outside it are rejected at
/// parse time rather than silently dropped, so the security surface stays
/// auditable before any sandbox decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Per-plugin key/value storage.
    #[serde(rename = "storage", alias = "localStorage")]
    Storage,
    /// Outbound HTTP to domains on the sandbox allow-list.
    #[serde(rename = "network")]
    Network,
    /// Scoped filesystem access.
    #[serde(rename = "filesystem")]
    Filesystem,
    /// System clipboard read/write.
    #[serde(rename = "clipboard")]
    Clipboard,
    /// Shell command execution.
    #[serde(rename = "shell")]
    Shell,
    /// Desktop notifications.
    #[serde(rename = "notifications")]
    Notifications,
}

impl Capability {
    /// All capabilities the host knows about.
    pub const ALL: [Capability; 6] = [
        Capability::Storage,
        Capability::Network,
        Capability::Filesystem,
        Capability::Clipboard,
        Capability::Shell,
        Capability::Notifications,
    ];

    /// Parse a manifest permission token.
    ///
    /// `localStorage` is accepted as a legacy spelling of `storage`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "storage" | "localStorage" => Some(Self::Storage),
            "network" => Some(Self::Network),
            "filesystem" => Some(Self::Filesystem),
            "clipboard" => Some(Self::Clipboard),
            "shell" => Some(Self::Shell),
            "notifications" => Some(Self::Notifications),
            _ => None,
        }
    }

    /// The canonical wire token.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Clipboard => "clipboard",
            Self::Shell => "shell",
            Self::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// A user-facing preference declared by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSpec {
    /// Preference key, unique within the manifest.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Input control kind.
    #[serde(rename = "type")]
    pub kind: PreferenceKind,

    #[serde(default)]
    pub required: bool,

    /// Default value, if any. Shape depends on `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Choices for `dropdown` preferences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<PreferenceOption>,
}

/// Input control kinds for preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceKind {
    Textfield,
    Password,
    Checkbox,
    Dropdown,
    Textarea,
}

/// One selectable option of a dropdown preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceOption {
    pub title: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_token_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_token(cap.token()), Some(cap));
        }
    }

    #[test]
    fn local_storage_alias() {
        assert_eq!(
            Capability::from_token("localStorage"),
            Some(Capability::Storage)
        );
    }

    #[test]
    fn unknown_token_is_none() {
        assert_eq!(Capability::from_token("kernel"), None);
        assert_eq!(Capability::from_token(""), None);
    }

    #[test]
    fn command_mode_wire_names() {
        let view = serde_json::to_string(&CommandMode::View).unwrap();
        let no_view = serde_json::to_string(&CommandMode::NoView).unwrap();
        assert_eq!(view, "\"view\"");
        assert_eq!(no_view, "\"no-view\"");
    }

    #[test]
    fn preference_kind_wire_names() {
        let kind: PreferenceKind = serde_json::from_str("\"textarea\"").unwrap();
        assert_eq!(kind, PreferenceKind::Textarea);
        assert!(serde_json::from_str::<PreferenceKind>("\"slider\"").is_err());
    }

    #[test]
    fn manifest_lookup_helpers() {
        let manifest = PluginManifest {
            name: "demo".into(),
            version: "0.1.0".into(),
            description: None,
            author: None,
            icon: None,
            license: None,
            categories: vec![],
            commands: vec![CommandSpec {
                name: "run".into(),
                title: "Run".into(),
                description: None,
                mode: CommandMode::NoView,
                keywords: vec![],
            }],
            permissions: vec![Capability::Network],
            preferences: vec![],
        };
        assert!(manifest.command("run").is_some());
        assert!(manifest.command("walk").is_none());
        assert!(manifest.requests(Capability::Network));
        assert!(!manifest.requests(Capability::Shell));
    }
}
