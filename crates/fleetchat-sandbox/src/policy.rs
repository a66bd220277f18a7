//! Sandbox policy and the computed per-plugin capability grant.
//!
//! [`SandboxPolicy`] is the host-side allow-list; [`SandboxConfig`] is what a
//! single plugin actually receives, computed exactly once at load time as the
//! intersection of the manifest's requested permissions and the policy. A
//! plugin can never widen its own grant by asking for more.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use fleetchat_manifest::{Capability, PluginManifest};

/// Host-side policy describing what plugins may be granted at all.
///
/// Defaults to denying everything; a builder-style API opens individual
/// capabilities and domains.
#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    /// Capabilities that may be granted when a manifest requests them.
    pub allow_list: BTreeSet<Capability>,

    /// Hosts that network-granted plugins may reach. A domain entry also
    /// covers its subdomains.
    pub allowed_domains: BTreeSet<String>,
}

impl SandboxPolicy {
    /// Create a deny-everything policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit a capability to be granted.
    pub fn allow(mut self, capability: Capability) -> Self {
        self.allow_list.insert(capability);
        self
    }

    /// Permit every capability the host knows about.
    pub fn allow_all(mut self) -> Self {
        self.allow_list.extend(Capability::ALL);
        self
    }

    /// Add a host to the network domain allow-list.
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.insert(domain.into());
        self
    }
}

/// The capability grant computed for one plugin at load time.
///
/// Immutable after construction: the runtime holds one per loaded plugin and
/// never revisits the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Granted capabilities: `requested ∩ policy.allow_list`.
    pub granted: BTreeSet<Capability>,

    /// Domain allow-list in force for this plugin (empty unless network
    /// was granted).
    pub allowed_domains: BTreeSet<String>,
}

impl SandboxConfig {
    /// Whether a capability was granted.
    pub fn is_granted(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    /// Whether a host is covered by the domain allow-list, either exactly
    /// or as a subdomain of an allowed entry.
    pub fn is_domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

/// Compute the capability grant for a manifest under a policy.
pub fn create_sandbox(manifest: &PluginManifest, policy: &SandboxPolicy) -> SandboxConfig {
    let granted: BTreeSet<Capability> = manifest
        .permissions
        .iter()
        .copied()
        .filter(|c| policy.allow_list.contains(c))
        .collect();

    let allowed_domains = if granted.contains(&Capability::Network) {
        policy.allowed_domains.clone()
    } else {
        BTreeSet::new()
    };

    let denied: Vec<&Capability> = manifest
        .permissions
        .iter()
        .filter(|c| !granted.contains(c))
        .collect();
    if !denied.is_empty() {
        tracing::info!(plugin = %manifest.name, ?denied, "capabilities requested but not granted");
    }

    SandboxConfig {
        granted,
        allowed_domains,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fleetchat_manifest::parse_manifest;

    fn manifest_with(permissions: &str) -> PluginManifest {
        parse_manifest(&format!(
            r#"{{"name": "t", "version": "1.0.0", "commands": [], "permissions": {permissions}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn granted_is_intersection() {
        let manifest = manifest_with(r#"["network", "clipboard", "shell"]"#);
        let policy = SandboxPolicy::new()
            .allow(Capability::Network)
            .allow(Capability::Storage);

        let config = create_sandbox(&manifest, &policy);
        assert_eq!(
            config.granted,
            BTreeSet::from([Capability::Network])
        );
    }

    #[test]
    fn granted_is_subset_of_policy() {
        let manifest = manifest_with(r#"["storage", "network", "filesystem", "clipboard"]"#);
        let policy = SandboxPolicy::new()
            .allow(Capability::Storage)
            .allow(Capability::Clipboard);

        let config = create_sandbox(&manifest, &policy);
        assert!(config.granted.iter().all(|c| policy.allow_list.contains(c)));
    }

    #[test]
    fn empty_policy_grants_nothing() {
        let manifest = manifest_with(r#"["network"]"#);
        let config = create_sandbox(&manifest, &SandboxPolicy::new());
        assert!(config.granted.is_empty());
        assert!(config.allowed_domains.is_empty());
    }

    #[test]
    fn domains_only_attached_when_network_granted() {
        let policy = SandboxPolicy::new()
            .allow(Capability::Storage)
            .allow_domain("api.example.com");

        let manifest = manifest_with(r#"["storage"]"#);
        let config = create_sandbox(&manifest, &policy);
        assert!(config.allowed_domains.is_empty());

        let policy = policy.allow(Capability::Network);
        let manifest = manifest_with(r#"["network"]"#);
        let config = create_sandbox(&manifest, &policy);
        assert!(config.is_domain_allowed("api.example.com"));
    }

    #[test]
    fn subdomain_matching() {
        let config = SandboxConfig {
            granted: BTreeSet::from([Capability::Network]),
            allowed_domains: BTreeSet::from(["example.com".to_owned()]),
        };
        assert!(config.is_domain_allowed("example.com"));
        assert!(config.is_domain_allowed("api.example.com"));
        assert!(!config.is_domain_allowed("evil-example.com"));
        assert!(!config.is_domain_allowed("example.com.evil.net"));
    }

    #[test]
    fn allow_all_policy() {
        let manifest = manifest_with(r#"["storage", "network", "shell"]"#);
        let config = create_sandbox(&manifest, &SandboxPolicy::new().allow_all());
        assert_eq!(config.granted.len(), 3);
    }
}
