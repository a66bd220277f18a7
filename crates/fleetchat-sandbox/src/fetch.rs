//! Capability-gated network access.
//!
//! [`SecureFetch`] is the only way plugin code reaches the network. Every
//! call re-checks the grant and the domain allow-list; the default is deny.

use std::sync::Arc;

use url::Url;

use fleetchat_manifest::Capability;

use crate::bridge::{HttpRequest, HttpResponse, PlatformBridge};
use crate::error::{Result, SandboxError};
use crate::policy::SandboxConfig;

/// Network function bound into a plugin's capability surface.
#[derive(Clone)]
pub struct SecureFetch {
    config: SandboxConfig,
    bridge: Arc<dyn PlatformBridge>,
}

impl SecureFetch {
    /// Bind a fetch function to one plugin's grant.
    pub fn new(config: SandboxConfig, bridge: Arc<dyn PlatformBridge>) -> Self {
        Self { config, bridge }
    }

    /// Perform an HTTP request on behalf of the plugin.
    ///
    /// Fails with [`SandboxError::PermissionDenied`] when the network
    /// capability was not granted, and with [`SandboxError::DomainNotAllowed`]
    /// when the target host is off the allow-list. Only after both checks
    /// pass does the request reach the platform bridge.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        if !self.config.is_granted(Capability::Network) {
            return Err(SandboxError::PermissionDenied {
                capability: Capability::Network,
            });
        }

        let url = Url::parse(&request.url)?;
        let host = url.host_str().unwrap_or_default();
        if !self.config.is_domain_allowed(host) {
            tracing::warn!(host = %host, "fetch blocked by domain allow-list");
            return Err(SandboxError::DomainNotAllowed {
                host: host.to_owned(),
            });
        }

        self.bridge.http_request(request).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::bridge::{Notification, ShellOutput};

    use super::*;

    /// Bridge fake that counts how many requests actually got through.
    #[derive(Default)]
    struct CountingBridge {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl PlatformBridge for CountingBridge {
        async fn http_request(&self, _request: HttpRequest) -> Result<HttpResponse> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                headers: vec![],
                body: "ok".into(),
            })
        }

        async fn clipboard_read(&self) -> Result<String> {
            Ok(String::new())
        }

        async fn clipboard_write(&self, _text: String) -> Result<()> {
            Ok(())
        }

        async fn run_command(&self, _command: String, _args: Vec<String>) -> Result<ShellOutput> {
            Ok(ShellOutput {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn notify(&self, _notification: Notification) -> Result<()> {
            Ok(())
        }
    }

    fn config(granted: &[Capability], domains: &[&str]) -> SandboxConfig {
        SandboxConfig {
            granted: granted.iter().copied().collect(),
            allowed_domains: domains.iter().map(|d| (*d).to_owned()).collect(),
        }
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            url: url.into(),
            method: "GET".into(),
            headers: vec![],
            body: None,
        }
    }

    #[tokio::test]
    async fn fetch_without_network_grant_is_denied() {
        let bridge = Arc::new(CountingBridge::default());
        let fetch = SecureFetch::new(config(&[], &["example.com"]), bridge.clone());

        let result = fetch.fetch(get("https://example.com/")).await;
        assert!(matches!(
            result,
            Err(SandboxError::PermissionDenied {
                capability: Capability::Network
            })
        ));
        assert_eq!(bridge.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_with_empty_allow_list_is_denied() {
        // Network granted, but no domains allowed: still default-deny.
        let bridge = Arc::new(CountingBridge::default());
        let fetch = SecureFetch::new(config(&[Capability::Network], &[]), bridge.clone());

        let result = fetch.fetch(get("https://example.com/")).await;
        assert!(matches!(result, Err(SandboxError::DomainNotAllowed { .. })));
        assert_eq!(bridge.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_allowed_domain_reaches_bridge() {
        let bridge = Arc::new(CountingBridge::default());
        let fetch = SecureFetch::new(
            config(&[Capability::Network], &["api.example.com"]),
            bridge.clone(),
        );

        let response = fetch.fetch(get("https://api.example.com/v1")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(bridge.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_subdomain_of_allowed_domain() {
        let bridge = Arc::new(CountingBridge::default());
        let fetch = SecureFetch::new(
            config(&[Capability::Network], &["example.com"]),
            bridge.clone(),
        );

        assert!(fetch.fetch(get("https://cdn.example.com/x")).await.is_ok());
        assert!(matches!(
            fetch.fetch(get("https://notexample.com/")).await,
            Err(SandboxError::DomainNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_invalid_url_is_rejected() {
        let bridge = Arc::new(CountingBridge::default());
        let fetch = SecureFetch::new(
            config(&[Capability::Network], &["example.com"]),
            bridge.clone(),
        );

        let result = fetch.fetch(get("not a url")).await;
        assert!(matches!(result, Err(SandboxError::InvalidUrl(_))));
        assert_eq!(bridge.requests.load(Ordering::SeqCst), 0);
    }
}
