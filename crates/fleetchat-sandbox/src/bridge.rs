//! Platform bridge interface.
//!
//! The bridge is the collaborator that actually performs native operations
//! (HTTP, clipboard, shell, notifications). The sandbox only decides whether
//! a call is permitted and then delegates; it never touches the OS itself.
//! Hosts implement this trait; tests use lightweight fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An outbound HTTP request a plugin wants to make.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Absolute URL. The secure fetch layer validates the host before the
    /// request ever reaches the bridge.
    pub url: String,
    /// HTTP method, defaults to GET.
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_owned()
}

/// Response returned by the bridge for a permitted HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// A desktop notification a plugin wants to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Output of a shell invocation performed by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Native operations the host exposes to capability-granted plugins.
///
/// Implementations must be safe for concurrent invocation from multiple
/// simultaneously-busy workers.
#[async_trait]
pub trait PlatformBridge: Send + Sync {
    /// Perform an HTTP request that already passed the domain check.
    async fn http_request(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Read the system clipboard.
    async fn clipboard_read(&self) -> Result<String>;

    /// Write the system clipboard.
    async fn clipboard_write(&self, text: String) -> Result<()>;

    /// Run a shell command.
    async fn run_command(&self, command: String, args: Vec<String>) -> Result<ShellOutput>;

    /// Show a desktop notification.
    async fn notify(&self, notification: Notification) -> Result<()>;
}
