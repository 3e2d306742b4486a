//! Configuration data structures for the chatbridge gateway.
//!
//! This module defines the schema for the application settings, including
//! server parameters, upstream connection details, output rendering switches
//! and the per-turn streaming knobs.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port, route prefix).
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream conversation service settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Caller key and upstream account credentials.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Switches controlling how translated content is rendered.
    #[serde(default)]
    pub output: OutputConfig,

    /// Local artifact storage (downloaded images and sandbox files).
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-turn stream plumbing.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Image generation endpoint settings.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Models exposed to clients.
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8080`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional prefix all API routes are nested under (without slashes).
    /// Default: empty
    #[serde(default)]
    pub api_prefix: String,
}

/// Settings for the upstream conversation service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream service, without trailing slash.
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    /// Optional path prefix inserted between the base URL and `backend-api`.
    #[serde(default)]
    pub api_prefix: String,

    /// Total request timeout in seconds.
    /// Default: `600`
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Connect timeout in seconds.
    /// Default: `10`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Attempts made to open a conversation before giving up.
    /// Default: `3`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Credentials used to authorize callers and to talk to the upstream service.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// The key callers must present as `Authorization: Bearer <key>`.
    #[serde(default)]
    pub gateway_key: String,

    /// A static upstream access token. Takes precedence over account login.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Upstream account username used for token login.
    #[serde(default)]
    pub username: Option<String>,

    /// Upstream account password used for token login.
    #[serde(default)]
    pub password: Option<String>,

    /// Seconds before expiry at which a cached token is considered stale.
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: i64,
}

// Custom Debug impl that never logs secrets
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("gateway_key", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_buffer_seconds", &self.refresh_buffer_seconds)
            .finish()
    }
}

/// Rendering switches threaded into every translation component.
///
/// The value is immutable for the lifetime of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Render resolved images as a markdown image plus a download link.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub markdown_image_output: bool,

    /// Render resolved images as a bare `Image link: <url>` line instead.
    /// Default: `false`
    #[serde(default)]
    pub plain_image_url_output: bool,

    /// Replace citation markers with `[[n](url)]` links; drop them otherwise.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub bing_reference_output: bool,

    /// Emit code and execution-output blocks.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub code_block_output: bool,

    /// Hand out upstream-hosted download URLs instead of re-serving artifacts.
    /// Default: `false`
    #[serde(default)]
    pub use_hosted_image_urls: bool,

    /// Hide the upstream conversation once the turn has been answered.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub delete_turn_after_response: bool,
}

/// Where downloaded artifacts live and how they are addressed publicly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for downloaded images.
    /// Default: `./images`
    #[serde(default = "default_images_dir")]
    pub images_dir: String,

    /// Directory for downloaded sandbox files.
    /// Default: `./files`
    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    /// Public base URL this gateway is reachable at, used in rewritten links.
    /// Default: `http://127.0.0.1:8080`
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Per-turn channel and keep-alive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the bounded output channel.
    /// Default: `256`
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How often the keep-alive task checks for idleness.
    /// Default: `1000`
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_poll_ms: u64,

    /// Idle time after which an empty chunk is injected.
    /// Default: `1000`
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_idle_ms: u64,
}

/// Settings for `/v1/images/generations`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImagesConfig {
    /// Text prepended to every image prompt.
    #[serde(default)]
    pub prompt_prefix: String,
}

/// A client-facing model name and the upstream payload it maps to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Name clients send in `model`.
    pub name: String,

    /// Upstream model slug placed in the conversation payload.
    pub upstream_model: String,

    /// Custom assistant id; switches the payload to a gizmo interaction.
    #[serde(default)]
    pub gizmo_id: Option<String>,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask bearer tokens and other credentials in logs.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_tokens: bool,
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: String::new(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_prefix: String::new(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            markdown_image_output: true,
            plain_image_url_output: false,
            bing_reference_output: true,
            code_block_output: true,
            use_hosted_image_urls: false,
            delete_turn_after_response: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            files_dir: default_files_dir(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keepalive_poll_ms: default_keepalive_ms(),
            keepalive_idle_ms: default_keepalive_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_tokens: true,
        }
    }
}

impl UpstreamConfig {
    /// `{base_url}{/api_prefix}`, the root every `backend-api` path hangs off.
    pub fn root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_base_url() -> String {
    "http://127.0.0.1:8181".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_refresh_buffer() -> i64 {
    300 // 5 minutes
}

fn default_true() -> bool {
    true
}

fn default_images_dir() -> String {
    "./images".to_string()
}

fn default_files_dir() -> String {
    "./files".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

fn default_keepalive_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            name: "gpt-3.5-turbo".to_string(),
            upstream_model: "text-davinci-002-render-sha".to_string(),
            gizmo_id: None,
        },
        ModelEntry {
            name: "gpt-4-s".to_string(),
            upstream_model: "gpt-4".to_string(),
            gizmo_id: None,
        },
        ModelEntry {
            name: "gpt-4-mobile".to_string(),
            upstream_model: "gpt-4-mobile".to_string(),
            gizmo_id: None,
        },
    ]
}
