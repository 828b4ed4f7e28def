//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for design-converge, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for a local design preview + Storybook setup
//! - Builder pattern for programmatic configuration (see [`crate::vision::VisionConfig`])
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DESIGN_CONVERGE_VISION_ENDPOINT` | Vision API endpoint URL | `https://api.anthropic.com/v1/messages` |
//! | `DESIGN_CONVERGE_VISION_MODEL` | Model name for vision review | `claude-sonnet-4-20250514` |
//! | `DESIGN_CONVERGE_VISION_MAX_TOKENS` | Maximum tokens in the verdict | `1024` |
//! | `DESIGN_CONVERGE_VISION_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `ANTHROPIC_API_KEY` | Credential for the vision API | unset |
//! | `DESIGN_CONVERGE_SCREENSHOT_DIR` | Root directory for artifacts | `screenshots` |
//! | `DESIGN_CONVERGE_DESIGN_PORT` | Design preview server port | `5173` |
//! | `DESIGN_CONVERGE_STORYBOOK_PORT` | Storybook server port | `6006` |
//! | `DESIGN_CONVERGE_SELECTOR_TIMEOUT` | Wait-for-selector timeout (ms) | `10000` |
//! | `DESIGN_CONVERGE_PRESETS` | Default viewport presets | `all` |
//!
//! # Example
//!
//! ```bash
//! # Point the vision client at a proxy
//! export DESIGN_CONVERGE_VISION_ENDPOINT="http://localhost:8787/v1/messages"
//!
//! # Keep artifacts out of the repo
//! export DESIGN_CONVERGE_SCREENSHOT_DIR="/var/tmp/design-converge"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default vision API endpoint
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Default vision model name
pub const DEFAULT_VISION_MODEL: &str = "claude-sonnet-4-20250514";

/// Default max tokens for the vision verdict
pub const DEFAULT_VISION_MAX_TOKENS: u32 = 1024;

/// Default vision connection timeout (seconds)
pub const DEFAULT_VISION_CONNECT_TIMEOUT: u64 = 10;

/// API version header sent with every Messages API request
pub const VISION_API_VERSION: &str = "2023-06-01";

/// Default artifact root
pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";

/// Default design preview server port
pub const DEFAULT_DESIGN_PORT: u16 = 5173;

/// Default Storybook server port
pub const DEFAULT_STORYBOOK_PORT: u16 = 6006;

/// Default bound on wait-for-selector (milliseconds)
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 10_000;

/// Default preset selection
pub const DEFAULT_PRESETS: &str = "all";

/// Design preview URL, `{port}`, `{design}` and `{variation}` are substituted
pub const DESIGN_URL_TEMPLATE: &str = "http://localhost:{port}/designs/{design}/{variation}";

/// Storybook iframe URL, `{port}` and `{story}` are substituted
pub const STORYBOOK_URL_TEMPLATE: &str = "http://localhost:{port}/iframe.html?id={story}&viewMode=story";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the vision endpoint
pub const ENV_VISION_ENDPOINT: &str = "DESIGN_CONVERGE_VISION_ENDPOINT";

/// Environment variable for the vision model
pub const ENV_VISION_MODEL: &str = "DESIGN_CONVERGE_VISION_MODEL";

/// Environment variable for vision max tokens
pub const ENV_VISION_MAX_TOKENS: &str = "DESIGN_CONVERGE_VISION_MAX_TOKENS";

/// Environment variable for the vision connection timeout
pub const ENV_VISION_CONNECT_TIMEOUT: &str = "DESIGN_CONVERGE_VISION_CONNECT_TIMEOUT";

/// Environment variable holding the vision API credential
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Environment variable for the artifact root
pub const ENV_SCREENSHOT_DIR: &str = "DESIGN_CONVERGE_SCREENSHOT_DIR";

/// Environment variable for the design preview port
pub const ENV_DESIGN_PORT: &str = "DESIGN_CONVERGE_DESIGN_PORT";

/// Environment variable for the Storybook port
pub const ENV_STORYBOOK_PORT: &str = "DESIGN_CONVERGE_STORYBOOK_PORT";

/// Environment variable for the selector timeout
pub const ENV_SELECTOR_TIMEOUT: &str = "DESIGN_CONVERGE_SELECTOR_TIMEOUT";

/// Environment variable for the default preset selection
pub const ENV_PRESETS: &str = "DESIGN_CONVERGE_PRESETS";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for design-converge
#[derive(Debug, Clone)]
pub struct Config {
    /// Vision API configuration
    pub vision: VisionSettings,
    /// Capture and artifact configuration
    pub capture: CaptureSettings,
}

/// Vision-related settings
#[derive(Debug, Clone)]
pub struct VisionSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// API key, if present in the environment
    pub api_key: Option<String>,
}

/// Capture-related settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Root directory for comparison artifacts
    pub screenshot_dir: String,
    /// Design preview server port
    pub design_port: u16,
    /// Storybook server port
    pub storybook_port: u16,
    /// Wait-for-selector bound (milliseconds)
    pub selector_timeout_ms: u64,
    /// Default preset selection string
    pub presets: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            vision: VisionSettings::from_env(),
            capture: CaptureSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            vision: VisionSettings::defaults(),
            capture: CaptureSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VisionSettings {
    /// Create vision settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_VISION_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_VISION_ENDPOINT.to_string()),
            model: env::var(ENV_VISION_MODEL).unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string()),
            max_tokens: parse_env(ENV_VISION_MAX_TOKENS).unwrap_or(DEFAULT_VISION_MAX_TOKENS),
            connect_timeout: parse_env(ENV_VISION_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_VISION_CONNECT_TIMEOUT),
            api_key: env::var(ENV_API_KEY).ok().filter(|key| !key.trim().is_empty()),
        }
    }

    /// Create vision settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens: DEFAULT_VISION_MAX_TOKENS,
            connect_timeout: DEFAULT_VISION_CONNECT_TIMEOUT,
            api_key: None,
        }
    }
}

impl CaptureSettings {
    /// Create capture settings from environment variables
    pub fn from_env() -> Self {
        Self {
            screenshot_dir: env::var(ENV_SCREENSHOT_DIR)
                .unwrap_or_else(|_| DEFAULT_SCREENSHOT_DIR.to_string()),
            design_port: parse_env(ENV_DESIGN_PORT).unwrap_or(DEFAULT_DESIGN_PORT),
            storybook_port: parse_env(ENV_STORYBOOK_PORT).unwrap_or(DEFAULT_STORYBOOK_PORT),
            selector_timeout_ms: parse_env(ENV_SELECTOR_TIMEOUT)
                .unwrap_or(DEFAULT_SELECTOR_TIMEOUT_MS),
            presets: env::var(ENV_PRESETS).unwrap_or_else(|_| DEFAULT_PRESETS.to_string()),
        }
    }

    /// Create capture settings with defaults
    pub fn defaults() -> Self {
        Self {
            screenshot_dir: DEFAULT_SCREENSHOT_DIR.to_string(),
            design_port: DEFAULT_DESIGN_PORT,
            storybook_port: DEFAULT_STORYBOOK_PORT,
            selector_timeout_ms: DEFAULT_SELECTOR_TIMEOUT_MS,
            presets: DEFAULT_PRESETS.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Build the design preview URL for a design/variation pair
pub fn design_url(port: u16, design_slug: &str, variation_slug: &str) -> String {
    DESIGN_URL_TEMPLATE
        .replace("{port}", &port.to_string())
        .replace("{design}", design_slug)
        .replace("{variation}", variation_slug)
}

/// Build the Storybook iframe URL for a story
pub fn storybook_url(port: u16, story_id: &str) -> String {
    STORYBOOK_URL_TEMPLATE
        .replace("{port}", &port.to_string())
        .replace("{story}", story_id)
}

/// Get the artifact root directory (convenience function)
pub fn screenshot_dir() -> String {
    get().capture.screenshot_dir.clone()
}
