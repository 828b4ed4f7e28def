// Core types for page capture

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Options for a single page capture
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Page to render
    pub url: String,

    /// Where the PNG is written (parent directories are created)
    pub output_path: PathBuf,

    /// Viewport width in CSS pixels
    pub width: u32,

    /// Viewport height in CSS pixels
    pub height: u32,

    /// CSS selector that must appear before the screenshot is taken
    pub wait_for_selector: Option<String>,

    /// Fixed settle delay applied after navigation and selector wait
    pub delay: Option<Duration>,
}

impl CaptureOptions {
    /// Create capture options for a URL at a viewport size
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            width,
            height,
            wait_for_selector: None,
            delay: None,
        }
    }

    /// Wait for a CSS selector before capturing
    pub fn wait_for(mut self, selector: Option<String>) -> Self {
        self.wait_for_selector = selector;
        self
    }

    /// Sleep for a fixed duration before capturing
    pub fn delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }
}

/// A named viewport used to render both sides of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportPreset {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl ViewportPreset {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
        }
    }

    /// Parse from string (e.g., "mobile", "desktop", "1280x720")
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mobile" | "phone" => Some(Self::new("mobile", 375, 812)),
            "tablet" => Some(Self::new("tablet", 768, 1024)),
            "desktop" | "default" => Some(Self::new("desktop", 1440, 900)),
            "wide" | "fullhd" => Some(Self::new("wide", 1920, 1080)),
            custom => {
                // Try parsing as WxH format
                let parts: Vec<&str> = custom.split('x').collect();
                if parts.len() == 2 {
                    let width = parts[0].parse().ok()?;
                    let height = parts[1].parse().ok()?;
                    Some(Self::new(custom, width, height))
                } else {
                    None
                }
            }
        }
    }

    /// Get all built-in presets
    pub fn all_presets() -> Vec<ViewportPreset> {
        vec![
            Self::new("mobile", 375, 812),
            Self::new("tablet", 768, 1024),
            Self::new("desktop", 1440, 900),
            Self::new("wide", 1920, 1080),
        ]
    }

    /// Parse a comma-separated selection, `all` expands to every built-in preset
    pub fn parse_list(selection: &str) -> CaptureResult<Vec<ViewportPreset>> {
        if selection.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all_presets());
        }

        let mut presets: Vec<ViewportPreset> = Vec::new();
        for part in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let preset = Self::from_str(part)
                .ok_or_else(|| CaptureError::InvalidPreset(part.to_string()))?;
            if !presets.iter().any(|p| p.name == preset.name) {
                presets.push(preset);
            }
        }

        if presets.is_empty() {
            return Err(CaptureError::InvalidPreset(selection.to_string()));
        }
        Ok(presets)
    }
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Error types for capture operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Browser could not be launched or driven
    #[error("browser error: {0}")]
    Browser(String),

    /// Navigation failed or timed out
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Selector never appeared within the bound
    #[error("selector '{selector}' not found on {url} within {timeout:?}")]
    SelectorTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },

    /// Unknown preset name or malformed WxH
    #[error("invalid viewport preset '{0}' (use mobile, tablet, desktop, wide, all or WxH)")]
    InvalidPreset(String),

    /// Output could not be written
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_from_str_builtin() {
        assert_eq!(ViewportPreset::from_str("mobile"), Some(ViewportPreset::new("mobile", 375, 812)));
        assert_eq!(ViewportPreset::from_str("Desktop"), Some(ViewportPreset::new("desktop", 1440, 900)));
    }

    #[test]
    fn test_preset_from_str_custom() {
        assert_eq!(
            ViewportPreset::from_str("1280x720"),
            Some(ViewportPreset::new("1280x720", 1280, 720))
        );
        assert_eq!(ViewportPreset::from_str("huge"), None);
        assert_eq!(ViewportPreset::from_str("100"), None);
    }

    #[test]
    fn test_parse_list() {
        let presets = ViewportPreset::parse_list("mobile, desktop,mobile").unwrap();
        let names: Vec<&str> = presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mobile", "desktop"]);

        assert_eq!(ViewportPreset::parse_list("all").unwrap().len(), 4);
        assert!(matches!(
            ViewportPreset::parse_list("mobile,nope"),
            Err(CaptureError::InvalidPreset(name)) if name == "nope"
        ));
        assert!(ViewportPreset::parse_list(" , ").is_err());
    }
}
