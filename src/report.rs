//! Per-preset reports and the per-comparison manifest.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::capture::ViewportPreset;
use crate::diff::DiffMetrics;
use crate::layout::PresetArtifacts;

/// Result type for report I/O
pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `report.json`: diff metrics for one preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub design_slug: String,
    pub variation_slug: String,
    pub preset: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: DiffMetrics,
}

/// Artifact presence for one preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetResult {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub has_design: bool,
    pub has_storybook: bool,
    pub has_diff: bool,
    pub has_report: bool,
}

impl PresetResult {
    /// Inspect the preset directory
    pub fn inspect(preset: &ViewportPreset, artifacts: &PresetArtifacts) -> Self {
        Self {
            name: preset.name.clone(),
            width: preset.width,
            height: preset.height,
            has_design: artifacts.design.is_file(),
            has_storybook: artifacts.storybook.is_file(),
            has_diff: artifacts.diff.is_file(),
            has_report: artifacts.report.is_file(),
        }
    }
}

/// `manifest.json`: one per design/variation, rewritten each run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonManifest {
    pub design_slug: String,
    pub variation_slug: String,
    pub story_id: String,
    pub presets: Vec<PresetResult>,
    pub captured_at: DateTime<Utc>,
}

/// Write `value` as pretty JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ReportResult<()> {
    let io_error = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_error)
}

/// Read a JSON document written by [`write_json`]
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ReportResult<T> {
    let contents = fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChannelDivergence, GridCell};
    use crate::layout::ArtifactLayout;
    use pretty_assertions::assert_eq;

    fn sample_metrics() -> DiffMetrics {
        DiffMetrics {
            total_pixels: 4,
            diff_pixels: 1,
            diff_percentage: 25.0,
            grid: vec![GridCell {
                row: 0,
                col: 0,
                total_pixels: 4,
                diff_pixels: 1,
                diff_percentage: 25.0,
            }],
            channels: ChannelDivergence { r: 1.0, g: 0.0, b: 2.5 },
        }
    }

    #[test]
    fn test_report_json_shape_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/report.json");
        let report = ComparisonReport {
            design_slug: "checkout".to_string(),
            variation_slug: "dark".to_string(),
            preset: "mobile".to_string(),
            timestamp: Utc::now(),
            metrics: sample_metrics(),
        };
        write_json(&path, &report).unwrap();

        let json: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(json["designSlug"], "checkout");
        assert_eq!(json["preset"], "mobile");
        assert_eq!(json["metrics"]["diffPixels"], 1);
        assert_eq!(json["metrics"]["grid"][0]["totalPixels"], 4);
        assert_eq!(json["metrics"]["channels"]["b"], 2.5);

        let back: ComparisonReport = read_json(&path).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_preset_result_reflects_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactLayout::new(dir.path()).preset("d", "v", "mobile");
        fs::create_dir_all(&artifacts.dir).unwrap();
        fs::write(&artifacts.design, b"png").unwrap();
        fs::write(&artifacts.report, b"{}").unwrap();

        let result = PresetResult::inspect(&ViewportPreset::new("mobile", 375, 812), &artifacts);
        assert_eq!(
            result,
            PresetResult {
                name: "mobile".to_string(),
                width: 375,
                height: 812,
                has_design: true,
                has_storybook: false,
                has_diff: false,
                has_report: true,
            }
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["hasStorybook"], false);
    }

    #[test]
    fn test_read_json_errors_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{").unwrap();
        let err = read_json::<ComparisonManifest>(&path).unwrap_err();
        assert!(matches!(err, ReportError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
