//! On-disk layout for comparison artifacts.
//!
//! ```text
//! <root>/<design>/<variation>/manifest.json
//! <root>/<design>/<variation>/convergence.json
//! <root>/<design>/<variation>/<preset>/{design.png, storybook.png, diff.png, report.json, vision-report.json}
//! ```
//!
//! Reruns for the same identity reuse the same paths.

use std::path::{Path, PathBuf};

/// Root of the artifact tree
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub root: PathBuf,
}

/// File paths for one preset of one comparison
#[derive(Debug, Clone)]
pub struct PresetArtifacts {
    pub dir: PathBuf,
    pub design: PathBuf,
    pub storybook: PathBuf,
    pub diff: PathBuf,
    pub report: PathBuf,
    pub vision_report: PathBuf,
}

impl PresetArtifacts {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            design: dir.join("design.png"),
            storybook: dir.join("storybook.png"),
            diff: dir.join("diff.png"),
            report: dir.join("report.json"),
            vision_report: dir.join("vision-report.json"),
            dir,
        }
    }
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding everything for a design/variation pair
    pub fn pair_dir(&self, design_slug: &str, variation_slug: &str) -> PathBuf {
        self.root
            .join(sanitize_name(design_slug))
            .join(sanitize_name(variation_slug))
    }

    /// Paths for one preset
    pub fn preset(&self, design_slug: &str, variation_slug: &str, preset_name: &str) -> PresetArtifacts {
        PresetArtifacts::in_dir(
            self.pair_dir(design_slug, variation_slug)
                .join(sanitize_name(preset_name)),
        )
    }

    pub fn manifest_path(&self, design_slug: &str, variation_slug: &str) -> PathBuf {
        self.pair_dir(design_slug, variation_slug).join("manifest.json")
    }

    pub fn convergence_path(&self, design_slug: &str, variation_slug: &str) -> PathBuf {
        self.pair_dir(design_slug, variation_slug).join("convergence.json")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Sanitize a name for use as a single path component
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    // Never let a component walk upwards
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
