//! Preflight checks for a project's comparison wiring.
//!
//! [`validate_config`] never fails: every check appends exactly one
//! [`CheckResult`] and the caller decides what to do with the error count.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capture::ViewportPreset;
use crate::config;
use crate::report::{ReportResult, read_json};

/// Project settings checked before a run, loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Design mockup sources served by the preview server
    pub design_dir: PathBuf,
    /// Storybook configuration directory
    pub storybook_dir: PathBuf,
    /// Artifact root, created on demand
    pub screenshot_dir: PathBuf,
    /// Story files; each pattern must match at least one file
    pub story_globs: Vec<String>,
    /// Component sources; an empty match is only a warning
    pub component_globs: Vec<String>,
    pub design_server_port: u16,
    pub storybook_port: u16,
    pub presets: Vec<ViewportPreset>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            design_dir: PathBuf::from("designs"),
            storybook_dir: PathBuf::from(".storybook"),
            screenshot_dir: PathBuf::from(config::DEFAULT_SCREENSHOT_DIR),
            story_globs: vec!["src/**/*.stories.tsx".to_string()],
            component_globs: Vec::new(),
            design_server_port: config::DEFAULT_DESIGN_PORT,
            storybook_port: config::DEFAULT_STORYBOOK_PORT,
            presets: ViewportPreset::all_presets(),
        }
    }
}

/// Load a project config file
pub fn load_project_config(path: &Path) -> ReportResult<ProjectConfig> {
    read_json(path)
}

/// How much a failed check matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Error,
    Warning,
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub label: String,
    pub ok: bool,
    pub level: CheckLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// All check outcomes plus failure counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<CheckResult>,
}

impl ValidationReport {
    fn check(&mut self, label: impl Into<String>, ok: bool, level: CheckLevel, detail: Option<String>) {
        if !ok {
            match level {
                CheckLevel::Error => self.errors += 1,
                CheckLevel::Warning => self.warnings += 1,
            }
        }
        self.results.push(CheckResult {
            label: label.into(),
            ok,
            level,
            detail,
        });
    }

    /// Whether any error-level check failed
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

/// Run every check against `config`, resolving relative paths under `repo_root`.
pub fn validate_config(config: &ProjectConfig, repo_root: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, dir) in [("designDir", &config.design_dir), ("storybookDir", &config.storybook_dir)] {
        let path = repo_root.join(dir);
        report.check(
            format!("{} exists ({})", name, dir.display()),
            path.is_dir(),
            CheckLevel::Error,
            (!path.is_dir()).then(|| format!("{} is not a directory", path.display())),
        );
    }

    let screenshots = repo_root.join(&config.screenshot_dir);
    report.check(
        format!("screenshotDir exists ({})", config.screenshot_dir.display()),
        screenshots.is_dir(),
        CheckLevel::Warning,
        (!screenshots.is_dir()).then(|| "will be created on first run".to_string()),
    );

    for pattern in &config.story_globs {
        let (ok, detail) = glob_matches(repo_root, pattern);
        report.check(format!("story glob matches ({})", pattern), ok, CheckLevel::Error, detail);
    }
    for pattern in &config.component_globs {
        let (ok, detail) = glob_matches(repo_root, pattern);
        report.check(format!("component glob matches ({})", pattern), ok, CheckLevel::Warning, detail);
    }

    report.check(
        "at least one preset",
        !config.presets.is_empty(),
        CheckLevel::Error,
        None,
    );
    for preset in &config.presets {
        let ok = preset.width > 0 && preset.height > 0;
        report.check(
            format!("preset '{}' dimensions > 0", preset.name),
            ok,
            CheckLevel::Error,
            (!ok).then(|| format!("got {}x{}", preset.width, preset.height)),
        );
    }

    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = config
        .presets
        .iter()
        .filter(|p| !seen.insert(p.name.as_str()))
        .map(|p| p.name.as_str())
        .collect();
    report.check(
        "preset names are unique",
        duplicates.is_empty(),
        CheckLevel::Error,
        (!duplicates.is_empty()).then(|| format!("duplicated: {}", duplicates.join(", "))),
    );

    for (name, port) in [
        ("designServerPort", config.design_server_port),
        ("storybookPort", config.storybook_port),
    ] {
        report.check(format!("{} is set", name), port != 0, CheckLevel::Error, None);
    }
    report.check(
        "design and storybook ports differ",
        config.design_server_port != config.storybook_port,
        CheckLevel::Warning,
        None,
    );

    debug!(errors = report.errors, warnings = report.warnings, "config validated");
    report
}

fn glob_matches(repo_root: &Path, pattern: &str) -> (bool, Option<String>) {
    // Only `pattern` carries wildcards; the root is matched literally
    let root = glob::Pattern::escape(&repo_root.to_string_lossy());
    let full_pattern = Path::new(&root).join(pattern);
    match glob::glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => {
            let count = paths.filter_map(Result::ok).filter(|p| p.is_file()).count();
            (count > 0, (count == 0).then(|| "no files matched".to_string()))
        }
        Err(e) => (false, Some(format!("invalid pattern: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn project() -> (tempfile::TempDir, ProjectConfig) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("designs/checkout")).unwrap();
        fs::create_dir_all(dir.path().join(".storybook")).unwrap();
        fs::create_dir_all(dir.path().join("screenshots")).unwrap();
        fs::create_dir_all(dir.path().join("src/components")).unwrap();
        fs::write(dir.path().join("src/components/Button.stories.tsx"), "export {}").unwrap();
        fs::write(dir.path().join("src/components/Button.tsx"), "export {}").unwrap();

        let config = ProjectConfig {
            component_globs: vec!["src/components/*.tsx".to_string()],
            presets: vec![ViewportPreset::new("mobile", 375, 812), ViewportPreset::new("desktop", 1440, 900)],
            ..ProjectConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn test_valid_project() {
        let (dir, config) = project();
        let report = validate_config(&config, dir.path());
        assert_eq!(report.errors, 0, "{:#?}", report.results);
        assert_eq!(report.warnings, 0);
        assert!(report.results.iter().all(|r| r.ok));
        // 2 dirs + screenshots + 1 story glob + 1 component glob + non-empty
        // + 2 presets + unique + 2 ports + distinct
        assert_eq!(report.results.len(), 12);
    }

    #[test]
    fn test_missing_paths_and_globs() {
        let (dir, mut config) = project();
        config.design_dir = PathBuf::from("nope");
        config.screenshot_dir = PathBuf::from("out/shots");
        config.story_globs.push("stories/**/*.mdx".to_string());
        config.component_globs = vec!["lib/*.vue".to_string()];

        let report = validate_config(&config, dir.path());
        assert_eq!(report.errors, 2);
        assert_eq!(report.warnings, 2);
        assert_eq!(report.results.len(), 13);

        let failed: Vec<&str> = report.results.iter().filter(|r| !r.ok).map(|r| r.label.as_str()).collect();
        assert_eq!(
            failed,
            vec![
                "designDir exists (nope)",
                "screenshotDir exists (out/shots)",
                "story glob matches (stories/**/*.mdx)",
                "component glob matches (lib/*.vue)",
            ]
        );
    }

    #[test]
    fn test_preset_checks() {
        let (dir, mut config) = project();
        config.presets = vec![
            ViewportPreset::new("mobile", 0, 812),
            ViewportPreset::new("mobile", 375, 812),
        ];
        let report = validate_config(&config, dir.path());
        assert_eq!(report.errors, 2);
        let dims = report.results.iter().find(|r| r.label == "preset 'mobile' dimensions > 0").unwrap();
        assert_eq!(dims.detail.as_deref(), Some("got 0x812"));

        config.presets.clear();
        let report = validate_config(&config, dir.path());
        assert_eq!(report.errors, 1);
        assert!(!report.results.iter().find(|r| r.label == "at least one preset").unwrap().ok);
    }

    #[test]
    fn test_port_checks() {
        let (dir, mut config) = project();
        config.design_server_port = 6006;
        config.storybook_port = 6006;
        let report = validate_config(&config, dir.path());
        assert_eq!((report.errors, report.warnings), (0, 1));

        config.design_server_port = 0;
        let report = validate_config(&config, dir.path());
        assert_eq!((report.errors, report.warnings), (1, 0));

        config.storybook_port = 0;
        let report = validate_config(&config, dir.path());
        assert_eq!((report.errors, report.warnings), (2, 1));
    }

    #[test]
    fn test_invalid_glob_is_reported_not_raised() {
        let (dir, mut config) = project();
        config.story_globs = vec!["src/[".to_string()];
        let report = validate_config(&config, dir.path());
        assert_eq!(report.errors, 1);
        let result = report.results.iter().find(|r| r.label.starts_with("story glob")).unwrap();
        assert!(result.detail.as_deref().unwrap().starts_with("invalid pattern"));
    }

    #[test]
    fn test_globs_resolve_under_root_with_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app[1]?");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/Card.stories.tsx"), "export {}").unwrap();

        let config = ProjectConfig {
            story_globs: vec!["src/*.stories.tsx".to_string()],
            ..ProjectConfig::default()
        };
        let report = validate_config(&config, &root);
        let story = report.results.iter().find(|r| r.label.starts_with("story glob")).unwrap();
        assert!(story.ok, "{:?}", story.detail);
    }

    #[test]
    fn test_load_project_config_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design-converge.json");
        fs::write(&path, r#"{"designDir": "mockups", "presets": [{"name": "mobile", "width": 375, "height": 812}]}"#).unwrap();

        let config = load_project_config(&path).unwrap();
        assert_eq!(config.design_dir, PathBuf::from("mockups"));
        assert_eq!(config.storybook_port, 6006);
        assert_eq!(config.presets.len(), 1);
    }
}
