//! Convergence tracking across design/implementation iterations.
//!
//! An [`IterationTracker`] owns one `convergence.json`. Each call to
//! [`IterationTracker::record`] appends an iteration, re-evaluates
//! convergence and rewrites the whole report to disk, so a later process can
//! pick up where this one stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::diff::DiffMetrics;
use crate::vision::VisionResult;

/// Diff percentage below which the pixel check passes
pub const CONVERGENCE_THRESHOLD: f64 = 1.0;

/// The part of [`DiffMetrics`] kept per iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelDiffSummary {
    pub diff_percentage: f64,
    #[serde(default)]
    pub diff_pixels: u64,
    #[serde(default)]
    pub total_pixels: u64,
}

impl PixelDiffSummary {
    /// Summary carrying only a percentage
    pub fn from_percentage(diff_percentage: f64) -> Self {
        Self {
            diff_percentage,
            diff_pixels: 0,
            total_pixels: 0,
        }
    }
}

impl From<&DiffMetrics> for PixelDiffSummary {
    fn from(metrics: &DiffMetrics) -> Self {
        Self {
            diff_percentage: metrics.diff_percentage,
            diff_pixels: metrics.diff_pixels,
            total_pixels: metrics.total_pixels,
        }
    }
}

/// One recorded iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// 1-indexed
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
    pub pixel_diff: PixelDiffSummary,
    pub vision_result: Option<VisionResult>,
}

/// Persisted convergence history for one (design, variation, story)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceReport {
    pub design_slug: String,
    pub variation_slug: String,
    pub story_id: String,
    pub iterations: Vec<IterationRecord>,
    pub converged: bool,
    pub total_iterations: usize,
    /// Diff percentage of the latest iteration, `None` before the first
    pub final_diff_percentage: Option<f64>,
    pub started_at: DateTime<Utc>,
    /// First time the report converged; kept even if a later iteration regresses
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConvergenceReport {
    /// Create an empty report
    pub fn new(design_slug: &str, variation_slug: &str, story_id: &str) -> Self {
        Self {
            design_slug: design_slug.to_string(),
            variation_slug: variation_slug.to_string(),
            story_id: story_id.to_string(),
            iterations: Vec::new(),
            converged: false,
            total_iterations: 0,
            final_diff_percentage: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Whether a single (pixel, vision) pair counts as converged
pub fn is_converged(pixel_diff: &PixelDiffSummary, vision: Option<&VisionResult>) -> bool {
    let pixel_pass = pixel_diff.diff_percentage < CONVERGENCE_THRESHOLD;
    let vision_pass = vision.is_none_or(|v| v.pass);
    pixel_pass && vision_pass
}

/// Append-only tracker bound to a report file
#[derive(Debug)]
pub struct IterationTracker {
    path: PathBuf,
    report: ConvergenceReport,
}

impl IterationTracker {
    /// Open the report at `path`, or start a new one.
    ///
    /// An existing report is resumed as-is: its slugs and story id are not
    /// compared with the arguments. An unreadable report is replaced by a
    /// fresh one on the next write.
    pub fn open(path: impl Into<PathBuf>, design_slug: &str, variation_slug: &str, story_id: &str) -> Self {
        let path = path.into();
        let report = match load_report(&path) {
            Some(report) => {
                info!(
                    iterations = report.total_iterations,
                    "resuming convergence report {}",
                    path.display()
                );
                report
            }
            None => ConvergenceReport::new(design_slug, variation_slug, story_id),
        };
        Self { path, report }
    }

    /// Append an iteration, re-evaluate convergence and persist.
    pub fn record(&mut self, pixel_diff: PixelDiffSummary, vision: Option<VisionResult>) -> &ConvergenceReport {
        let now = Utc::now();
        let converged = is_converged(&pixel_diff, vision.as_ref());

        let report = &mut self.report;
        report.iterations.push(IterationRecord {
            iteration: report.iterations.len() + 1,
            timestamp: now,
            pixel_diff: pixel_diff.clone(),
            vision_result: vision,
        });
        report.total_iterations = report.iterations.len();
        report.final_diff_percentage = Some(pixel_diff.diff_percentage);
        report.converged = converged;
        if converged && report.completed_at.is_none() {
            report.completed_at = Some(now);
        }

        info!(
            iteration = report.total_iterations,
            diff_percentage = pixel_diff.diff_percentage,
            converged,
            "recorded iteration"
        );

        if let Err(e) = self.persist() {
            warn!("failed to write {}: {}", self.path.display(), e);
        }
        &self.report
    }

    /// Current report
    pub fn report(&self) -> &ConvergenceReport {
        &self.report
    }

    /// Report file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.report)?;
        fs::write(&self.path, json)
    }
}

fn load_report(path: &Path) -> Option<ConvergenceReport> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("cannot read {}: {}, starting a new report", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!("corrupt convergence report {}: {}, starting a new report", path.display(), e);
            debug!(len = contents.len(), "discarded report contents");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{IssueCategory, Severity, VisionIssue};
    use pretty_assertions::assert_eq;

    fn verdict(pass: bool) -> VisionResult {
        VisionResult {
            pass,
            confidence: 0.9,
            issues: if pass {
                Vec::new()
            } else {
                vec![VisionIssue {
                    category: IssueCategory::Typography,
                    severity: Severity::Major,
                    description: "heading weight".to_string(),
                    region: None,
                }]
            },
            summary: if pass { "match" } else { "heading differs" }.to_string(),
        }
    }

    fn tracker_in(dir: &Path) -> IterationTracker {
        IterationTracker::open(dir.join("checkout/dark/convergence.json"), "checkout", "dark", "checkout--dark")
    }

    #[test]
    fn test_record_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());
        assert_eq!(tracker.report().total_iterations, 0);
        assert_eq!(tracker.report().final_diff_percentage, None);

        for (expected, pct) in [(1, 12.0), (2, 6.5), (3, 2.0)] {
            let report = tracker.record(PixelDiffSummary::from_percentage(pct), None);
            assert_eq!(report.iterations.len(), expected);
            assert_eq!(report.total_iterations, expected);
            assert_eq!(report.iterations[expected - 1].iteration, expected);
        }
    }

    #[test]
    fn test_convergence_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());
        assert!(tracker.record(PixelDiffSummary::from_percentage(0.5), None).converged);

        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());
        assert!(!tracker.record(PixelDiffSummary::from_percentage(0.5), Some(verdict(false))).converged);

        assert!(!is_converged(&PixelDiffSummary::from_percentage(1.0), None));
        assert!(is_converged(&PixelDiffSummary::from_percentage(0.99), Some(&verdict(true))));
    }

    #[test]
    fn test_converged_is_not_sticky_but_completed_at_is() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());

        let first = tracker.record(PixelDiffSummary::from_percentage(0.2), None).clone();
        assert!(first.converged);
        let completed = first.completed_at.expect("completed_at set on convergence");

        let second = tracker.record(PixelDiffSummary::from_percentage(4.0), None);
        assert!(!second.converged);
        assert_eq!(second.completed_at, Some(completed));
        assert_eq!(second.final_diff_percentage, Some(4.0));
    }

    #[test]
    fn test_convergence_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());

        let steps = [(35.2, false), (8.1, false), (0.8, false), (0.3, true)];
        for (index, (pct, pass)) in steps.into_iter().enumerate() {
            let report = tracker.record(PixelDiffSummary::from_percentage(pct), Some(verdict(pass)));
            assert_eq!(report.converged, index == 3, "iteration {}", index + 1);
            assert_eq!(report.completed_at.is_some(), index == 3);
        }

        let report = tracker.report();
        assert_eq!(report.total_iterations, 4);
        assert_eq!(report.final_diff_percentage, Some(0.3));
    }

    #[test]
    fn test_resume_preserves_prior_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = tracker_in(dir.path());
        first.record(
            PixelDiffSummary {
                diff_percentage: 12.345,
                diff_pixels: 1234,
                total_pixels: 10_000,
            },
            Some(verdict(false)),
        );
        let original = first.report().iterations[0].clone();
        let started_at = first.report().started_at;
        drop(first);

        let mut second = tracker_in(dir.path());
        let report = second.record(PixelDiffSummary::from_percentage(0.4), None);
        assert_eq!(report.total_iterations, 2);
        assert_eq!(report.iterations[0], original);
        assert_eq!(report.iterations[1].iteration, 2);
        assert_eq!(report.started_at, started_at);

        let on_disk: ConvergenceReport =
            serde_json::from_str(&fs::read_to_string(second.path()).unwrap()).unwrap();
        assert_eq!(&on_disk, second.report());
    }

    #[test]
    fn test_resume_does_not_check_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convergence.json");
        IterationTracker::open(&path, "a", "b", "c").record(PixelDiffSummary::from_percentage(3.0), None);

        let resumed = IterationTracker::open(&path, "x", "y", "z");
        assert_eq!(resumed.report().design_slug, "a");
        assert_eq!(resumed.report().total_iterations, 1);
    }

    #[test]
    fn test_corrupt_report_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convergence.json");
        fs::write(&path, "{ not json").unwrap();

        let mut tracker = IterationTracker::open(&path, "a", "b", "c");
        assert_eq!(tracker.report().total_iterations, 0);
        tracker.record(PixelDiffSummary::from_percentage(2.0), None);

        let on_disk: ConvergenceReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.total_iterations, 1);
    }

    #[test]
    fn test_report_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(dir.path());
        tracker.record(PixelDiffSummary::from_percentage(5.0), None);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tracker.path()).unwrap()).unwrap();
        for key in [
            "designSlug",
            "variationSlug",
            "storyId",
            "iterations",
            "converged",
            "totalIterations",
            "finalDiffPercentage",
            "startedAt",
            "completedAt",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json["completedAt"].is_null());
        assert!(json["iterations"][0]["visionResult"].is_null());
        assert_eq!(json["iterations"][0]["pixelDiff"]["diffPercentage"], 5.0);
    }
}
