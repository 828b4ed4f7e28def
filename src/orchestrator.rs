//! Comparison orchestrator: capture → diff → (vision) → tracker, per preset.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::{CaptureError, CaptureOptions, PageRenderer, ViewportPreset};
use crate::diff::{DiffError, DiffOptions, compare_images};
use crate::layout::{ArtifactLayout, PresetArtifacts};
use crate::report::{ComparisonManifest, ComparisonReport, PresetResult, ReportError, write_json};
use crate::tracker::{ConvergenceReport, IterationTracker, PixelDiffSummary};
use crate::vision::{VisionConfig, VisionResult, compare_with_vision};

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Fatal errors that abort a comparison run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no viewport presets selected")]
    NoPresets,

    #[error("capture failed for preset '{preset}': {source}")]
    Capture {
        preset: String,
        #[source]
        source: CaptureError,
    },

    #[error("diff failed for preset '{preset}': {source}")]
    Diff {
        preset: String,
        #[source]
        source: DiffError,
    },

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Everything needed to compare one design variation with one story
#[derive(Debug, Clone)]
pub struct ComparisonJob {
    pub design_slug: String,
    pub variation_slug: String,
    pub story_id: String,
    /// Page serving the design mockup
    pub design_url: String,
    /// Page serving the implementation (Storybook iframe)
    pub storybook_url: String,
    pub presets: Vec<ViewportPreset>,
    /// Selector awaited on both pages before capture
    pub wait_for_selector: Option<String>,
    /// Settle delay applied on both pages
    pub delay: Option<Duration>,
    pub diff_options: DiffOptions,
    /// Vision review is skipped when `None`
    pub vision: Option<VisionConfig>,
    /// Record an iteration in `convergence.json`
    pub track: bool,
}

impl ComparisonJob {
    pub fn new(
        design_slug: impl Into<String>,
        variation_slug: impl Into<String>,
        story_id: impl Into<String>,
        design_url: impl Into<String>,
        storybook_url: impl Into<String>,
    ) -> Self {
        Self {
            design_slug: design_slug.into(),
            variation_slug: variation_slug.into(),
            story_id: story_id.into(),
            design_url: design_url.into(),
            storybook_url: storybook_url.into(),
            presets: ViewportPreset::all_presets(),
            wait_for_selector: None,
            delay: None,
            diff_options: DiffOptions::default(),
            vision: None,
            track: true,
        }
    }

    pub fn presets(mut self, presets: Vec<ViewportPreset>) -> Self {
        self.presets = presets;
        self
    }

    pub fn wait_for(mut self, selector: Option<String>) -> Self {
        self.wait_for_selector = selector;
        self
    }

    pub fn delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }

    pub fn diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    pub fn vision(mut self, vision: Option<VisionConfig>) -> Self {
        self.vision = vision;
        self
    }

    pub fn track(mut self, track: bool) -> Self {
        self.track = track;
        self
    }
}

/// Result of one preset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetOutcome {
    pub preset: ViewportPreset,
    pub report: ComparisonReport,
    pub vision: Option<VisionResult>,
}

/// Result of a complete comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRun {
    pub presets: Vec<PresetOutcome>,
    pub manifest: ComparisonManifest,
    /// Convergence report after this run's iteration, if tracking
    pub convergence: Option<ConvergenceReport>,
}

/// Run every preset of `job` in order.
///
/// The first failing preset aborts the run. The renderer is released before
/// this function returns, on success and on failure.
#[tracing::instrument(skip_all, fields(design = %job.design_slug, variation = %job.variation_slug, story = %job.story_id))]
pub async fn run_comparison(
    renderer: &mut dyn PageRenderer,
    layout: &ArtifactLayout,
    job: &ComparisonJob,
) -> OrchestratorResult<ComparisonRun> {
    let outcomes = run_presets(renderer, layout, job).await;
    renderer.release().await;
    let outcomes = outcomes?;

    let manifest = ComparisonManifest {
        design_slug: job.design_slug.clone(),
        variation_slug: job.variation_slug.clone(),
        story_id: job.story_id.clone(),
        presets: job
            .presets
            .iter()
            .map(|preset| {
                let artifacts = layout.preset(&job.design_slug, &job.variation_slug, &preset.name);
                PresetResult::inspect(preset, &artifacts)
            })
            .collect(),
        captured_at: Utc::now(),
    };
    let manifest_path = layout.manifest_path(&job.design_slug, &job.variation_slug);
    write_json(&manifest_path, &manifest)?;
    info!("manifest written to {}", manifest_path.display());

    let convergence = if job.track {
        Some(track_iteration(layout, job, &outcomes))
    } else {
        None
    };

    Ok(ComparisonRun {
        presets: outcomes,
        manifest,
        convergence,
    })
}

async fn run_presets(
    renderer: &mut dyn PageRenderer,
    layout: &ArtifactLayout,
    job: &ComparisonJob,
) -> OrchestratorResult<Vec<PresetOutcome>> {
    if job.presets.is_empty() {
        return Err(OrchestratorError::NoPresets);
    }

    let mut outcomes = Vec::with_capacity(job.presets.len());
    for preset in &job.presets {
        let artifacts = layout.preset(&job.design_slug, &job.variation_slug, &preset.name);
        outcomes.push(run_preset(renderer, job, preset, &artifacts).await?);
    }
    Ok(outcomes)
}

async fn run_preset(
    renderer: &mut dyn PageRenderer,
    job: &ComparisonJob,
    preset: &ViewportPreset,
    artifacts: &PresetArtifacts,
) -> OrchestratorResult<PresetOutcome> {
    let capture_error = |source| OrchestratorError::Capture {
        preset: preset.name.clone(),
        source,
    };

    info!(preset = %preset.name, width = preset.width, height = preset.height, "capturing design");
    let design = CaptureOptions::new(&job.design_url, &artifacts.design, preset.width, preset.height)
        .wait_for(job.wait_for_selector.clone())
        .delay(job.delay);
    renderer.capture(&design).await.map_err(capture_error)?;

    info!(preset = %preset.name, "capturing implementation");
    let storybook = CaptureOptions::new(&job.storybook_url, &artifacts.storybook, preset.width, preset.height)
        .wait_for(job.wait_for_selector.clone())
        .delay(job.delay);
    renderer.capture(&storybook).await.map_err(capture_error)?;

    let (a, b, out, options) = (
        artifacts.design.clone(),
        artifacts.storybook.clone(),
        artifacts.diff.clone(),
        job.diff_options,
    );
    let metrics = tokio::task::spawn_blocking(move || compare_images(&a, &b, &out, &options))
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))?
        .map_err(|source| OrchestratorError::Diff {
            preset: preset.name.clone(),
            source,
        })?;
    info!(
        preset = %preset.name,
        diff_percentage = metrics.diff_percentage,
        "pixel diff"
    );

    let report = ComparisonReport {
        design_slug: job.design_slug.clone(),
        variation_slug: job.variation_slug.clone(),
        preset: preset.name.clone(),
        timestamp: Utc::now(),
        metrics,
    };
    write_json(&artifacts.report, &report)?;

    let vision = match &job.vision {
        Some(config) => {
            let result = compare_with_vision(&artifacts.design, &artifacts.storybook, config).await;
            if let Err(e) = write_json(&artifacts.vision_report, &result) {
                warn!("could not write vision report: {}", e);
            }
            Some(result)
        }
        None => None,
    };

    Ok(PresetOutcome {
        preset: preset.clone(),
        report,
        vision,
    })
}

/// Record the worst preset of this run as one iteration
fn track_iteration(layout: &ArtifactLayout, job: &ComparisonJob, outcomes: &[PresetOutcome]) -> ConvergenceReport {
    let mut tracker = IterationTracker::open(
        layout.convergence_path(&job.design_slug, &job.variation_slug),
        &job.design_slug,
        &job.variation_slug,
        &job.story_id,
    );

    let worst = outcomes.iter().max_by(|a, b| {
        a.report
            .metrics
            .diff_percentage
            .total_cmp(&b.report.metrics.diff_percentage)
    });
    match worst {
        Some(outcome) => tracker
            .record(PixelDiffSummary::from(&outcome.report.metrics), outcome.vision.clone())
            .clone(),
        None => tracker.report().clone(),
    }
}
