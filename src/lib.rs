//! Design Converge - visual regression between design mockups and Storybook stories.
//!
//! This crate provides:
//! - Headless browser capture of a design page and a story at fixed viewports
//! - Pixel diffing with a per-region grid and per-channel divergence
//! - An optional vision-model review of each screenshot pair
//! - Iteration tracking until the implementation converges on the design
//! - Preflight validation of a project's comparison config
//!
//! # Example
//!
//! ```rust,no_run
//! use design_converge::capture::{ChromeRenderer, ChromeSettings};
//! use design_converge::layout::ArtifactLayout;
//! use design_converge::orchestrator::{ComparisonJob, run_comparison};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let job = ComparisonJob::new(
//!     "checkout",
//!     "dark",
//!     "checkout--dark",
//!     "http://localhost:5173/designs/checkout/dark",
//!     "http://localhost:6006/iframe.html?id=checkout--dark&viewMode=story",
//! );
//! let mut renderer = ChromeRenderer::new(ChromeSettings::default());
//! let run = run_comparison(&mut renderer, &ArtifactLayout::new("screenshots"), &job).await?;
//! for preset in &run.presets {
//!     println!("{}: {:.2}%", preset.preset.name, preset.report.metrics.diff_percentage);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod diff;
pub mod layout;
pub mod orchestrator;
pub mod report;
pub mod tracker;
pub mod validate;
pub mod vision;

// Re-export capture types and renderers
pub use capture::{
    CaptureError, CaptureOptions, CaptureResult, ChromeRenderer, ChromeSettings, MockRenderer,
    PageRenderer, ViewportPreset,
};

// Re-export the diff engine
pub use diff::{DiffError, DiffMetrics, DiffOptions, DiffResult, compare_images, compare_rgba};

// Re-export orchestration
pub use layout::ArtifactLayout;
pub use orchestrator::{ComparisonJob, ComparisonRun, OrchestratorError, OrchestratorResult, run_comparison};

// Re-export tracking and validation
pub use tracker::{CONVERGENCE_THRESHOLD, ConvergenceReport, IterationTracker, is_converged};
pub use validate::{ProjectConfig, ValidationReport, load_project_config, validate_config};

// Re-export vision client
pub use vision::{VisionConfig, VisionResult, build_rubric_prompt, check_health, compare_with_vision};
