use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use design_converge::capture::{ChromeRenderer, ChromeSettings, ViewportPreset};
use design_converge::config;
use design_converge::diff::{DiffOptions, compare_images};
use design_converge::layout::ArtifactLayout;
use design_converge::orchestrator::{ComparisonJob, ComparisonRun, run_comparison};
use design_converge::report::read_json;
use design_converge::tracker::{CONVERGENCE_THRESHOLD, ConvergenceReport};
use design_converge::validate::{ProjectConfig, ValidationReport, load_project_config, validate_config};
use design_converge::vision::{VisionConfig, check_health, compare_with_vision};

/// Design Converge - compare design mockups with their Storybook implementation
#[derive(Parser, Debug)]
#[command(
    name = "design-converge",
    about = "Visual regression between design mockups and Storybook stories, tracked until they converge",
    after_help = "ENVIRONMENT VARIABLES:\n\
        ANTHROPIC_API_KEY                      Vision API credential\n\
        DESIGN_CONVERGE_VISION_ENDPOINT        Vision API endpoint URL\n\
        DESIGN_CONVERGE_VISION_MODEL           Vision model name\n\
        DESIGN_CONVERGE_SCREENSHOT_DIR         Root directory for artifacts\n\
        DESIGN_CONVERGE_DESIGN_PORT            Design preview server port\n\
        DESIGN_CONVERGE_STORYBOOK_PORT         Storybook port\n\
        DESIGN_CONVERGE_SELECTOR_TIMEOUT       Wait-for-selector bound (ms)\n\
        DESIGN_CONVERGE_PRESETS                Default preset selection\n\
        RUST_LOG                               Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture, diff and optionally review a design variation against a story
    Compare {
        /// Design slug
        #[arg(long)]
        design: String,

        /// Variation slug
        #[arg(long)]
        variation: String,

        /// Storybook story id
        #[arg(long)]
        story: String,

        /// Presets: mobile, tablet, desktop, wide, WxH, or "all" (comma-separated)
        #[arg(long, env = "DESIGN_CONVERGE_PRESETS")]
        presets: Option<String>,

        /// Design preview server port
        #[arg(long, env = "DESIGN_CONVERGE_DESIGN_PORT")]
        design_port: Option<u16>,

        /// Storybook port
        #[arg(long, env = "DESIGN_CONVERGE_STORYBOOK_PORT")]
        storybook_port: Option<u16>,

        /// Root directory for artifacts
        #[arg(long, env = "DESIGN_CONVERGE_SCREENSHOT_DIR")]
        screenshot_dir: Option<PathBuf>,

        /// CSS selector to await on both pages before capture
        #[arg(long)]
        wait_for: Option<String>,

        /// Extra settle delay in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        /// Review each pair with the vision model
        #[arg(long)]
        vision: bool,

        /// Vision model name
        #[arg(long, env = "DESIGN_CONVERGE_VISION_MODEL")]
        vision_model: Option<String>,

        /// Do not record an iteration in convergence.json
        #[arg(long)]
        no_track: bool,

        /// Project config to validate and take defaults from
        #[arg(long)]
        project: Option<PathBuf>,

        /// Diff grid as RxC
        #[arg(long, default_value = "3x3")]
        grid: String,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pixel-diff two PNG files
    Diff {
        /// First image (design)
        a: PathBuf,

        /// Second image (implementation)
        b: PathBuf,

        /// Where to write the diff raster
        #[arg(short, long)]
        output: PathBuf,

        /// Diff grid as RxC
        #[arg(long, default_value = "3x3")]
        grid: String,

        /// Per-pixel color tolerance, 0 to 1
        #[arg(long, default_value_t = design_converge::diff::DEFAULT_THRESHOLD)]
        threshold: f64,
    },

    /// Ask the vision model to compare two screenshots
    Vision {
        /// Design screenshot
        design: PathBuf,

        /// Implementation screenshot
        implementation: PathBuf,

        /// Vision model name
        #[arg(long, env = "DESIGN_CONVERGE_VISION_MODEL")]
        model: Option<String>,
    },

    /// Check a project config before running comparisons
    Validate {
        /// Project config file (JSON)
        config: PathBuf,

        /// Directory that relative paths resolve against (default: the config's directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the convergence report for a design variation
    Status {
        #[arg(long)]
        design: String,

        #[arg(long)]
        variation: String,

        /// Root directory for artifacts
        #[arg(long, env = "DESIGN_CONVERGE_SCREENSHOT_DIR")]
        screenshot_dir: Option<PathBuf>,

        /// Output the raw report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = run(args.command).await;
    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    result
}

async fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Compare {
            design,
            variation,
            story,
            presets,
            design_port,
            storybook_port,
            screenshot_dir,
            wait_for,
            delay,
            vision,
            vision_model,
            no_track,
            project,
            grid,
            json,
        } => {
            let project = match project {
                Some(path) => {
                    let mut project = load_validated_project(&path)?;
                    project.screenshot_dir = project_root(&path).join(&project.screenshot_dir);
                    Some(project)
                }
                None => None,
            };
            let defaults = &config::get().capture;

            let presets = match (presets, &project) {
                (Some(selection), _) => ViewportPreset::parse_list(&selection)?,
                (None, Some(project)) => project.presets.clone(),
                (None, None) => ViewportPreset::parse_list(&defaults.presets)?,
            };
            let design_port = design_port
                .or(project.as_ref().map(|p| p.design_server_port))
                .unwrap_or(defaults.design_port);
            let storybook_port = storybook_port
                .or(project.as_ref().map(|p| p.storybook_port))
                .unwrap_or(defaults.storybook_port);
            let screenshot_dir = screenshot_dir
                .or(project.as_ref().map(|p| p.screenshot_dir.clone()))
                .unwrap_or_else(|| PathBuf::from(&defaults.screenshot_dir));

            let vision = if vision {
                vision_settings(vision_model).await
            } else {
                None
            };

            let job = ComparisonJob::new(
                &design,
                &variation,
                &story,
                config::design_url(design_port, &design, &variation),
                config::storybook_url(storybook_port, &story),
            )
            .presets(presets)
            .wait_for(wait_for)
            .delay(delay.map(Duration::from_millis))
            .diff_options(parse_diff_options(&grid, design_converge::diff::DEFAULT_THRESHOLD)?)
            .vision(vision)
            .track(!no_track);

            let layout = ArtifactLayout::new(screenshot_dir);
            let mut renderer = ChromeRenderer::new(ChromeSettings::default());
            let run = run_comparison(&mut renderer, &layout, &job).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_run(&run, &layout, &design, &variation);
            }
            Ok(())
        }

        Commands::Diff {
            a,
            b,
            output,
            grid,
            threshold,
        } => {
            let options = parse_diff_options(&grid, threshold)?;
            let metrics = {
                let output = output.clone();
                tokio::task::spawn_blocking(move || compare_images(&a, &b, &output, &options)).await??
            };
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            eprintln!("Diff written to {}", output.display());
            Ok(())
        }

        Commands::Vision {
            design,
            implementation,
            model,
        } => {
            let mut config = VisionConfig::default();
            if let Some(model) = model {
                config = config.model(model);
            }
            let result = compare_with_vision(&design, &implementation, &config).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        Commands::Validate { config, root, json } => {
            let project = load_project_config(&config)?;
            let root = root.unwrap_or_else(|| project_root(&config));
            let report = validate_config(&project, &root);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_validation(&report);
            }
            if report.has_errors() {
                Err(format!("{} check(s) failed", report.errors).into())
            } else {
                Ok(())
            }
        }

        Commands::Status {
            design,
            variation,
            screenshot_dir,
            json,
        } => {
            let root = screenshot_dir.unwrap_or_else(|| PathBuf::from(config::screenshot_dir()));
            let path = ArtifactLayout::new(root).convergence_path(&design, &variation);
            let report: ConvergenceReport = read_json(&path)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_convergence(&report);
            }
            Ok(())
        }
    }
}

/// Load a project config and refuse to continue when it has errors
fn load_validated_project(path: &Path) -> Result<ProjectConfig, Box<dyn Error>> {
    let project = load_project_config(path)?;
    let report = validate_config(&project, &project_root(path));
    if report.has_errors() {
        print_validation(&report);
        return Err(format!("project config {} has {} error(s)", path.display(), report.errors).into());
    }
    if report.warnings > 0 {
        warn!(warnings = report.warnings, "project config has warnings");
    }
    Ok(project)
}

fn project_root(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Vision settings when a key is present and the endpoint answers
async fn vision_settings(model: Option<String>) -> Option<VisionConfig> {
    let mut config = VisionConfig::default();
    if let Some(model) = model {
        config = config.model(model);
    }
    if config.api_key.is_none() {
        warn!("{} is not set, continuing without vision review", config::ENV_API_KEY);
        return None;
    }
    if !check_health(&config.endpoint, 5).await {
        warn!("vision endpoint not responding at {}, continuing without vision review", config.endpoint);
        return None;
    }
    info!(model = %config.model, "vision review enabled");
    Some(config)
}

fn parse_diff_options(grid: &str, threshold: f64) -> Result<DiffOptions, Box<dyn Error>> {
    let (rows, cols) = DiffOptions::parse_grid(grid)
        .ok_or_else(|| {
            format!(
                "Invalid grid '{}'. Use RxC with 1 to {} rows and columns, e.g. 3x3",
                grid,
                design_converge::diff::MAX_GRID_DIM
            )
        })?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("Threshold must be between 0 and 1, got {}", threshold).into());
    }
    Ok(DiffOptions::default().grid(rows, cols).threshold(threshold))
}

fn print_run(run: &ComparisonRun, layout: &ArtifactLayout, design: &str, variation: &str) {
    println!("Compared {}/{} across {} preset(s)", design, variation, run.presets.len());
    for outcome in &run.presets {
        let metrics = &outcome.report.metrics;
        println!(
            "  {} ({}x{}): {:.2}% differs ({} of {} pixels)",
            outcome.preset.name,
            outcome.preset.width,
            outcome.preset.height,
            metrics.diff_percentage,
            metrics.diff_pixels,
            metrics.total_pixels
        );
        if let Some(vision) = &outcome.vision {
            println!(
                "    Vision: {} (confidence {:.2}, {} issue(s)) {}",
                if vision.pass { "pass" } else { "fail" },
                vision.confidence,
                vision.issues.len(),
                vision.summary
            );
        }
    }
    if let Some(report) = &run.convergence {
        println!();
        print_convergence(report);
    }
    println!("\nArtifacts: {}", layout.pair_dir(design, variation).display());
}

fn print_convergence(report: &ConvergenceReport) {
    println!(
        "Convergence for {}/{} (story {}): {}",
        report.design_slug,
        report.variation_slug,
        report.story_id,
        if report.converged { "converged" } else { "not converged" }
    );
    println!("  Iterations: {} (threshold {}%)", report.total_iterations, CONVERGENCE_THRESHOLD);
    for record in &report.iterations {
        let vision = record
            .vision_result
            .as_ref()
            .map(|v| if v.pass { ", vision pass" } else { ", vision fail" })
            .unwrap_or_default();
        println!(
            "  #{} {}: {:.2}%{}",
            record.iteration,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.pixel_diff.diff_percentage,
            vision
        );
    }
    if let Some(completed) = report.completed_at {
        println!("  First converged at {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
}

fn print_validation(report: &ValidationReport) {
    for result in &report.results {
        let mark = if result.ok { "ok  " } else { "FAIL" };
        match &result.detail {
            Some(detail) => println!("  [{}] {} ({:?}): {}", mark, result.label, result.level, detail),
            None => println!("  [{}] {} ({:?})", mark, result.label, result.level),
        }
    }
    println!("{} error(s), {} warning(s)", report.errors, report.warnings);
}
