use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use archidiff::analysis::{AnalysisState, DifferenceSummarizer, GeminiSummarizer};
use archidiff::config::{DetectorKind, RemovalMethod};
use archidiff::core::Point;
use archidiff::processing::pipeline::PipelineWarning;
use archidiff::processing::similarity::score_with_threshold;
use archidiff::processing::{
    AnnotationDetector, LayerSlot, LayerStack, LineSelector, MaskProvider, RegionListDetector, combined_mask, heatmap,
    remove,
};
use archidiff::source::{AutoRasterizer, Rasterizer};
use archidiff::{
    ComparisonPipeline, DiffError, GeometricTransform, HasRecoverySuggestion, OverlayMode, PipelineConfig, RasterImage,
    Retryable, SessionStore, logging,
};

/// Overlay two revisions of an architectural drawing and show what changed.
#[derive(Parser, Debug)]
#[command(name = "archidiff", version)]
#[command(about = "Compare two architectural drawings as a colour-separated overlay")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full pipeline: clean, normalize, overlay, optionally score and summarize
    Compare {
        reference: PathBuf,
        comparison: PathBuf,
        /// Output directory for all artifacts
        #[arg(short, long)]
        output: PathBuf,
        /// Pipeline settings (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overlay modes; overrides the config file
        #[arg(long = "mode", value_enum)]
        modes: Vec<OverlayMode>,
        /// Register with feature matching before overlaying
        #[arg(long)]
        auto_align: bool,
        /// Compute the SSIM score
        #[arg(long)]
        score: bool,
        /// Annotation regions (JSON) for the reference drawing
        #[arg(long)]
        regions_ref: Option<PathBuf>,
        /// Annotation regions (JSON) for the comparison drawing
        #[arg(long)]
        regions_cmp: Option<PathBuf>,
        /// Ask the configured model for a prose summary
        #[arg(long)]
        summarize: bool,
        /// Remove small closed shapes with the contour detector
        #[arg(long)]
        contours: bool,
        /// Only remove contours under these points (`x,y`); implies --contours
        #[arg(long = "select-at", value_parser = parse_point)]
        select_at: Vec<Point>,
    },
    /// Remove picked symbols and strokes from one drawing
    Clean {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Pipeline settings (TOML); masking and removal sections apply
        #[arg(long)]
        config: Option<PathBuf>,
        /// Remove the closed shape under each point (`x,y`)
        #[arg(long = "select-at", value_parser = parse_point)]
        select_at: Vec<Point>,
        /// Remove the straight stroke nearest each point (`x,y`)
        #[arg(long = "select-line", value_parser = parse_point)]
        select_line: Vec<Point>,
        /// Inpaint instead of painting removed pixels white
        #[arg(long)]
        inpaint: bool,
    },
    /// Crop, warp and tint two drawings, then flatten top over base
    Stack {
        base: PathBuf,
        top: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Crop window of the top drawing (`x,y,w,h`), applied first
        #[arg(long, value_parser = parse_crop)]
        crop: Option<[u32; 4]>,
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        /// Degrees, counter-clockwise
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        rotation: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_y: f64,
        /// Recolour the top drawing's ink (`r,g,b`) and make its paper transparent
        #[arg(long, value_parser = parse_color)]
        tint: Option<[u8; 3]>,
    },
    /// Print the similarity result as JSON
    Score { a: PathBuf, b: PathBuf },
    /// Write an SSIM difference heatmap
    Heatmap {
        a: PathBuf,
        b: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Render one interactive-alignment frame
    Overlay {
        lower: PathBuf,
        upper: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_y: f64,
        #[arg(long, default_value_t = 1.0)]
        scale_x: f64,
        #[arg(long, default_value_t = 1.0)]
        scale_y: f64,
        /// Degrees, counter-clockwise
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        rotation: f64,
        #[arg(long, default_value_t = 1.0)]
        opacity: f32,
        #[arg(long, default_value_t = 1)]
        thickness: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let result = run(cli.command).await;
    if let Err(err) = &result {
        if let Some(diff) = err.downcast_ref::<DiffError>() {
            if let Some(suggestion) = diff.recovery_suggestion() {
                eprintln!("hint: {suggestion}");
            }
            if diff.is_retryable() {
                eprintln!("hint: this failure may be transient; running the command again can succeed");
            }
        }
    }
    result
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Compare {
            reference,
            comparison,
            output,
            config,
            modes,
            auto_align,
            score,
            regions_ref,
            regions_cmp,
            summarize,
            contours,
            select_at,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if !modes.is_empty() {
                config.modes = modes;
            }
            config.alignment.auto_align |= auto_align;
            config.scoring.enabled |= score;
            config.summary.enabled |= summarize;
            if contours || !select_at.is_empty() {
                config.masking.detector = DetectorKind::Contours;
            }
            if !select_at.is_empty() {
                config.masking.select_at = select_at;
            }
            compare(config, &reference, &comparison, &output, regions_ref, regions_cmp).await
        }
        Command::Clean {
            input,
            output,
            config,
            select_at,
            select_line,
            inpaint,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if inpaint {
                config.removal.method = RemovalMethod::Inpaint;
            }
            let image = load(&input, &config)?;
            let mut providers = Vec::new();
            if !select_at.is_empty() {
                config.masking.select_at = select_at;
                providers.push(MaskProvider::new(Arc::new(config.contour_detector()), config.masking.dilation));
            }
            if !select_line.is_empty() {
                providers.push(MaskProvider::new(Arc::new(LineSelector::at_points(select_line)), config.masking.dilation));
            }
            let mask = combined_mask(&providers, &image)?;
            let cleaned = remove(&image, &mask, config.removal_policy())?;
            cleaned.save(&output)?;
            info!(removed = mask.marked_count(), path = %output.display(), "drawing cleaned");
            println!("{}", output.display());
            Ok(())
        }
        Command::Stack {
            base,
            top,
            output,
            crop,
            scale,
            rotation,
            offset_x,
            offset_y,
            tint,
        } => {
            let config = PipelineConfig::default();
            let mut stack = LayerStack::new(&load(&base, &config)?, &load(&top, &config)?);
            if let Some([x, y, w, h]) = crop {
                stack.crop(LayerSlot::Top, x, y, w, h)?;
            }
            stack.transform(
                LayerSlot::Top,
                &GeometricTransform {
                    scale_x: scale,
                    scale_y: scale,
                    rotation_degrees: rotation,
                    translate_x: offset_x,
                    translate_y: offset_y,
                },
            )?;
            if let Some(color) = tint {
                stack.tint(LayerSlot::Top, color);
            }
            stack
                .flatten()
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Command::Score { a, b } => {
            let config = PipelineConfig::default();
            let (a, b) = (load(&a, &config)?, load(&b, &config)?);
            let result = score_with_threshold(&a, &b, config.scoring.significant_difference)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Heatmap { a, b, output } => {
            let config = PipelineConfig::default();
            let (a, b) = (load(&a, &config)?, load(&b, &config)?);
            heatmap(&a, &b, config.scoring.heatmap_weight)?
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Command::Overlay {
            lower,
            upper,
            output,
            offset_x,
            offset_y,
            scale_x,
            scale_y,
            rotation,
            opacity,
            thickness,
        } => {
            let config = PipelineConfig::default();
            let store = SessionStore::default();
            let id = store.create().await;
            store.load(id, load(&lower, &config)?, load(&upper, &config)?).await?;
            store.set_offset(id, offset_x, offset_y).await?;
            store.set_scale_x(id, scale_x).await?;
            store.set_scale_y(id, scale_y).await?;
            store.set_rotation(id, rotation).await?;
            store.set_opacity(id, opacity).await?;
            let snapshot = store.set_thickness(id, thickness).await?;
            store.save(id, &output).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

fn load(path: &Path, config: &PipelineConfig) -> Result<RasterImage> {
    Ok(AutoRasterizer::default().rasterize(path, config.render.page, config.render.scale_factor)?)
}

fn parse_numbers<T: std::str::FromStr, const N: usize>(s: &str) -> Result<[T; N], String> {
    let parts: Vec<T> = s
        .split(',')
        .map(|p| p.trim().parse::<T>().map_err(|_| format!("'{p}' is not a valid number")))
        .collect::<Result<_, _>>()?;
    let found = parts.len();
    parts
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated values, got {found}"))
}

fn parse_point(s: &str) -> Result<Point, String> {
    let [x, y] = parse_numbers::<f32, 2>(s)?;
    Ok(Point::new(x, y))
}

fn parse_crop(s: &str) -> Result<[u32; 4], String> {
    parse_numbers::<u32, 4>(s)
}

fn parse_color(s: &str) -> Result<[u8; 3], String> {
    parse_numbers::<u8, 3>(s)
}

fn region_detector(path: Option<PathBuf>) -> Result<Option<Arc<dyn AnnotationDetector>>> {
    path.map(|p| -> Result<Arc<dyn AnnotationDetector>> { Ok(Arc::new(RegionListDetector::from_json_file(&p)?)) })
        .transpose()
}

async fn compare(
    config: PipelineConfig,
    reference: &Path,
    comparison: &Path,
    output: &Path,
    regions_ref: Option<PathBuf>,
    regions_cmp: Option<PathBuf>,
) -> Result<()> {
    std::fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;

    let mut builder = ComparisonPipeline::builder();
    if let Some(d) = region_detector(regions_ref)? {
        builder = builder.with_reference_detector(d);
    }
    if let Some(d) = region_detector(regions_cmp)? {
        builder = builder.with_comparison_detector(d);
    }
    if config.summary.enabled {
        let summarizer: Arc<dyn DifferenceSummarizer> = Arc::new(
            GeminiSummarizer::from_env(&config.summary.api_key_env)?
                .with_model(config.summary.model.clone())
                .with_max_dimension(config.summary.max_dimension)
                .with_max_retries(config.summary.max_retries),
        );
        builder = builder.with_summarizer(summarizer);
    }
    let pipeline = builder.with_config(config).build()?;

    let outcome = pipeline
        .run_documents(Arc::new(AutoRasterizer::default()), reference, comparison)
        .await?;

    for warning in &outcome.warnings {
        match warning {
            PipelineWarning::AspectRatio(w) => eprintln!(
                "warning: aspect ratios differ ({:.2} vs {:.2}); overlay may look distorted",
                w.reference_aspect, w.comparison_aspect
            ),
            PipelineWarning::DetectionDegraded { role, reason } => {
                eprintln!("warning: annotations kept on {role} drawing: {reason}")
            }
            PipelineWarning::AlignmentFallback { reason } => {
                eprintln!("warning: auto-align fell back to resize: {reason}")
            }
        }
    }

    outcome.reference_cleaned.save(&output.join("reference_cleaned.png"))?;
    outcome.comparison_cleaned.save(&output.join("comparison_cleaned.png"))?;
    outcome.pair.comparison.save(&output.join("comparison_aligned.png"))?;
    for overlay in &outcome.overlays {
        let path = output.join(format!("overlay_{}.png", overlay.mode.as_str()));
        overlay
            .image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "overlay written");
    }
    if let Some(similarity) = &outcome.similarity {
        let path = output.join("similarity.json");
        std::fs::write(&path, serde_json::to_string_pretty(similarity)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!(
            "similarity: {:.4} ({:?}), {:.1}% changed",
            similarity.score, similarity.status, similarity.diff_area_percent
        );
    }
    if let Some(analysis) = &outcome.analysis {
        match analysis.wait().await {
            AnalysisState::Ready(text) => {
                std::fs::write(output.join("analysis.txt"), &text)?;
                println!("{text}");
            }
            AnalysisState::Failed(reason) => eprintln!("warning: summary unavailable: {reason}"),
            AnalysisState::Pending => {}
        }
    }
    println!("{}", output.display());
    Ok(())
}
