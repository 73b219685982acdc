//! Inspect command - quality metrics and preprocessing decision for one page.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use image::DynamicImage;
use serde::Serialize;

use invx_core::models::config::RasterizerKind;
use invx_core::models::document::DocumentFormat;
use invx_core::pdf::{EmbeddedImageRasterizer, PageRasterizer, PopplerRasterizer};
use invx_core::quality::{self, QualityAssessment, QualityMetrics};
use invx_core::{Preprocessor, SourceDocument, Strategy, SystemResolver};

use super::{describe, load_config};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Input image or PDF
    #[arg(required = true)]
    input: PathBuf,

    /// Page to inspect when the input is a PDF (1-based)
    #[arg(short, long, default_value = "1")]
    page: usize,

    /// Write the preprocessed page as PNG
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct InspectReport {
    metrics: QualityMetrics,
    blank: bool,
    assessment: QualityAssessment,
    strategy: Strategy,
    deskew_angle: f32,
}

pub async fn run(args: InspectArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let data = fs::read(&args.input)?;
    let document = SourceDocument::new(data, args.input.display().to_string()).map_err(describe)?;

    let image: DynamicImage = match document.format() {
        DocumentFormat::Image(kind) => image::load_from_memory_with_format(document.bytes(), kind.image_format())?,
        DocumentFormat::Pdf => {
            let rasterizer: Box<dyn PageRasterizer> = match config.pdf.rasterizer {
                RasterizerKind::Poppler => Box::new(PopplerRasterizer::new(Arc::new(SystemResolver::new(
                    config.capabilities.clone(),
                )))),
                RasterizerKind::Embedded => Box::new(EmbeddedImageRasterizer::new()),
            };
            let mut pages = rasterizer
                .rasterize(document.bytes(), config.pdf.render_dpi)
                .map_err(describe)?;
            if args.page == 0 || args.page > pages.len() {
                anyhow::bail!("Page {} out of range (document has {} pages)", args.page, pages.len());
            }
            pages
                .swap_remove(args.page - 1)
                .ok_or_else(|| anyhow::anyhow!("Page {} could not be rendered", args.page))?
        }
    };

    let metrics = quality::analyze(&image);
    let preprocessor = Preprocessor::new(config.preprocess.clone(), config.quality.clone());
    let page = tokio::task::spawn_blocking(move || preprocessor.preprocess(&image, &metrics)).await?;

    let report = InspectReport {
        metrics,
        blank: quality::is_blank(&metrics, &config.quality),
        assessment: page.assessment.clone(),
        strategy: page.strategy,
        deskew_angle: page.deskew_angle,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(output) = &args.output {
        page.image.save_with_format(output, image::ImageFormat::Png)?;
        eprintln!("{} Preprocessed page written to {}", style("✓").green(), output.display());
    }

    Ok(())
}

fn print_report(report: &InspectReport) {
    let m = &report.metrics;
    println!("Resolution: {}x{}", m.resolution.0, m.resolution.1);
    println!("Brightness: {:.1}", m.brightness);
    println!("Contrast:   {:.1}", m.contrast);
    println!("Sharpness:  {:.1}", m.sharpness);
    println!();

    if report.blank {
        println!("{} Page is blank and would be skipped", style("ℹ").blue());
    }

    let decision = if report.assessment.advanced {
        style("advanced").yellow()
    } else {
        style("simple").green()
    };
    println!("Preprocessing: {} ({})", decision, report.assessment.reasons.join(", "));
    println!("Strategy:      {:?}", report.strategy);
    println!("Deskew:        {:.2}°", report.deskew_angle);
}
