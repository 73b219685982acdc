//! Batch processing command for multiple invoice files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use invx_core::{InvoicePipeline, InvxError, StructuredInvoice};

use super::load_config;
use super::process::{OutputFormat, format_invoice};

const EXTENSIONS: [&str; 8] = ["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of documents processed concurrently (default: batch.concurrency)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of processing a single file.
struct ProcessResult {
    path: PathBuf,
    outcome: Result<StructuredInvoice, InvxError>,
}

impl ProcessResult {
    fn filename(&self) -> &str {
        self.path.file_name().and_then(|s| s.to_str()).unwrap_or("")
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.batch.concurrency = jobs.max(1);
    }

    // Expand glob pattern
    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
            EXTENSIONS.contains(&ext.as_str())
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    eprintln!("{} Found {} files to process", style("ℹ").blue(), files.len());

    // Create output directory if specified
    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pipeline = InvoicePipeline::builder(config).build().map_err(super::describe)?;

    // Slots follow input order; unreadable files are filled in right away.
    let mut slots: Vec<Option<ProcessResult>> = Vec::with_capacity(files.len());
    let mut documents = Vec::with_capacity(files.len());
    let mut queued = Vec::with_capacity(files.len());
    for (index, path) in files.iter().enumerate() {
        match fs::read(path) {
            Ok(data) => {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("input").to_string();
                documents.push((data, name));
                queued.push(index);
                slots.push(None);
            }
            Err(e) => slots.push(Some(ProcessResult {
                outcome: Err(InvxError::Io(e)),
                path: path.clone(),
            })),
        }
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Processing {} files...", documents.len()));
    pb.enable_steady_tick(Duration::from_millis(120));

    let outcomes = pipeline.process_batch(documents).await;
    pb.finish_with_message("Complete");

    for (index, outcome) in queued.into_iter().zip(outcomes) {
        slots[index] = Some(ProcessResult {
            path: files[index].clone(),
            outcome,
        });
    }
    let results: Vec<ProcessResult> = slots.into_iter().flatten().collect();

    // Write outputs
    if let Some(output_dir) = &args.output_dir {
        let names = output_names(&files, args.format.extension());
        for (result, name) in results.iter().zip(&names) {
            let Ok(invoice) = &result.outcome else {
                continue;
            };
            let output_path = output_dir.join(name);
            fs::write(&output_path, format_invoice(invoice, args.format)?)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    // Generate summary if requested
    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        eprintln!("{} Summary written to {}", style("✓").green(), summary_path.display());
    }

    let failed: Vec<&ProcessResult> = results.iter().filter(|r| r.outcome.is_err()).collect();
    let successful = results.len() - failed.len();

    // Print summary
    eprintln!();
    eprintln!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    eprintln!(
        "   {} successful, {} failed",
        style(successful).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        eprintln!();
        eprintln!("{}", style("Failed files:").red());
        for result in &failed {
            if let Err(e) = &result.outcome {
                warn!("Failed to process {}: {}", result.path.display(), e);
                eprintln!("  - {}: [{}] {}", result.path.display(), e.kind(), e);
            }
        }
        if !args.continue_on_error {
            anyhow::bail!("{} of {} files failed", failed.len(), results.len());
        }
    }

    Ok(())
}

/// Output file name per input, in input order.
///
/// `invoice.pdf` becomes `invoice.json`. When two inputs share a stem the
/// source extension is kept (`a.pdf.json`, `a.png.json`), and a counter is
/// appended if the full file names collide as well.
fn output_names(paths: &[PathBuf], extension: &str) -> Vec<String> {
    let stem = |p: &PathBuf| p.file_stem().and_then(|s| s.to_str()).unwrap_or("invoice").to_string();
    let file_name = |p: &PathBuf| p.file_name().and_then(|s| s.to_str()).unwrap_or("invoice").to_string();

    let mut stems: HashMap<String, usize> = HashMap::new();
    let mut file_names: HashMap<String, usize> = HashMap::new();
    for path in paths {
        *stems.entry(stem(path)).or_default() += 1;
        *file_names.entry(file_name(path)).or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    paths
        .iter()
        .map(|path| {
            let base = if stems[&stem(path)] == 1 {
                stem(path)
            } else if file_names[&file_name(path)] == 1 {
                file_name(path)
            } else {
                let count = seen.entry(file_name(path)).or_default();
                *count += 1;
                format!("{}-{}", file_name(path), count)
            };
            format!("{}.{}", base, extension)
        })
        .collect()
}

fn write_summary(path: &Path, results: &[ProcessResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "error_kind",
        "invoice_number",
        "total",
        "confidence",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        match &result.outcome {
            Ok(invoice) => {
                let processing_time = invoice
                    .metadata
                    .as_ref()
                    .and_then(|m| m.processing_time_ms)
                    .map(|ms| ms.to_string())
                    .unwrap_or_default();
                wtr.write_record([
                    result.filename(),
                    "success",
                    "",
                    invoice.invoice_number.as_deref().unwrap_or(""),
                    &invoice.total.as_ref().map(ToString::to_string).unwrap_or_default(),
                    &format!("{:.2}", invoice.overall_confidence()),
                    &processing_time,
                    "",
                ])?;
            }
            Err(e) => {
                wtr.write_record([
                    result.filename(),
                    "error",
                    e.kind().as_str(),
                    "",
                    "",
                    "",
                    "",
                    &e.to_string(),
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_unique_stems_drop_extension() {
        assert_eq!(
            output_names(&paths(&["in/a.pdf", "in/b.png"]), "json"),
            vec!["a.json", "b.json"]
        );
    }

    #[test]
    fn test_colliding_stems_keep_extension() {
        assert_eq!(
            output_names(&paths(&["in/a.pdf", "in/a.png", "in/b.tif"]), "csv"),
            vec!["a.pdf.csv", "a.png.csv", "b.csv"]
        );
    }

    #[test]
    fn test_identical_file_names_are_numbered() {
        assert_eq!(
            output_names(&paths(&["x/a.pdf", "y/a.pdf"]), "json"),
            vec!["a.pdf-1.json", "a.pdf-2.json"]
        );
    }
}
