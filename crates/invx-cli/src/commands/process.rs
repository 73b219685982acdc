//! Process command - extract data from a single invoice file.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use invx_core::{InvoicePipeline, StructuredInvoice};

use super::{describe, load_config};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Print the raw text and table extraction instead of structuring it
    #[arg(long)]
    raw: bool,

    /// Show extraction confidence scores
    #[arg(long)]
    show_confidence: bool,

    /// Validate extracted data
    #[arg(long)]
    validate: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    // Check input file exists
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let data = fs::read(&args.input)?;
    let filename = args
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input")
        .to_string();

    info!("Processing file: {}", args.input.display());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    if args.raw {
        pb.set_message(format!("Extracting {}...", filename));
        let engine = InvoicePipeline::builder(config).build_engine();
        let document = invx_core::SourceDocument::new(data, filename).map_err(describe)?;
        let raw = tokio::task::spawn_blocking(move || engine.extract(&document))
            .await?
            .map_err(describe)?;
        pb.finish_and_clear();
        return write_output(&args, &serde_json::to_string_pretty(&raw)?);
    }

    pb.set_message(format!("Processing {}...", filename));
    let pipeline = InvoicePipeline::builder(config).build().map_err(describe)?;
    let result = pipeline.process_document(data, &filename).await;
    pb.finish_and_clear();
    let invoice = result.map_err(describe)?;

    // Validate if requested
    if args.validate {
        let issues = invoice.validate();
        if !issues.is_empty() {
            eprintln!("{}", style("Validation issues:").yellow());
            for issue in &issues {
                eprintln!("  - {}", issue);
            }
        }
    }

    write_output(&args, &format_invoice(&invoice, args.format)?)?;

    // Show summary
    if args.show_confidence {
        if let Some(metadata) = &invoice.metadata {
            eprintln!();
            eprintln!(
                "{} Extraction confidence: {:.0}%",
                style("ℹ").blue(),
                metadata.confidence.overall_confidence * 100.0
            );
            for (field, score) in &metadata.confidence.confidence_scores {
                eprintln!("    {:<16} {:.1}", field, score);
            }
            if let Some(time_ms) = metadata.processing_time_ms {
                eprintln!("{} Processing time: {}ms", style("ℹ").blue(), time_ms);
            }
            for warning in &metadata.warnings {
                eprintln!("{} {}", style("⚠").yellow(), warning);
            }
        }
    }

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}

fn write_output(args: &ProcessArgs, output: &str) -> anyhow::Result<()> {
    if let Some(output_path) = &args.output {
        fs::write(output_path, output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }
    Ok(())
}

pub fn format_invoice(invoice: &StructuredInvoice, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(invoice)?),
        OutputFormat::Csv => format_csv(invoice),
        OutputFormat::Text => Ok(format_text(invoice)),
    }
}

fn text<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn format_csv(invoice: &StructuredInvoice) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "invoice_number",
        "invoice_date",
        "due_date",
        "vendor_name",
        "customer_name",
        "subtotal",
        "tax_amount",
        "total",
        "currency",
        "confidence",
    ])?;

    wtr.write_record([
        text(&invoice.invoice_number),
        text(&invoice.invoice_date),
        text(&invoice.due_date),
        text(&invoice.vendor.name),
        text(&invoice.customer.name),
        text(&invoice.subtotal),
        text(&invoice.tax_amount),
        text(&invoice.total),
        text(&invoice.currency),
        format!("{:.2}", invoice.overall_confidence()),
    ])?;

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

pub fn format_text(invoice: &StructuredInvoice) -> String {
    let currency = invoice.currency.as_deref().unwrap_or("");
    let mut output = String::new();

    output.push_str(&format!("Invoice: {}\n", invoice.invoice_number.as_deref().unwrap_or("-")));
    if let Some(date) = &invoice.invoice_date {
        output.push_str(&format!("Date: {}\n", date));
    }
    output.push('\n');

    if let Some(name) = &invoice.vendor.name {
        output.push_str("Vendor:\n");
        output.push_str(&format!("  {}\n", name));
        if let Some(address) = &invoice.vendor.address {
            output.push_str(&format!("  {}\n", address));
        }
        output.push('\n');
    }

    if let Some(name) = &invoice.customer.name {
        output.push_str("Customer:\n");
        output.push_str(&format!("  {}\n", name));
        output.push('\n');
    }

    if !invoice.items.is_empty() {
        output.push_str("Items:\n");
        for item in &invoice.items {
            output.push_str(&format!(
                "  {} x{} @ {} = {}\n",
                item.description.as_deref().unwrap_or("?"),
                text(&item.quantity),
                text(&item.unit_price),
                text(&item.total)
            ));
        }
        output.push('\n');
    }

    output.push_str("Summary:\n");
    for (label, amount) in [
        ("Subtotal", &invoice.subtotal),
        ("Tax", &invoice.tax_amount),
        ("Discount", &invoice.discount),
        ("Total", &invoice.total),
    ] {
        if let Some(amount) = amount {
            output.push_str(&format!("  {:<9} {} {}\n", format!("{}:", label), amount, currency));
        }
    }

    if let Some(due_date) = &invoice.due_date {
        output.push_str(&format!("\nPayment due: {}\n", due_date));
    }
    if let Some(terms) = &invoice.payment_terms {
        output.push_str(&format!("Terms: {}\n", terms));
    }

    output
}
