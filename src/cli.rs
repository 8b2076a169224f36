//! Command-line surface: extract, evaluate, or both.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::assessment::{ConditionEvaluator, MeasurementSet, ResultRow};
use crate::config::Settings;
use crate::pipeline::extraction::ocr::TesseractCli;
use crate::pipeline::extraction::scratch::persist_artifacts;
use crate::pipeline::extraction::{DocumentSource, ExtractionReport, ReportExtractor};

#[derive(Parser)]
#[command(name = "valvescan")]
#[command(about = "Aortic root measurements from CT report PDFs, graded against TAVI thresholds")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "VALVESCAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract measurements from a report and print them as JSON
    Extract {
        /// PDF path or http(s) URL
        source: String,
        /// Write a colour-coded copy marking each extracted value
        #[arg(long)]
        review_pdf: Option<PathBuf>,
        /// Directory for crop images (a subdirectory per request)
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Grade a measurements JSON file and print the results table
    Evaluate {
        /// JSON object with camelCase measurement keys
        measurements: PathBuf,
    },

    /// Extract then grade in one pass
    Report {
        /// PDF path or http(s) URL
        source: String,
    },
}

#[derive(Serialize)]
struct FullReport {
    extraction: ExtractionReport,
    results: Vec<ResultRow>,
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract {
            source,
            review_pdf,
            artifacts,
        } => cmd_extract(settings, &source, review_pdf.as_deref(), artifacts.as_deref()),
        Commands::Evaluate { measurements } => cmd_evaluate(&measurements),
        Commands::Report { source } => cmd_report(settings, &source),
    }
}

fn extractor(settings: Settings) -> ReportExtractor {
    let ocr = TesseractCli::from_settings(&settings);
    ReportExtractor::new(Box::new(ocr), settings)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_extract(
    settings: Settings,
    source: &str,
    review_pdf: Option<&Path>,
    artifacts: Option<&Path>,
) -> anyhow::Result<()> {
    let source = DocumentSource::parse(source);
    let extractor = extractor(settings);
    let doc = extractor
        .load_document(&source)
        .with_context(|| format!("Failed to load {}", source.describe()))?;
    let report = extractor.extract_document(&doc)?;

    if let Some(path) = review_pdf {
        let pdf = extractor.review_pdf(&doc, &report)?;
        std::fs::write(path, pdf)
            .with_context(|| format!("Failed to write review PDF to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Review PDF written");
    }

    if let Some(dir) = artifacts {
        let written = persist_artifacts(dir, report.request_id, &report.artifacts)?;
        tracing::info!(count = written.len(), dir = %dir.display(), "Artifacts written");
    }

    print_json(&report)
}

fn cmd_evaluate(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let set = MeasurementSet::from_json(&raw)?;
    print_json(&ConditionEvaluator::new(&set).generate_results_table())
}

fn cmd_report(settings: Settings, source: &str) -> anyhow::Result<()> {
    let source = DocumentSource::parse(source);
    let extraction = extractor(settings)
        .extract(&source)
        .with_context(|| format!("Extraction failed for {}", source.describe()))?;
    let set = extraction.measurement_set();
    let results = ConditionEvaluator::new(&set).generate_results_table();
    print_json(&FullReport {
        extraction,
        results,
    })
}
