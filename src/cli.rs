use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::IpAddr;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::info;

use fanet_ids::config::PipelineConfig;
use fanet_ids::ml::{FeatureSchema, LabelingMode};
use fanet_ids::{DetectionReport, ExtractionReport, Pipeline, TrainingReport};

#[derive(Parser)]
#[command(name = "fanet-ids")]
#[command(author, version, about = "Feed-forward intrusion classifier for FANET packet captures")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a classifier on a capture and annotate its test partition
    Train {
        /// Capture file (pcap or pcapng)
        #[arg(short, long)]
        input: PathBuf,

        /// CSV file for the annotated test rows
        #[arg(short, long)]
        output: PathBuf,

        /// Fusion strategy (reserved, currently ignored)
        #[arg(long)]
        fusion: Option<String>,

        /// Title shown on the learning-curve chart
        #[arg(long = "title_name")]
        title_name: Option<String>,

        /// Where to save the trained model
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Where to save the learning-curve PNG
        #[arg(long)]
        plot: Option<PathBuf>,

        /// Feature schema (capture-table, packet-header)
        #[arg(short, long)]
        schema: Option<FeatureSchema>,

        /// Label packets from this source address anomalous (repeatable)
        #[arg(long)]
        attacker: Vec<IpAddr>,

        /// Seed for the split, weight init and shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Training epochs
        #[arg(long)]
        epochs: Option<usize>,
    },

    /// Classify every packet of a capture with a saved model
    Detect {
        /// Capture file (pcap or pcapng)
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        pcap: Option<PathBuf>,

        /// Alias for --pcap
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Saved model
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// CSV file for the annotated rows
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Feature schema (default: the one the model was trained with)
        #[arg(short, long)]
        schema: Option<FeatureSchema>,
    },

    /// Write the feature table of a capture without training
    Extract {
        /// Capture file (pcap or pcapng)
        #[arg(short, long)]
        input: PathBuf,

        /// CSV output path
        #[arg(short, long)]
        output: PathBuf,

        /// Feature schema (capture-table, packet-header)
        #[arg(short, long)]
        schema: Option<FeatureSchema>,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for per-epoch metrics
#[derive(Tabled)]
struct EpochRow {
    #[tabled(rename = "Epoch")]
    epoch: usize,
    #[tabled(rename = "Loss")]
    loss: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Val Loss")]
    val_loss: String,
    #[tabled(rename = "Val Accuracy")]
    val_accuracy: String,
}

/// Table row for flagged packets
#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Packet")]
    packet: u64,
    #[tabled(rename = "Probability")]
    probability: String,
}

/// Number of flagged packets listed after a detection run
const MAX_LISTED_ANOMALIES: usize = 20;

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train {
            input,
            output,
            fusion,
            title_name,
            model,
            plot,
            schema,
            attacker,
            seed,
            epochs,
        } => {
            let mut config = config;
            if let Some(fusion) = fusion {
                info!("Fusion strategy '{}' requested; fusion is reserved and has no effect", fusion);
            }
            if title_name.is_some() {
                config.output.title = title_name;
            }
            if let Some(model) = model {
                config.output.model_path = model;
            }
            if let Some(plot) = plot {
                config.output.chart_path = plot;
            }
            if let Some(schema) = schema {
                config.extraction.train_schema = schema;
            }
            if !attacker.is_empty() {
                config.extraction.labeling = LabelingMode::SourceAddresses(attacker);
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            cmd_train(config, input, output)
        }
        Commands::Detect {
            pcap,
            input,
            model,
            output,
            schema,
        } => {
            let mut config = config;
            let input = pcap
                .or(input)
                .context("A capture is required (--pcap or --input)")?;
            if let Some(model) = model {
                config.output.model_path = model;
            }
            if schema.is_some() {
                config.extraction.detect_schema = schema;
            }
            cmd_detect(config, input, output)
        }
        Commands::Extract {
            input,
            output,
            schema,
        } => {
            let mut config = config;
            if let Some(schema) = schema {
                config.extraction.train_schema = schema;
            }
            cmd_extract(config, input, output)
        }
        Commands::GenConfig { output } => cmd_gen_config(config, output),
    }
}

fn cmd_train(config: PipelineConfig, input: PathBuf, output: PathBuf) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .train(&input, &output)
        .with_context(|| format!("Training on {} failed", input.display()))?;
    print_training(&report);
    Ok(())
}

fn cmd_detect(config: PipelineConfig, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .detect(&input, output.as_deref())
        .with_context(|| format!("Detection on {} failed", input.display()))?;
    print_detection(&report);
    Ok(())
}

fn cmd_extract(config: PipelineConfig, input: PathBuf, output: PathBuf) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .extract(&input, &output)
        .with_context(|| format!("Extraction from {} failed", input.display()))?;
    print_extraction(&report);
    Ok(())
}

fn cmd_gen_config(config: PipelineConfig, output: Option<PathBuf>) -> Result<()> {
    let toml_str = config.to_toml()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn optional(value: Option<f32>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn print_training(report: &TrainingReport) {
    println!("{}", "=== Training ===".bold());
    println!("Capture:   {}", report.input.display());
    println!("Schema:    {}", report.schema);
    println!(
        "Records:   {} ({} dropped)",
        report.extraction.records,
        report.extraction.dropped()
    );
    println!(
        "Rows:      {} ({} train, {} test)",
        report.rows, report.train_rows, report.test_rows
    );

    let rows: Vec<EpochRow> = report
        .history
        .epochs
        .iter()
        .map(|e| EpochRow {
            epoch: e.epoch,
            loss: format!("{:.4}", e.loss),
            accuracy: format!("{:.4}", e.accuracy),
            val_loss: optional(e.val_loss),
            val_accuracy: optional(e.val_accuracy),
        })
        .collect();
    println!("\n{}", Table::new(rows));

    println!("\n{}", "Test partition:".bold());
    println!("  Loss:      {:.4}", report.test.loss);
    println!(
        "  Accuracy:  {}",
        format!("{:.4}", report.test.accuracy).green()
    );
    println!(
        "  Anomalous: {}",
        report.anomalous_predictions.to_string().yellow()
    );

    println!("\n{}", "Written:".bold());
    println!("  Predictions: {}", report.csv_path.display());
    println!("  Chart:       {}", report.chart_path.display());
    println!("  Model:       {}", report.model_path.display());
    if let Some(summary) = &report.summary_path {
        println!("  Summary:     {}", summary.display());
    }
}

fn print_detection(report: &DetectionReport) {
    println!("{}", "=== Detection ===".bold());
    println!("Capture:   {}", report.input.display());
    println!("Model:     {}", report.model_path.display());
    println!("Schema:    {}", report.schema);
    println!(
        "Packets:   {} scored, {} dropped",
        report.rows(),
        report.extraction.dropped()
    );

    if report.anomalous == 0 {
        println!("{}", "No anomalous packets".green().bold());
    } else {
        println!(
            "{} {} packets above threshold {}",
            "Anomalous:".red().bold(),
            report.anomalous,
            report.threshold
        );
        let rows: Vec<AnomalyRow> = report
            .predictions
            .iter()
            .filter(|p| p.is_anomalous())
            .take(MAX_LISTED_ANOMALIES)
            .map(|p| AnomalyRow {
                packet: p.origin,
                probability: format!("{:.4}", p.probability),
            })
            .collect();
        println!("{}", Table::new(rows));
        if report.anomalous > MAX_LISTED_ANOMALIES {
            println!("{}", format!("({} more)", report.anomalous - MAX_LISTED_ANOMALIES).dimmed());
        }
    }

    if let Some(csv) = &report.csv_path {
        println!("Predictions written to {}", csv.display());
    }
}

fn print_extraction(report: &ExtractionReport) {
    println!("{}", "=== Extraction ===".bold());
    println!("Capture:   {}", report.input.display());
    println!("Schema:    {}", report.schema);
    println!(
        "Rows:      {} of {} records",
        report.rows, report.extraction.records
    );
    if report.extraction.dropped() > 0 {
        println!(
            "{} {} malformed, {} without IP layer",
            "Dropped:".yellow().bold(),
            report.extraction.dropped_malformed,
            report.extraction.dropped_no_ip
        );
    }
    println!("Written to {}", report.csv_path.display());
}
