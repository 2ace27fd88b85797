//! opine-ri - Response Integrity engine entry point
//!
//! Batch CLI for the integrity jobs that keep the shared response store
//! honest: the reconciliation sweep (hash backfill + abandonment
//! correction), the read-only duplicate report, the explicit duplicate
//! remediation step, and the reviewer rejection-list import.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opine_ri::db::ResponseRepository;
use opine_ri::reconciler::manual_rejections;
use opine_ri::reconciler::remediation::{remediate_duplicates, RemediationConfig};
use opine_ri::report::{self, DuplicateReport};
use opine_ri::{BatchReconciler, ReconcilerConfig};

/// Command-line arguments for opine-ri
#[derive(Parser, Debug)]
#[command(name = "opine-ri")]
#[command(about = "Response Integrity engine for the Opine survey platform")]
#[command(version)]
struct Args {
    /// Data directory containing the shared store
    #[arg(long, env = "OPINE_DATA_DIR")]
    data_dir: Option<String>,

    /// Direct database path (overrides the data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a reconciliation sweep: backfill/refresh content hashes and
    /// correct miscategorized abandoned responses
    Sweep {
        /// Survey to sweep
        #[arg(long)]
        survey: String,

        /// Compute and classify only; write nothing
        #[arg(long)]
        dry_run: bool,

        /// Resume from the persisted checkpoint
        #[arg(long)]
        resume: bool,

        /// Run the duplicate-report pass after the sweep
        #[arg(long)]
        with_report: bool,

        /// Recompute current-version digests too and repair mismatches
        #[arg(long)]
        verify_hashes: bool,

        /// Records per page
        #[arg(long)]
        page_size: Option<i64>,

        /// Pause between batch flushes (milliseconds)
        #[arg(long)]
        batch_delay_ms: Option<u64>,

        /// Stop after this many pages (resumable later)
        #[arg(long)]
        max_pages: Option<u64>,

        /// Where report files are written (default: <data-dir>/reports)
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Build the duplicate report without mutating anything
    Report {
        #[arg(long)]
        survey: String,

        /// Where report files are written (default: <data-dir>/reports)
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Also write the CSV mirror
        #[arg(long)]
        csv: bool,
    },

    /// Reject still-pending duplicates (the explicit act step; run Report
    /// first and review it)
    Remediate {
        #[arg(long)]
        survey: String,

        /// Show what would be rejected without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply a reviewer rejection list (JSON exported from the dashboard's
    /// spreadsheet converter)
    RejectList {
        /// Path to the JSON rejection list
        #[arg(long)]
        file: PathBuf,

        /// Show what would be rejected without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opine_ri=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting opine-ri (Response Integrity)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let data_dir = opine_common::config::resolve_data_dir(args.data_dir.as_deref());
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| opine_common::config::database_path(&data_dir));
    info!("Database: {}", db_path.display());

    let pool = opine_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let repo = ResponseRepository::new(pool.clone());

    match args.command {
        Command::Sweep {
            survey,
            dry_run,
            resume,
            with_report,
            verify_hashes,
            page_size,
            batch_delay_ms,
            max_pages,
            report_dir,
        } => {
            let mut config = ReconcilerConfig::new(&survey);
            config
                .load_settings(&pool)
                .await
                .context("Failed to load settings")?;
            config.dry_run = dry_run;
            config.resume = resume;
            config.with_report = with_report;
            config.verify_hashes = verify_hashes;
            config.max_pages = max_pages;
            if let Some(page_size) = page_size {
                config.page_size = page_size;
            }
            if let Some(delay) = batch_delay_ms {
                config.batch_delay_ms = delay;
            }

            let output = BatchReconciler::new(repo, config).run().await?;

            if let Some(report) = &output.report {
                let dir = report_dir.unwrap_or_else(|| data_dir.join("reports"));
                let path = write_report_files(report, &dir, true)?;
                info!("Duplicate report written: {}", path.display());
            }

            println!("{}", serde_json::to_string_pretty(&output.summary)?);
        }

        Command::Report {
            survey,
            report_dir,
            csv,
        } => {
            let report = report::build_report(&repo, &survey, Some(&repo)).await?;

            let dir = report_dir.unwrap_or_else(|| data_dir.join("reports"));
            let path = write_report_files(&report, &dir, csv)?;
            info!(
                groups = report.summary.total_groups,
                duplicates = report.summary.total_duplicates,
                "Duplicate report written: {}",
                path.display()
            );

            println!("{}", serde_json::to_string_pretty(&report.summary)?);
        }

        Command::Remediate { survey, dry_run } => {
            let mut config = RemediationConfig::new(&survey);
            config.dry_run = dry_run;

            let (summary, _report) = remediate_duplicates(&repo, &config).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::RejectList { file, dry_run } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let entries = manual_rejections::parse_rejection_list(&json)?;
            info!(entries = entries.len(), "Loaded rejection list");

            let summary =
                manual_rejections::apply_manual_rejections(&repo, &entries, dry_run, 5_000)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Write the JSON report (and optionally its CSV mirror); returns the JSON
/// path
fn write_report_files(
    report: &DuplicateReport,
    dir: &std::path::Path,
    csv: bool,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    let stamp = opine_common::time::now().format("%Y%m%d_%H%M%S");
    let base = format!("duplicate_report_{}_{}", report.survey_guid, stamp);

    let json_path = dir.join(format!("{}.json", base));
    std::fs::write(&json_path, report::render_json(report)?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    if csv {
        let csv_path = dir.join(format!("{}.csv", base));
        std::fs::write(&csv_path, report::render_csv(report))
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    }

    Ok(json_path)
}
