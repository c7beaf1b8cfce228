//! # xp-cli — The "Console" of XP
//!
//! Minimal CLI over the profiler pipeline. Captured traces are replayed
//! through a real session, so filters and views behave exactly as they do
//! against a live server.
//!
//! - `xp replay <file>` — Replay a JSON trace and print the filtered events.
//! - `xp distinct <file> <field>` — Unique values of one field.
//! - `xp templates` — Built-in XEvent session templates.
//! - `xp verify` — Run Kani proofs.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xp_core::filter::eval::value_to_string;
use xp_core::{EventRow, ViewConfig};
use xp_session::service::{FileReplayService, LoggedService};
use xp_session::{
    ProfilerConfig, ProfilerSession, ProfilerSessionManager, SessionOptions, SessionTemplate,
    SessionType,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const MAX_CELL_WIDTH: usize = 60;

/// XP — replay, filter and inspect SQL Server profiler traces.
#[derive(Parser)]
#[command(name = "xp", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// JSON array of captured events.
    file: PathBuf,

    /// Path to the TOML configuration.
    #[arg(long, default_value = "xp.toml")]
    config: PathBuf,

    /// Ring capacity; overrides the configured value.
    #[arg(long)]
    capacity: Option<usize>,

    /// View template name (default from config).
    #[arg(long)]
    view: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a captured trace and print the matching events.
    Replay {
        #[command(flatten)]
        source: SourceArgs,

        /// Column filter, e.g. `Duration > 1000 AND DatabaseName = Sales`.
        #[arg(long)]
        filter: Option<String>,

        /// Case-insensitive text search across all columns.
        #[arg(long)]
        quick: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Print rows as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List the distinct values of a field across a captured trace.
    Distinct {
        #[command(flatten)]
        source: SourceArgs,

        field: String,
    },

    /// List the built-in XEvent session templates.
    Templates,

    /// Run Kani formal verification proofs.
    Verify,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "xp=info,xp_session=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Templates => {
            print_templates();
            ExitCode::SUCCESS
        }

        Commands::Verify => verify(),

        Commands::Replay {
            source,
            filter,
            quick,
            offset,
            limit,
            json,
        } => block_on(run_replay(source, filter, quick, offset, limit, json)),

        Commands::Distinct { source, field } => block_on(run_distinct(source, field)),
    }
}

fn block_on(task: impl std::future::Future<Output = CliResult<()>>) -> ExitCode {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to build tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(task) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_replay(
    source: SourceArgs,
    filter: Option<String>,
    quick: Option<String>,
    offset: usize,
    limit: usize,
    json: bool,
) -> CliResult<()> {
    let (mut manager, session) = replay(&source).await?;
    if let Some(expression) = filter {
        session.set_filter_expression(&expression)?;
    }
    if let Some(term) = quick {
        session.set_quick_filter(term);
    }

    let view = session.view_config().unwrap_or_else(ViewConfig::standard);
    let rows = session.filtered_range(offset, limit);
    if json {
        let projected: Vec<_> = rows.iter().map(|r| view.to_view_row(r)).collect();
        println!("{}", serde_json::to_string_pretty(&projected)?);
    } else {
        println!("{}", render_table(&view, &rows));
    }
    eprintln!(
        "{} of {} events match ({} shown)",
        session.filtered_count(),
        session.event_count(),
        rows.len()
    );

    manager.dispose().await;
    Ok(())
}

async fn run_distinct(source: SourceArgs, field: String) -> CliResult<()> {
    let (mut manager, session) = replay(&source).await?;
    for value in session.distinct_values(&field) {
        println!("{}", value);
    }
    manager.dispose().await;
    Ok(())
}

/// Replay `source.file` into a fresh session and wait for the stream to end.
async fn replay(source: &SourceArgs) -> CliResult<(ProfilerSessionManager, Arc<ProfilerSession>)> {
    let config = ProfilerConfig::load(&source.config)?;
    let service = Arc::new(LoggedService::new(FileReplayService::new(
        config.replay.batch_size,
    )));
    let mut manager = ProfilerSessionManager::new(service);

    let owner_uri = source.file.display().to_string();
    let mut options = SessionOptions::from_config("replay", &owner_uri, SessionType::File, &config)
        .with_session_name(session_name_for(&source.file));
    if let Some(capacity) = source.capacity {
        options = options.with_capacity(capacity);
    }
    if let Some(name) = &source.view {
        let view = config
            .view(name)
            .ok_or_else(|| format!("Unknown view '{}'", name))?;
        options = options.with_view(view);
    }

    let session = manager.create_session(options)?;
    let done = Arc::new(Notify::new());
    let finished = done.clone();
    session.on_session_stopped(move |error| {
        if let Some(message) = error {
            tracing::warn!("Replay stopped with error: {}", message);
        }
        finished.notify_one();
    });

    session.start_profiling().await?;
    done.notified().await;

    if let Some(message) = session.error_message() {
        return Err(message.into());
    }
    tracing::info!(
        "Loaded {} events into {} (capacity {})",
        session.event_count(),
        session.session_name(),
        session.capacity()
    );
    Ok((manager, session))
}

fn session_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "replay".to_string())
}

fn render_table(view: &ViewConfig, rows: &[EventRow]) -> String {
    let columns: Vec<_> = view.visible_columns().collect();
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.name.clone()));

    for row in rows {
        let projected = view.to_view_row(row);
        builder.push_record(columns.iter().map(|c| {
            let width = c.width.map_or(MAX_CELL_WIDTH, usize::from);
            projected
                .get(&c.name)
                .filter(|v| !v.is_null())
                .map(|v| truncate(&value_to_string(v), width))
                .unwrap_or_default()
        }));
    }

    let mut table = builder.build();
    table.with(Style::psql());
    table.to_string()
}

fn truncate(text: &str, width: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= width {
        return flat;
    }
    let mut cut: String = flat.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn print_templates() {
    let mut builder = Builder::default();
    builder.push_record(["Name", "Engine", "Default View"].map(String::from));
    for template in SessionTemplate::builtin() {
        builder.push_record([
            template.name.clone(),
            template.engine_type.to_string(),
            template.default_view.clone(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::psql());
    println!("{}", table);
}

fn verify() -> ExitCode {
    eprintln!("XP: Running formal verification...");
    eprintln!("   Tool: Kani Model Checker");
    eprintln!("   Targets: xp-verify (ring invariants), xp-buffer (cursor invariants)");
    eprintln!();

    let mut all_passed = true;
    for package in ["xp-verify", "xp-buffer"] {
        let status = Command::new("cargo")
            .args(["kani", "--package", package])
            .status();
        let passed = match status {
            Ok(status) if status.success() => {
                eprintln!("   {}: ALL PROOFS PASSED", package);
                true
            }
            Ok(_) => {
                eprintln!("   {}: PROOF FAILURE", package);
                false
            }
            Err(e) => {
                eprintln!("   Kani not found: {}", e);
                eprintln!("   Install with: cargo install kani-verifier && cargo kani setup");
                false
            }
        };
        all_passed &= passed;
    }

    if all_passed {
        eprintln!();
        eprintln!("XP: VERIFICATION COMPLETE");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
