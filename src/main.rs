//! obfs-scout CLI application entry point.
//!
//! # Startup Flow
//!
//! ```text
//!   ┌──────────────────┐
//!   │  Parse CLI Args  │ ◄── clap parses command-line arguments
//!   └────────┬─────────┘
//!            ▼
//!   ┌──────────────────┐       ┌─────────────────┐
//!   │ --generate_config│──────▶│ Write default   │────▶ Exit
//!   │    specified?    │       │ config & exit   │
//!   └────────┬─────────┘       └─────────────────┘
//!            │ No
//!            ▼
//!   ┌──────────────────┐
//!   │  Load Config     │ ◄── Defaults → File → Env → CLI
//!   └────────┬─────────┘
//!            ▼
//!   ┌──────────────────┐
//!   │ Initialize       │
//!   │   Logging        │
//!   └────────┬─────────┘
//!            ▼
//!   ┌──────────────────┐
//!   │ Load descriptor  │ ◄── --base (TOML or JSON)
//!   └────────┬─────────┘
//!            ▼
//!   ┌──────────────────┐     ┌────────────────────┐
//!   │ Run search       │────▶│ progress reporter  │ (event channel)
//!   └────────┬─────────┘     └────────────────────┘
//!            ▼
//!   ┌──────────────────┐
//!   │ Ranking, export  │ ◄── --output
//!   └──────────────────┘
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Search completed (even if nothing works) |
//! | 1 | Error (see stderr for details) |
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `OBFS_SCOUT_BASE` | Connection descriptor (equivalent to `--base`) |
//! | `OBFS_SCOUT_ENGINE` | Engine executable (equivalent to `--engine`) |
//! | `OBFS_SCOUT_CONFIG` | Path to config file (equivalent to `--config`) |

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use obfs_scout::events::{EventSink, SearchEvent};
use obfs_scout::search::SearchOrchestrator;
use obfs_scout::{
    config, logger, plog_fmt, BaseConfig, CliArgs, Config, Error, LogLevel, ProbeRunner,
};

/// Number of ranked results printed after a search.
const SHOWN_RESULTS: usize = 10;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> obfs_scout::Result<()> {
    let args = CliArgs::parse();

    // Handle --generate_config
    if let Some(ref output_path) = args.generate_config {
        let config = Config::default();
        let toml = config.to_toml()?;
        std::fs::write(output_path, toml)?;
        println!("Wrote default config to {}", output_path.display());
        return Ok(());
    }

    let config = config::load_config(&args)?;
    logger::init(config.loglevel, config.logfile.as_deref())?;

    let base_path = config.base.clone().ok_or_else(|| {
        Error::Config("no connection descriptor; pass --base or set `base`".to_string())
    })?;
    let base = BaseConfig::from_file(&base_path)?;

    plog_fmt!(LogLevel::Notice, "obfs-scout {} starting", env!("CARGO_PKG_VERSION"));
    plog_fmt!(
        LogLevel::Debug,
        "Engine: {}, readiness: {}, concurrency: {}",
        config.engine.bin,
        config.probe.readiness,
        config.search.concurrency,
    );

    let runner = ProbeRunner::new(
        config.engine_command(),
        Arc::new(config.port_allocator()?),
        config.runner_options(),
    );

    let (events, mut rx) = EventSink::channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SearchEvent::PhaseStarted { .. } => {
                    plog_fmt!(LogLevel::Notice, "=== {} ===", event);
                }
                SearchEvent::ProbeFinished { .. } => {
                    logger::plog(LogLevel::Notice, &event.to_string());
                }
            }
        }
    });

    let search =
        SearchOrchestrator::new(Arc::new(runner), config.search_settings()).with_events(events);
    let outcome = search
        .run(&base, config.search.mode, &config.search.groups)
        .await;
    drop(search);
    if let Err(e) = reporter.await {
        plog_fmt!(LogLevel::Warn, "Progress reporter failed: {}", e);
    }
    let session = outcome?;

    let ranked = session.ranked();
    for (rank, result) in ranked
        .iter()
        .filter(|r| r.success())
        .take(SHOWN_RESULTS)
        .enumerate()
    {
        plog_fmt!(
            LogLevel::Notice,
            "#{} {}ms {}",
            rank + 1,
            result.latency_ms(),
            result.description(),
        );
    }

    match session.best() {
        Some(best) => plog_fmt!(
            LogLevel::Notice,
            "Recommended: {} ({}ms)",
            best.description(),
            best.latency_ms(),
        ),
        None => logger::plog(
            LogLevel::Warn,
            "No configuration got through; every probe was blocked",
        ),
    }

    if let Some(ref output) = config.output {
        session.write_json(output)?;
        plog_fmt!(LogLevel::Notice, "Wrote results to {}", output.display());
    }

    Ok(())
}
