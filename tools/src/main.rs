//! smr-runner: headless runner for the SMR settlement pipeline.
//!
//! Usage:
//!   smr-runner --db smr.db --seed 7 --now 2024-03-01T00:00:00 \
//!       --command '{"cmd":"daily_cycle"}'
//!   smr-runner --db smr.db --config smr.json < commands.jsonl
//!
//! Without `--command`, reads one JSON object per stdin line:
//!   {"type":"apply","command":{"cmd":"detect_upload","upload_id":"U1"}}
//!   {"type":"events","day":"2024-03-08"}
//!   {"type":"cemetery_queue","status":"flagged"}
//!   {"type":"windows","artist_id":"A1"}
//!   {"type":"bounty_summary"}
//!   {"type":"quit"}

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use smr_core::{
    command::PipelineCommand,
    config::SmrConfig,
    engine::SmrEngine,
    store::SmrStore,
    types::{BountyStatus, CemeteryStatus},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Apply {
        command: PipelineCommand,
    },
    Events {
        #[serde(default)]
        day: Option<NaiveDate>,
    },
    /// Cemetery records awaiting (or past) human review.
    CemeteryQueue {
        #[serde(default = "flagged")]
        status: CemeteryStatus,
    },
    Windows {
        artist_id: String,
    },
    BountySummary,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let now = match arg_value(&args, "--now") {
        Some(raw) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| anyhow::anyhow!("Invalid --now {raw}: {e}"))?,
        None => chrono::Utc::now().naive_utc(),
    };
    let config = match arg_value(&args, "--config") {
        Some(path) => SmrConfig::load(path)?.with_env_overrides()?,
        None => SmrConfig::from_env()?,
    };

    let store = SmrStore::open(db)?;
    store.migrate()?;

    let run_id = arg_value(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("run-{seed}-{}", now.format("%Y%m%d%H%M%S")));
    log::info!("smr-runner: run {run_id}, seed {seed}, db {db}, now {now}");

    let mut engine = SmrEngine::build(run_id, seed, now, config, store)?;

    if let Some(raw) = arg_value(&args, "--command") {
        let command: PipelineCommand = serde_json::from_str(raw)?;
        let outcome = engine.apply(command)?;
        println!("{}", serde_json::to_string(&outcome)?);
        return Ok(());
    }

    run_ipc_loop(&mut engine)
}

fn run_ipc_loop(engine: &mut SmrEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Events { day } => {
                let events = match day {
                    Some(day) => engine.store.events_for_day(&engine.run_id, day)?,
                    None => engine.events()?,
                };
                writeln!(stdout, "{}", serde_json::to_string(&events)?)?;
            }
            IpcCommand::CemeteryQueue { status } => {
                let records = engine.store.cemetery_records_with_status(status)?;
                writeln!(stdout, "{}", serde_json::to_string(&records)?)?;
            }
            IpcCommand::Windows { artist_id } => {
                let windows = engine.store.windows_for_artist(&artist_id)?;
                writeln!(stdout, "{}", serde_json::to_string(&windows)?)?;
            }
            IpcCommand::BountySummary => {
                let mut summary = serde_json::Map::new();
                for status in [BountyStatus::Pending, BountyStatus::Settled, BountyStatus::Reversed] {
                    let count = engine.store.count_bounties_with_status(status)?;
                    summary.insert(status.to_string(), count.into());
                }
                writeln!(stdout, "{}", serde_json::Value::Object(summary))?;
            }
            IpcCommand::Apply { command } => match engine.apply(command) {
                Ok(outcome) => writeln!(stdout, "{}", serde_json::to_string(&outcome)?)?,
                Err(e) => {
                    log::warn!("Command failed: {e}");
                    writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                }
            },
        }
        stdout.flush()?;
    }
    Ok(())
}

fn flagged() -> CemeteryStatus {
    CemeteryStatus::Flagged
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    arg_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
