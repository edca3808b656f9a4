//! Two engines, same seed, same commands.
//! They must produce identical event logs and identical identifiers.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use smr_core::{
    command::{CommandOutcome, PipelineCommand, SpinInput},
    config::SmrConfig,
    engine::SmrEngine,
    store::{RoyaltyTransaction, SmrStore, Station, Venue},
};

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn build_engine(seed: u64) -> SmrEngine {
    let store = SmrStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    SmrEngine::build(
        format!("det-test-{seed}"),
        seed,
        date(3, 8).and_hms_opt(9, 30, 0).unwrap(),
        SmrConfig::default_test(),
        store,
    )
    .expect("engine")
}

fn spin(row_id: &str, station: &str, played_on: NaiveDate, count: i64) -> SpinInput {
    SpinInput {
        row_id: row_id.into(),
        artist_id: "A1".into(),
        station_id: station.into(),
        played_on,
        spin_count: count,
        track_title: None,
    }
}

/// Surge, settlement, replay, quarantine, anchoring: every RNG stream is drawn.
fn script() -> Vec<PipelineCommand> {
    let mut commands = vec![
        PipelineCommand::AddStation(Station {
            station_id: "S1".into(),
            name: "Cool FM".into(),
            postal_code: Some("100001".into()),
        }),
        PipelineCommand::AddVenue(Venue {
            venue_id: "V1".into(),
            name: "Eko Hall".into(),
            postal_code: Some("100001".into()),
        }),
    ];
    for n in 1..=3 {
        commands.push(PipelineCommand::AddRoyaltyTransaction(RoyaltyTransaction {
            royalty_transaction_id: format!("RTX-{n}"),
            artist_id: "A1".into(),
            gross_platform_fee: Decimal::new(1999 * n, 2),
            currency: "NGN".into(),
            completed_on: date(3, 8),
        }));
    }
    commands.extend([
        PipelineCommand::IngestUpload {
            upload_id: "U0".into(),
            uploaded_on: date(2, 23),
            rows: vec![spin("b1", "S1", date(2, 16), 50)],
        },
        PipelineCommand::IngestUpload {
            upload_id: "U1".into(),
            uploaded_on: date(3, 1),
            rows: vec![spin("s1", "S1", date(3, 3), 80), spin("s2", "S1", date(3, 6), 90)],
        },
        PipelineCommand::DetectUpload {
            upload_id: "U1".into(),
        },
        PipelineCommand::ProcessTransaction {
            royalty_transaction_id: "RTX-1".into(),
            artist_id: "A1".into(),
            venue_id: Some("V1".into()),
        },
        PipelineCommand::ProcessTransaction {
            royalty_transaction_id: "RTX-2".into(),
            artist_id: "A1".into(),
            venue_id: None,
        },
        PipelineCommand::AnchorSettlements,
        PipelineCommand::AdvanceDays { days: 1 },
        PipelineCommand::IngestUpload {
            upload_id: "U2".into(),
            uploaded_on: date(3, 9),
            rows: vec![spin("replay", "S1", date(3, 3), 80)],
        },
        PipelineCommand::DailyCycle,
        PipelineCommand::ProcessTransaction {
            royalty_transaction_id: "RTX-3".into(),
            artist_id: "A1".into(),
            venue_id: Some("V1".into()),
        },
    ]);
    commands
}

fn run(seed: u64) -> (Vec<String>, Vec<String>) {
    let mut engine = build_engine(seed);
    let outcomes: Vec<String> = script()
        .into_iter()
        .map(|command| {
            let outcome: CommandOutcome = engine.apply(command).expect("command applies");
            serde_json::to_string(&outcome).expect("outcome serializes")
        })
        .collect();
    let log = engine
        .events()
        .expect("read events")
        .into_iter()
        .map(|e| format!("{} {} {}", e.day, e.event_type, e.payload))
        .collect();
    (log, outcomes)
}

#[test]
fn same_seed_produces_identical_event_logs() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    let (log_a, outcomes_a) = run(SEED);
    let (log_b, outcomes_b) = run(SEED);

    assert_eq!(
        log_a.len(),
        log_b.len(),
        "Event log lengths differ: {} vs {}",
        log_a.len(),
        log_b.len()
    );
    for (i, (a, b)) in log_a.iter().zip(log_b.iter()).enumerate() {
        assert_eq!(a, b, "Event log diverged at entry {i}:\n  A: {a}\n  B: {b}");
    }
    assert_eq!(outcomes_a, outcomes_b);

    for kind in ["bounty_settled", "settlements_anchored", "cemetery_flagged", "bounty_reversed"] {
        assert!(
            log_a.iter().any(|line| line.contains(kind)),
            "scenario never produced {kind}"
        );
    }
}

#[test]
fn different_seeds_produce_different_identifiers() {
    let (log_a, _) = run(1);
    let (log_b, _) = run(2);

    let bounty_ids = |log: &[String]| -> Vec<String> {
        log.iter()
            .filter(|line| line.contains(" bounty_recorded "))
            .filter_map(|line| {
                let payload = line.splitn(3, ' ').nth(2)?;
                let value: serde_json::Value = serde_json::from_str(payload).ok()?;
                value["bounty_id"].as_str().map(str::to_string)
            })
            .collect()
    };

    let ids_a = bounty_ids(&log_a);
    let ids_b = bounty_ids(&log_b);
    assert_eq!(ids_a.len(), 3);
    assert_eq!(ids_b.len(), 3);
    assert_ne!(ids_a, ids_b);
}
