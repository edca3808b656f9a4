//! SMR integrity and bounty settlement pipeline.
//!
//! Spin rows are hashed and scanned for duplicates and tampering,
//! airplay surges open attribution windows, and royalty transactions
//! inside an open window settle a bounty split across two ledger accounts.

pub mod attribution_window;
pub mod bounty_settlement;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod geofence;
pub mod heat_spike_detector;
pub mod integrity_verifier;
pub mod merkle;
pub mod rng;
pub mod store;
pub mod types;
