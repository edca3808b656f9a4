//! Pipeline clock: the single source of "now" for a run.
//!
//! Components never read the system time; they receive `today` / `now`
//! from the engine, which owns this clock.

use crate::types::RunId;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineClock {
    pub run_id: RunId,
    pub now: NaiveDateTime,
}

impl PipelineClock {
    pub fn new(run_id: RunId, now: NaiveDateTime) -> Self {
        Self { run_id, now }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    /// Advance by whole days. Returns the new date.
    pub fn advance_days(&mut self, days: u32) -> NaiveDate {
        self.now += Duration::days(i64::from(days));
        self.today()
    }
}
