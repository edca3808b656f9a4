use super::{decimal_column, AttributionWindow, SmrStore};
use crate::{
    error::SmrResult,
    types::{HeatSpikeId, WindowId},
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

const WINDOW_COLUMNS: &str = "window_id, artist_id, heat_spike_id, window_start, window_end, status,
                              bounties_triggered, bounty_amount_minor, closed_on";

impl SmrStore {
    pub fn insert_window(
        &self,
        artist_id: &str,
        heat_spike_id: HeatSpikeId,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> SmrResult<WindowId> {
        self.conn.execute(
            "INSERT INTO attribution_window (artist_id, heat_spike_id, window_start, window_end)
             VALUES (?1, ?2, ?3, ?4)",
            params![artist_id, heat_spike_id, window_start, window_end],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_window(&self, window_id: WindowId) -> SmrResult<Option<AttributionWindow>> {
        let window = self
            .conn
            .query_row(
                &format!("SELECT {WINDOW_COLUMNS} FROM attribution_window WHERE window_id = ?1"),
                params![window_id],
                Self::map_window_row,
            )
            .optional()?;
        Ok(window)
    }

    /// Active, unexpired windows for an artist, most recently opened first.
    /// Ordering happens here at query time; nothing caches the winner.
    pub fn active_windows(
        &self,
        artist_id: &str,
        today: NaiveDate,
    ) -> SmrResult<Vec<AttributionWindow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WINDOW_COLUMNS} FROM attribution_window
             WHERE artist_id = ?1 AND status = 'active' AND window_end >= ?2
             ORDER BY window_start DESC, window_id DESC"
        ))?;
        let rows = stmt
            .query_map(params![artist_id, today], Self::map_window_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_active_window(
        &self,
        artist_id: &str,
        today: NaiveDate,
    ) -> SmrResult<Option<AttributionWindow>> {
        let window = self
            .conn
            .query_row(
                &format!(
                    "SELECT {WINDOW_COLUMNS} FROM attribution_window
                     WHERE artist_id = ?1 AND status = 'active' AND window_end >= ?2
                     ORDER BY window_start DESC, window_id DESC
                     LIMIT 1"
                ),
                params![artist_id, today],
                Self::map_window_row,
            )
            .optional()?;
        Ok(window)
    }

    pub fn has_active_window(&self, artist_id: &str, today: NaiveDate) -> SmrResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM attribution_window
                 WHERE artist_id = ?1 AND status = 'active' AND window_end >= ?2
             )",
            params![artist_id, today],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Additive increment of a window's running totals.
    pub fn add_window_bounty(&self, window_id: WindowId, amount_minor: i64) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE attribution_window
             SET bounties_triggered = bounties_triggered + 1,
                 bounty_amount_minor = bounty_amount_minor + ?1
             WHERE window_id = ?2",
            params![amount_minor, window_id],
        )?;
        Ok(n)
    }

    /// `active -> expired` for every window whose end date has passed.
    pub fn expire_windows_before(&self, today: NaiveDate) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE attribution_window
             SET status = 'expired', closed_on = ?1
             WHERE status = 'active' AND window_end < ?1",
            params![today],
        )?;
        Ok(n)
    }

    /// `active -> claimed`. Returns 0 when the window is not active.
    pub fn claim_window(&self, window_id: WindowId, today: NaiveDate) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE attribution_window
             SET status = 'claimed', closed_on = ?1
             WHERE window_id = ?2 AND status = 'active'",
            params![today, window_id],
        )?;
        Ok(n)
    }

    pub fn windows_for_artist(&self, artist_id: &str) -> SmrResult<Vec<AttributionWindow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WINDOW_COLUMNS} FROM attribution_window
             WHERE artist_id = ?1
             ORDER BY window_start DESC, window_id DESC"
        ))?;
        let rows = stmt
            .query_map(params![artist_id], Self::map_window_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_window_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttributionWindow> {
        Ok(AttributionWindow {
            window_id: row.get(0)?,
            artist_id: row.get(1)?,
            heat_spike_id: row.get(2)?,
            window_start: row.get(3)?,
            window_end: row.get(4)?,
            status: row.get(5)?,
            bounties_triggered: row.get(6)?,
            bounty_amount: decimal_column(row, 7)?,
            closed_on: row.get(8)?,
        })
    }
}
