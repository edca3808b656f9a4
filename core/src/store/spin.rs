use super::{SmrStore, SpinRow, Station, Upload, Venue};
use crate::{
    error::SmrResult,
    types::{HeatSpikeId, RowHash},
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

const SPIN_ROW_COLUMNS: &str = "row_id, upload_id, artist_id, station_id, played_on, spin_count,
                                track_title, row_hash, hash_verified, integrity_status";

impl SmrStore {
    // ─────────────────────────────────────────────────────────────────
    // Collaborator data: stations, venues, uploads, spin rows
    // ─────────────────────────────────────────────────────────────────

    pub fn insert_station(&self, station: &Station) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO station (station_id, name, postal_code) VALUES (?1, ?2, ?3)",
            params![station.station_id, station.name, station.postal_code],
        )?;
        Ok(())
    }

    pub fn insert_venue(&self, venue: &Venue) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO venue (venue_id, name, postal_code) VALUES (?1, ?2, ?3)",
            params![venue.venue_id, venue.name, venue.postal_code],
        )?;
        Ok(())
    }

    pub fn venue_postal_code(&self, venue_id: &str) -> SmrResult<Option<String>> {
        let code = self
            .conn
            .query_row(
                "SELECT postal_code FROM venue WHERE venue_id = ?1",
                params![venue_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(code.flatten())
    }

    pub fn insert_upload(&self, upload_id: &str, uploaded_on: NaiveDate) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO upload (upload_id, uploaded_on) VALUES (?1, ?2)",
            params![upload_id, uploaded_on],
        )?;
        Ok(())
    }

    pub fn get_upload(&self, upload_id: &str) -> SmrResult<Option<Upload>> {
        let upload = self
            .conn
            .query_row(
                "SELECT upload_id, uploaded_on, status FROM upload WHERE upload_id = ?1",
                params![upload_id],
                |row| {
                    Ok(Upload {
                        upload_id: row.get(0)?,
                        uploaded_on: row.get(1)?,
                        status: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(upload)
    }

    /// Insert a freshly ingested row. Hash columns start empty.
    pub fn insert_spin_row(&self, row: &SpinRow) -> SmrResult<()> {
        self.conn.execute(
            "INSERT INTO spin_row
             (row_id, upload_id, artist_id, station_id, played_on, spin_count, track_title)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.row_id,
                row.upload_id,
                row.artist_id,
                row.station_id,
                row.played_on,
                row.spin_count,
                row.track_title,
            ],
        )?;
        Ok(())
    }

    pub fn get_spin_row(&self, row_id: &str) -> SmrResult<Option<SpinRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SPIN_ROW_COLUMNS} FROM spin_row WHERE row_id = ?1"),
                params![row_id],
                Self::map_spin_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn spin_rows_for_upload(&self, upload_id: &str) -> SmrResult<Vec<SpinRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SPIN_ROW_COLUMNS} FROM spin_row WHERE upload_id = ?1 ORDER BY row_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![upload_id], Self::map_spin_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distinct artists carried by an upload, sorted for deterministic scans.
    pub fn artists_in_upload(&self, upload_id: &str) -> SmrResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT artist_id FROM spin_row WHERE upload_id = ?1 ORDER BY artist_id ASC",
        )?;
        let artists = stmt
            .query_map(params![upload_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(artists)
    }

    // ─────────────────────────────────────────────────────────────────
    // Row hashes
    // ─────────────────────────────────────────────────────────────────

    /// Persist a row's hash and mark it verified. Returns rows updated.
    pub fn set_row_hash(&self, row_id: &str, hash: &str) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE spin_row SET row_hash = ?1, hash_verified = 1 WHERE row_id = ?2",
            params![hash, row_id],
        )?;
        Ok(n)
    }

    /// Every non-quarantined row whose hash is shared with at least one other
    /// non-quarantined row, ordered by hash then row id.
    pub fn rows_sharing_hash(&self) -> SmrResult<Vec<SpinRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SPIN_ROW_COLUMNS} FROM spin_row
             WHERE integrity_status = 'clean'
               AND row_hash IN (
                   SELECT row_hash FROM spin_row
                   WHERE row_hash IS NOT NULL AND integrity_status = 'clean'
                   GROUP BY row_hash HAVING COUNT(*) > 1
               )
             ORDER BY row_hash ASC, row_id ASC"
        ))?;
        let rows = stmt
            .query_map([], Self::map_spin_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Hash-verified, non-quarantined rows (input to the tamper scan).
    pub fn verified_clean_rows(&self) -> SmrResult<Vec<SpinRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SPIN_ROW_COLUMNS} FROM spin_row
             WHERE hash_verified = 1 AND integrity_status = 'clean'
             ORDER BY row_id ASC"
        ))?;
        let rows = stmt
            .query_map([], Self::map_spin_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Quarantine every row of an upload and the upload itself.
    /// Returns the number of rows newly flagged.
    pub fn flag_rows_for_upload(&self, upload_id: &str) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE spin_row SET integrity_status = 'flagged'
             WHERE upload_id = ?1 AND integrity_status = 'clean'",
            params![upload_id],
        )?;
        self.conn.execute(
            "UPDATE upload SET status = 'quarantined' WHERE upload_id = ?1",
            params![upload_id],
        )?;
        Ok(n)
    }

    /// Return an upload's flagged rows to `clean` and the upload to
    /// `completed`. Returns the number of rows released.
    pub fn release_upload(&self, upload_id: &str) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE spin_row SET integrity_status = 'clean'
             WHERE upload_id = ?1 AND integrity_status = 'flagged'",
            params![upload_id],
        )?;
        self.conn.execute(
            "UPDATE upload SET status = 'completed' WHERE upload_id = ?1",
            params![upload_id],
        )?;
        Ok(n)
    }

    /// True when a quarantined row fed the given spike: a flagged row of the
    /// spike's artist played inside the spike window, or any flagged row of
    /// the upload the spike was detected from.
    pub fn spike_has_quarantined_rows(&self, heat_spike_id: HeatSpikeId) -> SmrResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM spin_row r
                 JOIN heat_spike h ON h.heat_spike_id = ?1
                 WHERE r.integrity_status = 'flagged'
                   AND (r.upload_id = h.upload_id
                        OR (r.artist_id = h.artist_id
                            AND r.played_on >= h.spike_start
                            AND r.played_on <= h.spike_end))
             )",
            params![heat_spike_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ─────────────────────────────────────────────────────────────────
    // Spin source queries (detection input)
    // ─────────────────────────────────────────────────────────────────

    /// Total non-quarantined spins for an artist between two dates, inclusive.
    pub fn sum_spins(&self, artist_id: &str, from: NaiveDate, to: NaiveDate) -> SmrResult<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(spin_count), 0)
             FROM spin_row
             WHERE artist_id = ?1 AND played_on >= ?2 AND played_on <= ?3
               AND integrity_status = 'clean'",
            params![artist_id, from, to],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Distinct stations reporting an artist between two dates, with each
    /// station's postal code (None when the station has none on file).
    pub fn reporting_stations(
        &self,
        artist_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SmrResult<Vec<(String, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT s.station_id, s.postal_code
             FROM spin_row r
             JOIN station s ON s.station_id = r.station_id
             WHERE r.artist_id = ?1 AND r.played_on >= ?2 AND r.played_on <= ?3
               AND r.integrity_status = 'clean'
             ORDER BY s.station_id ASC",
        )?;
        let stations = stmt
            .query_map(params![artist_id, from, to], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stations)
    }

    fn map_spin_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpinRow> {
        Ok(SpinRow {
            row_id: row.get(0)?,
            upload_id: row.get(1)?,
            artist_id: row.get(2)?,
            station_id: row.get(3)?,
            played_on: row.get(4)?,
            spin_count: row.get(5)?,
            track_title: row.get(6)?,
            row_hash: row.get::<_, Option<RowHash>>(7)?,
            hash_verified: row.get(8)?,
            integrity_status: row.get(9)?,
        })
    }
}
