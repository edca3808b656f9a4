use super::{json_column, CemeteryRecord, SmrStore};
use crate::{error::SmrResult, types::CemeteryStatus};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

const CEMETERY_COLUMNS: &str = "cemetery_id, upload_id, failure_type, failure_key, expected_hash,
                                actual_hash, data_snapshot, status, flagged_on, reviewed_on,
                                review_note";

impl SmrStore {
    /// Insert unless a record with the same failure key exists.
    /// Returns true when a new record was written.
    pub fn insert_cemetery_record_if_absent(&self, rec: &CemeteryRecord) -> SmrResult<bool> {
        let snapshot = serde_json::to_string(&rec.data_snapshot)?;
        let n = self.conn.execute(
            "INSERT INTO cemetery_record
             (cemetery_id, upload_id, failure_type, failure_key, expected_hash,
              actual_hash, data_snapshot, status, flagged_on, reviewed_on, review_note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (failure_key) DO NOTHING",
            params![
                rec.cemetery_id,
                rec.upload_id,
                rec.failure_type,
                rec.failure_key,
                rec.expected_hash,
                rec.actual_hash,
                snapshot,
                rec.status,
                rec.flagged_on,
                rec.reviewed_on,
                rec.review_note,
            ],
        )?;
        Ok(n == 1)
    }

    pub fn cemetery_id_for_key(&self, failure_key: &str) -> SmrResult<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT cemetery_id FROM cemetery_record WHERE failure_key = ?1",
                params![failure_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_cemetery_record(&self, cemetery_id: &str) -> SmrResult<Option<CemeteryRecord>> {
        let rec = self
            .conn
            .query_row(
                &format!("SELECT {CEMETERY_COLUMNS} FROM cemetery_record WHERE cemetery_id = ?1"),
                params![cemetery_id],
                Self::map_cemetery_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn cemetery_records_with_status(
        &self,
        status: CemeteryStatus,
    ) -> SmrResult<Vec<CemeteryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CEMETERY_COLUMNS} FROM cemetery_record
             WHERE status = ?1
             ORDER BY flagged_on ASC, failure_key ASC"
        ))?;
        let rows = stmt
            .query_map(params![status], Self::map_cemetery_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a review outcome. Only updates when the stored status still
    /// equals `from`, so concurrent reviewers cannot both win.
    pub fn update_cemetery_review(
        &self,
        cemetery_id: &str,
        from: CemeteryStatus,
        to: CemeteryStatus,
        note: Option<&str>,
        reviewed_on: NaiveDate,
    ) -> SmrResult<usize> {
        let n = self.conn.execute(
            "UPDATE cemetery_record
             SET status = ?1, review_note = COALESCE(?2, review_note), reviewed_on = ?3
             WHERE cemetery_id = ?4 AND status = ?5",
            params![to, note, reviewed_on, cemetery_id, from],
        )?;
        Ok(n)
    }

    /// Link a record to the uploads it implicates. Repeat links are ignored.
    pub fn link_cemetery_uploads(&self, cemetery_id: &str, upload_ids: &[String]) -> SmrResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO cemetery_upload (cemetery_id, upload_id) VALUES (?1, ?2)",
        )?;
        for upload_id in upload_ids {
            stmt.execute(params![cemetery_id, upload_id])?;
        }
        Ok(())
    }

    /// Uploads implicated by a record that is not a false positive whose
    /// upload has not been quarantined yet. Sorted by upload id.
    pub fn uploads_awaiting_quarantine(&self) -> SmrResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT l.upload_id
             FROM cemetery_upload l
             JOIN cemetery_record c ON c.cemetery_id = l.cemetery_id
             JOIN upload u ON u.upload_id = l.upload_id
             WHERE c.status <> 'false_positive' AND u.status <> 'quarantined'
             ORDER BY l.upload_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Uploads linked to `cemetery_id` that no other live record still holds.
    pub fn uploads_cleared_by(&self, cemetery_id: &str) -> SmrResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.upload_id
             FROM cemetery_upload l
             WHERE l.cemetery_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM cemetery_upload o
                   JOIN cemetery_record c ON c.cemetery_id = o.cemetery_id
                   WHERE o.upload_id = l.upload_id
                     AND o.cemetery_id <> ?1
                     AND c.status <> 'false_positive'
               )
             ORDER BY l.upload_id ASC",
        )?;
        let ids = stmt
            .query_map(params![cemetery_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn cemetery_record_count(&self) -> SmrResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM cemetery_record", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_cemetery_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CemeteryRecord> {
        Ok(CemeteryRecord {
            cemetery_id: row.get(0)?,
            upload_id: row.get(1)?,
            failure_type: row.get(2)?,
            failure_key: row.get(3)?,
            expected_hash: row.get(4)?,
            actual_hash: row.get(5)?,
            data_snapshot: json_column(row, 6)?,
            status: row.get(7)?,
            flagged_on: row.get(8)?,
            reviewed_on: row.get(9)?,
            review_note: row.get(10)?,
        })
    }
}
