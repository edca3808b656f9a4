use super::{decimal_column, json_column, HeatSpike, HeatSpikeData, SmrStore};
use crate::{
    error::SmrResult,
    types::{to_hundredths, HeatSpikeId},
};
use rusqlite::{params, OptionalExtension};

const HEAT_SPIKE_COLUMNS: &str = "heat_spike_id, artist_id, upload_id, detected_on, baseline_spins,
                                  spike_spins, multiplier_hundredths, spike_start, spike_end,
                                  station_count, postal_codes, threshold_met";

impl SmrStore {
    /// Single insert. Heat spikes are never updated.
    pub fn insert_heat_spike(&self, data: &HeatSpikeData) -> SmrResult<HeatSpikeId> {
        let multiplier = to_hundredths(data.multiplier)?;
        let postal_codes = serde_json::to_string(&data.postal_codes)?;
        self.conn.execute(
            "INSERT INTO heat_spike
             (artist_id, upload_id, detected_on, baseline_spins, spike_spins,
              multiplier_hundredths, spike_start, spike_end, station_count,
              postal_codes, threshold_met)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                data.artist_id,
                data.upload_id,
                data.detected_on,
                data.baseline_spins,
                data.spike_spins,
                multiplier,
                data.spike_start,
                data.spike_end,
                data.station_count,
                postal_codes,
                data.threshold_met,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_heat_spike(&self, heat_spike_id: HeatSpikeId) -> SmrResult<Option<HeatSpike>> {
        let spike = self
            .conn
            .query_row(
                &format!("SELECT {HEAT_SPIKE_COLUMNS} FROM heat_spike WHERE heat_spike_id = ?1"),
                params![heat_spike_id],
                Self::map_heat_spike_row,
            )
            .optional()?;
        Ok(spike)
    }

    pub fn heat_spikes_for_artist(&self, artist_id: &str) -> SmrResult<Vec<HeatSpike>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HEAT_SPIKE_COLUMNS} FROM heat_spike
             WHERE artist_id = ?1
             ORDER BY heat_spike_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![artist_id], Self::map_heat_spike_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_heat_spike_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HeatSpike> {
        Ok(HeatSpike {
            heat_spike_id: row.get(0)?,
            data: HeatSpikeData {
                artist_id: row.get(1)?,
                upload_id: row.get(2)?,
                detected_on: row.get(3)?,
                baseline_spins: row.get(4)?,
                spike_spins: row.get(5)?,
                multiplier: decimal_column(row, 6)?,
                spike_start: row.get(7)?,
                spike_end: row.get(8)?,
                station_count: row.get(9)?,
                postal_codes: json_column(row, 10)?,
                threshold_met: row.get(11)?,
            },
        })
    }
}
