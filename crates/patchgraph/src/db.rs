use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::types::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    card_name TEXT NOT NULL,
    device_name TEXT NOT NULL,
    card_index INTEGER NOT NULL,
    device_index INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS device_capabilities (
    device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    direction TEXT NOT NULL CHECK (direction IN ('capture', 'playback')),
    formats JSON NOT NULL DEFAULT '[]',
    rate_min INTEGER NOT NULL,
    rate_max INTEGER NOT NULL,
    max_channels INTEGER NOT NULL,
    period_min INTEGER NOT NULL,
    period_max INTEGER NOT NULL,
    PRIMARY KEY (device_id, direction)
);

CREATE TABLE IF NOT EXISTS loaded_devices (
    device_id TEXT PRIMARY KEY REFERENCES devices(id),
    client TEXT NOT NULL,
    rate INTEGER NOT NULL,
    period INTEGER NOT NULL,
    nperiods INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS port_connections (
    source_id TEXT NOT NULL,
    source_channel INTEGER NOT NULL,
    destination_id TEXT NOT NULL,
    destination_channel INTEGER NOT NULL,
    PRIMARY KEY (source_id, source_channel, destination_id, destination_channel)
);
"#;

impl ToSql for DeviceId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DeviceId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(DeviceId(value.as_str()?.to_string()))
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl ToSql for ClientMode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ClientMode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: row.get(0)?,
        card_name: row.get(1)?,
        device_name: row.get(2)?,
        card_index: row.get(3)?,
        device_index: row.get(4)?,
    })
}

fn loaded_from_row(row: &Row<'_>) -> rusqlite::Result<LoadedDevice> {
    Ok(LoadedDevice {
        device_id: row.get(0)?,
        client: row.get(1)?,
        rate: row.get(2)?,
        period: row.get(3)?,
        nperiods: row.get(4)?,
    })
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionEntry> {
    Ok(ConnectionEntry {
        source_id: row.get(0)?,
        source_channel: row.get(1)?,
        destination_id: row.get(2)?,
        destination_channel: row.get(3)?,
    })
}

/// Desired-state store with connection-per-call for concurrent access.
/// Each method creates a fresh connection with WAL mode enabled.
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open a file-based database with WAL mode for concurrent access.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }
        let db = Self { path };
        let conn = db.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(db)
    }

    /// Create a database file with a unique name under the temp dir.
    /// Each call creates a new database - suitable for tests.
    pub fn temporary() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_name = format!("patchbay_{}_{}.db", std::process::id(), unique_id);
        Self::open(std::env::temp_dir().join(db_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open database: {:?}", self.path))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        Ok(conn)
    }

    // Device catalog

    /// Insert, or on id collision overwrite names and indices.
    pub fn upsert_device(&self, device: &DeviceRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO devices (id, card_name, device_name, card_index, device_index)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                card_name = excluded.card_name,
                device_name = excluded.device_name,
                card_index = excluded.card_index,
                device_index = excluded.device_index,
                updated_at = datetime('now')",
            params![
                device.id,
                device.card_name,
                device.device_name,
                device.card_index,
                device.device_index
            ],
        )?;
        Ok(())
    }

    pub fn get_device(&self, id: &DeviceId) -> Result<Option<DeviceRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, card_name, device_name, card_index, device_index FROM devices WHERE id = ?1",
            params![id],
            device_from_row,
        )
        .optional()
        .context("Failed to get device")
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, card_name, device_name, card_index, device_index
             FROM devices ORDER BY card_index, device_index, id",
        )?;
        let rows = stmt.query_map([], device_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list devices")
    }

    /// Remove a device and its capability envelopes.
    pub fn delete_device(&self, id: &DeviceId) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // Capability envelopes

    pub fn upsert_capability(
        &self,
        id: &DeviceId,
        direction: Direction,
        envelope: &CapabilityEnvelope,
    ) -> Result<()> {
        let formats = serde_json::to_value(&envelope.formats)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO device_capabilities
                (device_id, direction, formats, rate_min, rate_max, max_channels, period_min, period_max)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(device_id, direction) DO UPDATE SET
                formats = excluded.formats,
                rate_min = excluded.rate_min,
                rate_max = excluded.rate_max,
                max_channels = excluded.max_channels,
                period_min = excluded.period_min,
                period_max = excluded.period_max",
            params![
                id,
                direction,
                formats,
                envelope.rate_min,
                envelope.rate_max,
                envelope.max_channels,
                envelope.period_min,
                envelope.period_max
            ],
        )?;
        Ok(())
    }

    pub fn get_capability(
        &self,
        id: &DeviceId,
        direction: Direction,
    ) -> Result<Option<CapabilityEnvelope>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT formats, rate_min, rate_max, max_channels, period_min, period_max
             FROM device_capabilities WHERE device_id = ?1 AND direction = ?2",
            params![id, direction],
            |row| {
                let formats: serde_json::Value = row.get(0)?;
                let formats: BTreeSet<String> = serde_json::from_value(formats).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(CapabilityEnvelope {
                    formats,
                    rate_min: row.get(1)?,
                    rate_max: row.get(2)?,
                    max_channels: row.get(3)?,
                    period_min: row.get(4)?,
                    period_max: row.get(5)?,
                })
            },
        )
        .optional()
        .context("Failed to get capability envelope")
    }

    // Loaded-device ledger

    pub fn upsert_loaded(&self, loaded: &LoadedDevice) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO loaded_devices (device_id, client, rate, period, nperiods)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(device_id) DO UPDATE SET
                client = excluded.client,
                rate = excluded.rate,
                period = excluded.period,
                nperiods = excluded.nperiods",
            params![
                loaded.device_id,
                loaded.client,
                loaded.rate,
                loaded.period,
                loaded.nperiods
            ],
        )?;
        Ok(())
    }

    pub fn get_loaded(&self, id: &DeviceId) -> Result<Option<LoadedDevice>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT device_id, client, rate, period, nperiods FROM loaded_devices WHERE device_id = ?1",
            params![id],
            loaded_from_row,
        )
        .optional()
        .context("Failed to get loaded device")
    }

    pub fn list_loaded(&self) -> Result<Vec<LoadedDevice>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, client, rate, period, nperiods FROM loaded_devices ORDER BY device_id",
        )?;
        let rows = stmt.query_map([], loaded_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list loaded devices")
    }

    pub fn delete_loaded(&self, id: &DeviceId) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM loaded_devices WHERE device_id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // Connection ledger

    /// Record a desired connection. Returns false if it was already recorded.
    pub fn insert_connection(&self, entry: &ConnectionEntry) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO port_connections (source_id, source_channel, destination_id, destination_channel)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT DO NOTHING",
            params![
                entry.source_id,
                entry.source_channel,
                entry.destination_id,
                entry.destination_channel
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn delete_connection(&self, entry: &ConnectionEntry) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM port_connections
             WHERE source_id = ?1 AND source_channel = ?2
               AND destination_id = ?3 AND destination_channel = ?4",
            params![
                entry.source_id,
                entry.source_channel,
                entry.destination_id,
                entry.destination_channel
            ],
        )?;
        Ok(removed > 0)
    }

    pub fn list_connections(&self) -> Result<Vec<ConnectionEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, source_channel, destination_id, destination_channel
             FROM port_connections
             ORDER BY source_id, source_channel, destination_id, destination_channel",
        )?;
        let rows = stmt.query_map([], connection_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list connections")
    }
}
