use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::fields::LockSet;
use shared::types::ServiceEntry;

const SELECT_COLUMNS: &str = "SELECT id, service_name, display_name, description, host, port, protocol,
        path, url, status, grp, tags, icon, hidden, favorite, source, locked_fields,
        last_seen_at, updated_at
 FROM services";

pub struct ServiceDb {
    conn: Connection,
}

impl ServiceDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS services (
                id            TEXT PRIMARY KEY,
                service_name  TEXT NOT NULL,
                display_name  TEXT NOT NULL,
                description   TEXT,
                host          TEXT NOT NULL,
                port          INTEGER,
                protocol      TEXT NOT NULL,
                path          TEXT,
                url           TEXT,
                status        TEXT NOT NULL,
                grp           TEXT,
                tags          TEXT NOT NULL,
                icon          TEXT,
                hidden        INTEGER NOT NULL DEFAULT 0,
                favorite      INTEGER NOT NULL DEFAULT 0,
                source        TEXT NOT NULL,
                locked_fields TEXT NOT NULL,
                last_seen_at  TEXT,
                updated_at    TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert or replace one service row
    pub fn upsert_service(&self, entry: &ServiceEntry) -> Result<()> {
        write_entry(&self.conn, entry)
    }

    /// Write a whole discovery run in one transaction
    pub fn save_services(&mut self, entries: &[ServiceEntry]) -> Result<()> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        for entry in entries {
            write_entry(&tx, entry)?;
        }
        tx.commit().context("Failed to commit services")?;
        Ok(())
    }

    /// Get all services
    pub fn get_all_services(&self) -> Result<Vec<ServiceEntry>> {
        let mut stmt = self
            .conn
            .prepare(SELECT_COLUMNS)
            .context("Failed to prepare query")?;

        let services = stmt
            .query_map([], row_to_entry)
            .context("Failed to query services")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect services")?;

        Ok(services)
    }

    /// Get a single service by id
    pub fn get_service(&self, id: &str) -> Result<Option<ServiceEntry>> {
        let result = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_entry,
            )
            .optional()
            .context("Failed to query service")?;

        Ok(result)
    }

    pub fn count_services(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))
            .context("Failed to count services")?;
        Ok(count as usize)
    }
}

fn write_entry(conn: &Connection, entry: &ServiceEntry) -> Result<()> {
    let tags_json = serde_json::to_string(&entry.tags).context("Failed to serialize tags")?;
    let locks_json = serde_json::to_string(&entry.locked_fields)
        .context("Failed to serialize locked fields")?;

    conn.execute(
        r#"
        INSERT INTO services (
            id, service_name, display_name, description, host, port, protocol,
            path, url, status, grp, tags, icon, hidden, favorite, source,
            locked_fields, last_seen_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        ON CONFLICT(id) DO UPDATE SET
            service_name = excluded.service_name,
            display_name = excluded.display_name,
            description = excluded.description,
            host = excluded.host,
            port = excluded.port,
            protocol = excluded.protocol,
            path = excluded.path,
            url = excluded.url,
            status = excluded.status,
            grp = excluded.grp,
            tags = excluded.tags,
            icon = excluded.icon,
            hidden = excluded.hidden,
            favorite = excluded.favorite,
            source = excluded.source,
            locked_fields = excluded.locked_fields,
            last_seen_at = excluded.last_seen_at,
            updated_at = excluded.updated_at
        "#,
        params![
            &entry.id,
            &entry.service_name,
            &entry.display_name,
            &entry.description,
            &entry.host,
            entry.port,
            entry.protocol.as_str(),
            &entry.path,
            &entry.url,
            entry.status.as_str(),
            &entry.group,
            &tags_json,
            &entry.icon,
            entry.hidden as i32,
            entry.favorite as i32,
            entry.source.as_str(),
            &locks_json,
            entry.last_seen_at.map(|t| t.to_rfc3339()),
            entry.updated_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to upsert service {}", entry.id))?;

    Ok(())
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

fn parse_time(column: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_column<T>(column: usize, value: &str) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| conversion_error(column, e))
}

fn row_to_entry(row: &rusqlite::Row) -> Result<ServiceEntry, rusqlite::Error> {
    let protocol: String = row.get(6)?;
    let status: String = row.get(9)?;
    let tags_json: String = row.get(11)?;
    let source: String = row.get(15)?;
    let locks_json: String = row.get(16)?;
    let last_seen_at: Option<String> = row.get(17)?;
    let updated_at: String = row.get(18)?;

    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(|e| conversion_error(11, e))?;
    let locked_fields: LockSet =
        serde_json::from_str(&locks_json).map_err(|e| conversion_error(16, e))?;

    Ok(ServiceEntry {
        id: row.get(0)?,
        service_name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        host: row.get(4)?,
        port: row.get::<_, Option<u16>>(5)?,
        protocol: parse_column(6, &protocol)?,
        path: row.get(7)?,
        url: row.get(8)?,
        status: parse_column(9, &status)?,
        group: row.get(10)?,
        tags,
        icon: row.get(12)?,
        hidden: row.get::<_, i32>(13)? != 0,
        favorite: row.get::<_, i32>(14)? != 0,
        source: parse_column(15, &source)?,
        locked_fields,
        last_seen_at: last_seen_at.as_deref().map(|t| parse_time(17, t)).transpose()?,
        updated_at: parse_time(18, &updated_at)?,
    })
}
