use crate::models::customer::Customer;
use crate::models::snapshot::{DashboardSnapshot, RefreshRecord};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;

const DB_SCHEMA_VERSION: i64 = 1;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Future schema; do not fail reads/writes for forward-compatible changes.
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS refresh_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            refresh_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            trigger_name TEXT NOT NULL,
            outcome TEXT CHECK(outcome IN ('ok', 'failed')) NOT NULL,
            customer_count INTEGER NOT NULL DEFAULT 0,
            total_runs INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            source_url TEXT,
            payload_json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_refresh_log_timestamp ON refresh_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_refresh_log_outcome ON refresh_log(outcome);
        ",
    )
}

pub fn get_db_connection(data_dir: &str) -> Result<Connection> {
    let db_path = Path::new(data_dir).join("history.db");
    let conn = Connection::open(db_path)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// Stores a successful refresh together with its payload, which later
/// serves as the stale fallback when the endpoint is unreachable.
pub fn record_success(conn: &Connection, trigger: &str, snapshot: &DashboardSnapshot) -> Result<i64> {
    let payload_json = serde_json::to_string(&snapshot.customers).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO refresh_log (refresh_id, timestamp, trigger_name, outcome, customer_count, total_runs, source_url, payload_json)
         VALUES (?1, ?2, ?3, 'ok', ?4, ?5, ?6, ?7)",
        params![
            snapshot.id,
            snapshot.fetched_at,
            trigger,
            snapshot.customers.len() as i64,
            i64::try_from(snapshot.server_total_runs()).unwrap_or(i64::MAX),
            snapshot.source_url,
            payload_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn record_failure(conn: &Connection, trigger: &str, source_url: &str, error: &str) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO refresh_log (refresh_id, timestamp, trigger_name, outcome, source_url, error)
         VALUES (?1, ?2, ?3, 'failed', ?4, ?5)",
        params![uuid::Uuid::new_v4().to_string(), now, trigger, source_url, error],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Keeps the newest `retention` rows.
pub fn prune_history(conn: &Connection, retention: u32) -> Result<usize> {
    conn.execute(
        "DELETE FROM refresh_log WHERE id NOT IN (
            SELECT id FROM refresh_log ORDER BY id DESC LIMIT ?1
        )",
        params![retention as i64],
    )
}

pub fn list_refreshes(conn: &Connection, limit: u32) -> Result<Vec<RefreshRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, refresh_id, timestamp, trigger_name, outcome, customer_count, total_runs, error
         FROM refresh_log ORDER BY id DESC LIMIT ?1",
    )?;

    let records = stmt
        .query_map(params![limit as i64], |row| {
            Ok(RefreshRecord {
                id: row.get(0)?,
                refresh_id: row.get(1)?,
                timestamp: row.get(2)?,
                trigger: row.get(3)?,
                outcome: row.get(4)?,
                customer_count: row.get::<_, i64>(5)? as usize,
                total_runs: row.get::<_, i64>(6)? as u64,
                error: row.get(7)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(records)
}

/// Newest successful payload, decoded back into a snapshot.
pub fn load_latest_snapshot(conn: &Connection) -> Result<Option<DashboardSnapshot>> {
    let row: Option<(String, i64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT refresh_id, timestamp, source_url, payload_json FROM refresh_log
             WHERE outcome = 'ok' AND payload_json IS NOT NULL
             ORDER BY id DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((refresh_id, timestamp, source_url, payload_json)) = row else {
        return Ok(None);
    };

    let customers = match payload_json.as_deref().map(serde_json::from_str::<Vec<Customer>>) {
        Some(Ok(customers)) => customers,
        Some(Err(e)) => {
            log::warn!("Stored payload {refresh_id} could not be decoded: {e}");
            return Ok(None);
        }
        None => return Ok(None),
    };

    Ok(Some(DashboardSnapshot {
        id: refresh_id,
        generation: 0,
        fetched_at: timestamp,
        source_url: source_url.unwrap_or_default(),
        customers,
    }))
}

#[tauri::command]
pub async fn get_refresh_history(data_dir: String, limit: Option<u32>) -> Result<Vec<RefreshRecord>, String> {
    crate::commands::settings::ensure_data_dir(&data_dir)?;
    let conn = get_db_connection(&data_dir).map_err(|e| format!("DB error: {e}"))?;
    list_refreshes(&conn, limit.unwrap_or(50).clamp(1, 500)).map_err(|e| format!("Query error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(names: &[&str]) -> DashboardSnapshot {
        let customers = names
            .iter()
            .map(|name| Customer {
                name: name.to_string(),
                total_runs: Some(3),
                ..Customer::default()
            })
            .collect();
        DashboardSnapshot::new(1, "http://localhost/api".to_string(), customers)
    }

    #[test]
    fn schema_initializes_with_expected_version() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, DB_SCHEMA_VERSION);

        let mut stmt = conn.prepare("PRAGMA table_info(refresh_log)").expect("table info");
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("columns")
            .filter_map(|c| c.ok())
            .collect();
        assert!(columns.iter().any(|c| c == "source_url"));
        assert!(columns.iter().any(|c| c == "payload_json"));

        initialize_schema(&conn).expect("schema init is idempotent");
    }

    #[test]
    fn latest_successful_payload_round_trips() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");

        let stored = snapshot(&["Acme", "Globex"]);
        record_success(&conn, "update_graphs_now", &stored).expect("record success");
        record_failure(&conn, "auto_refresh", "http://localhost/api", "connection refused")
            .expect("record failure");

        let loaded = load_latest_snapshot(&conn)
            .expect("load snapshot")
            .expect("snapshot exists");
        assert_eq!(loaded.id, stored.id);
        assert_eq!(loaded.customers.len(), 2);
        assert_eq!(loaded.server_total_runs(), 6);

        let history = list_refreshes(&conn, 10).expect("list history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, "failed");
        assert_eq!(history[1].total_runs, 6);
    }

    #[test]
    fn prune_keeps_newest_rows() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");

        for _ in 0..5 {
            record_failure(&conn, "auto_refresh", "http://localhost/api", "timeout").expect("record");
        }
        let removed = prune_history(&conn, 2).expect("prune");
        assert_eq!(removed, 3);
        assert_eq!(list_refreshes(&conn, 10).expect("list").len(), 2);
    }
}
