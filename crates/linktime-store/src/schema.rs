use linktime_types::SnapshotTime;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{Result, sql};

pub const TRAVEL_TIMES_TABLE: &str = "travel_times";
pub const DATETIME_INDEX: &str = "idx_tt_datetime";

fn travel_times_schema_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS travel_times (
        begin_node_id BIGINT,
        end_node_id BIGINT,
        datetime TIMESTAMP,
        travel_time REAL,
        num_trips INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_tt_datetime ON travel_times (datetime);
    "
}

/// Create `travel_times` and its datetime index. Safe to call repeatedly.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(travel_times_schema_sql())
        .map_err(sql("create travel_times schema"))?;
    debug!("travel_times schema ensured");
    Ok(())
}

/// Drop `travel_times` (and with it the index). A missing table is fine.
pub fn drop_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS travel_times;")
        .map_err(sql("drop travel_times"))?;
    debug!("travel_times dropped");
    Ok(())
}

/// Remove every row stored for `timestamp`. Returns the number of rows
/// removed; zero when nothing was stored.
pub fn delete_snapshot(conn: &Connection, timestamp: SnapshotTime) -> Result<usize> {
    let removed = conn
        .execute(
            "DELETE FROM travel_times WHERE datetime = ?1",
            params![timestamp],
        )
        .map_err(sql("delete snapshot"))?;
    info!(%timestamp, removed, "deleted snapshot");
    Ok(removed)
}

/// Distinct timestamps that have at least one stored row, ascending.
pub fn available_timestamps(conn: &Connection) -> Result<Vec<SnapshotTime>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT datetime FROM travel_times ORDER BY datetime")
        .map_err(sql("prepare timestamp listing"))?;
    let timestamps = stmt
        .query_map([], |row| row.get::<_, SnapshotTime>(0))
        .map_err(sql("list timestamps"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql("read timestamp"))?;
    Ok(timestamps)
}

/// Bytes used by `travel_times` and its index.
///
/// Uses the `dbstat` virtual table; builds of SQLite without it report the
/// footprint of the whole database file instead.
pub fn table_size(conn: &Connection) -> Result<u64> {
    let by_dbstat = conn.query_row(
        "SELECT COALESCE(SUM(pgsize), 0) FROM dbstat WHERE name IN (?1, ?2)",
        params![TRAVEL_TIMES_TABLE, DATETIME_INDEX],
        |row| row.get::<_, i64>(0),
    );
    let bytes = match by_dbstat {
        Ok(bytes) => bytes,
        Err(rusqlite::Error::SqliteFailure(_, Some(message))) if message.contains("dbstat") => {
            debug!("dbstat unavailable, reporting whole database size");
            conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(sql("read database size"))?
        }
        Err(error) => return Err(sql("read travel_times size")(error)),
    };
    Ok(u64::try_from(bytes).unwrap_or(0))
}

/// Human readable size in the units `pg_size_pretty` uses: a unit is kept
/// until the value reaches 10240 of it, and values are rounded half up.
pub fn pretty_size(bytes: u64) -> String {
    const LIMIT: u64 = 10 * 1024;
    const LIMIT_HALVES: u64 = LIMIT * 2 - 1;

    if bytes < LIMIT {
        return format!("{bytes} bytes");
    }
    // Keep one extra bit so the final division can round.
    let mut halves = bytes >> 9;
    for unit in ["kB", "MB", "GB"] {
        if halves < LIMIT_HALVES {
            return format!("{} {unit}", halves.div_ceil(2));
        }
        halves >>= 10;
    }
    format!("{} TB", halves.div_ceil(2))
}
