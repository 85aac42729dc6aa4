//! Snapshot write path.
//!
//! A save replaces everything stored for one timestamp: delete, optional
//! default-speed row, then the observed links in fixed-size batches. Each
//! full batch goes through one multi-row `INSERT` template prepared once per
//! call; the trailing partial batch gets its own template sized to the
//! remainder. Both are plain `Statement`s and are finalized when dropped.

use linktime_graph::{Link, LinkNetwork};
use linktime_types::{RowColumns, SnapshotRow, SnapshotTime};
use rusqlite::types::ToSql;
use rusqlite::{Connection, Statement, params, params_from_iter};
use tracing::{debug, info, warn};

use crate::config::{COLUMNS_PER_ROW, StoreConfig, WriteMode};
use crate::error::{Error, Result, sql};
use crate::schema::delete_snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub timestamp: SnapshotTime,
    /// Rows removed before writing.
    pub replaced: usize,
    pub sentinel_written: bool,
    /// Observation rows inserted (the sentinel row is not counted).
    pub rows_written: usize,
    pub batches: usize,
}

/// Replace the stored snapshot for `timestamp` with `graph`'s observed links
/// and its default speed.
pub fn save<G: LinkNetwork>(
    conn: &mut Connection,
    graph: &G,
    timestamp: SnapshotTime,
    config: &StoreConfig,
) -> Result<SaveReport> {
    config.validate()?;
    let sentinel = graph
        .default_speed()
        .map(SnapshotRow::default_speed)
        .transpose()?;
    // Everything that can be rejected is rejected before the old snapshot
    // is touched; past this point only storage failures remain.
    let rows = observation_rows(graph)?;

    let report = match config.write_mode {
        WriteMode::Atomic => save_atomic(conn, &rows, timestamp, sentinel, config.batch_size)?,
        WriteMode::PerBatch => {
            save_per_batch(conn, &rows, timestamp, sentinel, config.batch_size)?
        }
    };
    info!(
        %timestamp,
        mode = %config.write_mode,
        replaced = report.replaced,
        rows = report.rows_written,
        batches = report.batches,
        default = report.sentinel_written,
        "saved snapshot"
    );
    Ok(report)
}

fn save_atomic(
    conn: &mut Connection,
    rows: &[RowColumns],
    timestamp: SnapshotTime,
    sentinel: Option<SnapshotRow>,
    batch_size: usize,
) -> Result<SaveReport> {
    let tx = conn.transaction().map_err(sql("start snapshot transaction"))?;
    let replaced = replace_header(&tx, timestamp, sentinel)?;

    let mut inserter = BatchInserter::new(&tx, timestamp, batch_size);
    insert_observations(&mut inserter, rows)?;
    let (rows_written, batches) = (inserter.rows_flushed, inserter.batches);
    drop(inserter);

    tx.commit().map_err(sql("commit snapshot transaction"))?;
    Ok(SaveReport {
        timestamp,
        replaced,
        sentinel_written: sentinel.is_some(),
        rows_written,
        batches,
    })
}

fn save_per_batch(
    conn: &mut Connection,
    rows: &[RowColumns],
    timestamp: SnapshotTime,
    sentinel: Option<SnapshotRow>,
    batch_size: usize,
) -> Result<SaveReport> {
    let tx = conn.transaction().map_err(sql("start snapshot transaction"))?;
    let replaced = replace_header(&tx, timestamp, sentinel)?;
    tx.commit().map_err(sql("commit snapshot header"))?;

    // Autocommit from here: each batch insert is its own transaction.
    let mut inserter = BatchInserter::new(conn, timestamp, batch_size);
    if let Err(error) = insert_observations(&mut inserter, rows) {
        let rows_committed = inserter.rows_flushed + usize::from(sentinel.is_some());
        warn!(%timestamp, rows_committed, %error, "snapshot write failed after partial commit");
        return Err(Error::PartialSnapshotWrite {
            timestamp,
            rows_committed,
            source: Box::new(error),
        });
    }
    Ok(SaveReport {
        timestamp,
        replaced,
        sentinel_written: sentinel.is_some(),
        rows_written: inserter.rows_flushed,
        batches: inserter.batches,
    })
}

/// Delete the old snapshot and write the default-speed row, if any.
fn replace_header(
    conn: &Connection,
    timestamp: SnapshotTime,
    sentinel: Option<SnapshotRow>,
) -> Result<usize> {
    let replaced = delete_snapshot(conn, timestamp)?;
    if let Some(row) = sentinel {
        let RowColumns {
            key,
            travel_time,
            num_trips,
        } = row.encode();
        conn.execute(
            "INSERT INTO travel_times (begin_node_id, end_node_id, datetime, travel_time, num_trips)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key.begin, key.end, timestamp, travel_time, num_trips],
        )
        .map_err(sql("insert default speed row"))?;
    }
    Ok(replaced)
}

fn insert_observations(inserter: &mut BatchInserter<'_>, rows: &[RowColumns]) -> Result<()> {
    for row in rows {
        inserter.push(*row)?;
    }
    inserter.finish()
}

/// Encode every observed link, failing on the first one `load` could not
/// merge back.
fn observation_rows<G: LinkNetwork>(graph: &G) -> Result<Vec<RowColumns>> {
    graph
        .links()
        .filter(|link| link.is_observed())
        .map(observation_row)
        .collect()
}

fn observation_row(link: &Link) -> Result<RowColumns> {
    let key = link.key();
    if key.is_sentinel() {
        return Err(Error::ReservedLinkKey(key));
    }
    if link.speed_for(link.time).is_none() {
        return Err(Error::DegenerateObservation {
            key,
            length: link.length,
            travel_time: link.time,
        });
    }
    let row = SnapshotRow::observation(key, link.time, link.observation_count)?;
    Ok(row.encode())
}

fn insert_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO travel_times (begin_node_id, end_node_id, datetime, travel_time, num_trips) VALUES ",
    );
    for index in 0..rows {
        if index > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(?, ?, ?, ?, ?)");
    }
    sql
}

fn execute_rows(
    statement: &mut Statement<'_>,
    rows: &[RowColumns],
    timestamp: &SnapshotTime,
) -> rusqlite::Result<usize> {
    let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(rows.len() * COLUMNS_PER_ROW);
    for row in rows {
        bound.push(&row.key.begin);
        bound.push(&row.key.end);
        bound.push(timestamp);
        bound.push(&row.travel_time);
        bound.push(&row.num_trips);
    }
    statement.execute(params_from_iter(bound))
}

// ── Batching ────────────────────────────────────────────────────

struct BatchInserter<'conn> {
    conn: &'conn Connection,
    timestamp: SnapshotTime,
    batch_size: usize,
    /// Template for a full batch, prepared on first use.
    full_batch: Option<Statement<'conn>>,
    pending: Vec<RowColumns>,
    rows_flushed: usize,
    batches: usize,
}

impl<'conn> BatchInserter<'conn> {
    fn new(conn: &'conn Connection, timestamp: SnapshotTime, batch_size: usize) -> Self {
        Self {
            conn,
            timestamp,
            batch_size,
            full_batch: None,
            pending: Vec::with_capacity(batch_size),
            rows_flushed: 0,
            batches: 0,
        }
    }

    fn push(&mut self, row: RowColumns) -> Result<()> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.flush_full()?;
        }
        Ok(())
    }

    fn flush_full(&mut self) -> Result<()> {
        if self.full_batch.is_none() {
            let statement = self
                .conn
                .prepare(&insert_sql(self.batch_size))
                .map_err(sql("prepare batch insert"))?;
            self.full_batch = Some(statement);
        }
        if let Some(statement) = self.full_batch.as_mut() {
            execute_rows(statement, &self.pending, &self.timestamp)
                .map_err(sql("insert snapshot batch"))?;
        }
        self.record_flush();
        Ok(())
    }

    /// Flush whatever is left, however few rows that is.
    fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut tail = self
            .conn
            .prepare(&insert_sql(self.pending.len()))
            .map_err(sql("prepare final batch insert"))?;
        execute_rows(&mut tail, &self.pending, &self.timestamp)
            .map_err(sql("insert final snapshot batch"))?;
        self.record_flush();
        Ok(())
    }

    fn record_flush(&mut self) {
        self.rows_flushed += self.pending.len();
        self.batches += 1;
        debug!(
            timestamp = %self.timestamp,
            batch = self.batches,
            rows = self.pending.len(),
            "flushed snapshot batch"
        );
        self.pending.clear();
    }
}
