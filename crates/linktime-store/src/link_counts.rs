//! Per-link trip statistics aggregated over all snapshots.
//!
//! Unlike `travel_times` this table has no time key: a save replaces its
//! whole content.

use linktime_types::LinkKey;
use rusqlite::{Connection, params};
use tracing::info;

use crate::error::{Result, sql};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkCount {
    pub key: LinkKey,
    /// Mean trips per snapshot.
    pub avg_num_trips: f64,
    /// Fraction of snapshots in which the link was observed.
    pub perc_obs: f64,
}

pub fn create_link_counts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS link_counts (
            begin_node_id BIGINT,
            end_node_id BIGINT,
            avg_num_trips FLOAT,
            perc_obs FLOAT
        );",
    )
    .map_err(sql("create link_counts"))
}

pub fn drop_link_counts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS link_counts;")
        .map_err(sql("drop link_counts"))
}

/// Replace the table content with `counts` in one transaction.
pub fn save_link_counts(conn: &mut Connection, counts: &[LinkCount]) -> Result<usize> {
    let tx = conn
        .transaction()
        .map_err(sql("start link_counts transaction"))?;
    tx.execute("DELETE FROM link_counts", [])
        .map_err(sql("clear link_counts"))?;
    {
        let mut insert = tx
            .prepare(
                "INSERT INTO link_counts (begin_node_id, end_node_id, avg_num_trips, perc_obs)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(sql("prepare link_counts insert"))?;
        for count in counts {
            insert
                .execute(params![
                    count.key.begin,
                    count.key.end,
                    count.avg_num_trips,
                    count.perc_obs
                ])
                .map_err(sql("insert link count"))?;
        }
    }
    tx.commit().map_err(sql("commit link_counts"))?;
    info!(rows = counts.len(), "saved link counts");
    Ok(counts.len())
}

/// Every stored link count, ordered by link key.
pub fn load_link_counts(conn: &Connection) -> Result<Vec<LinkCount>> {
    let mut stmt = conn
        .prepare(
            "SELECT begin_node_id, end_node_id, avg_num_trips, perc_obs
             FROM link_counts
             ORDER BY begin_node_id, end_node_id",
        )
        .map_err(sql("prepare link_counts read"))?;
    let counts = stmt
        .query_map([], |row| {
            Ok(LinkCount {
                key: LinkKey {
                    begin: row.get(0)?,
                    end: row.get(1)?,
                },
                avg_num_trips: row.get(2)?,
                perc_obs: row.get(3)?,
            })
        })
        .map_err(sql("query link_counts"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql("read link count"))?;
    Ok(counts)
}
