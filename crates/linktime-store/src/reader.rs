//! Snapshot read path: merge one stored timestamp onto a graph.
//!
//! Every link's observation count is reset before the scan, so after a load
//! `observation_count > 0` means exactly "this snapshot has a row for the
//! link". The default speed only lands on links where that is false, which
//! keeps observed speeds authoritative wherever the sentinel row falls in the
//! stream.

use linktime_graph::LinkNetwork;
use linktime_types::{LinkKey, RowColumns, SnapshotRow, SnapshotTime};
use rusqlite::{Connection, Row, params};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, sql};

const SNAPSHOT_SCAN_SQL: &str = "SELECT begin_node_id, end_node_id, travel_time, num_trips
     FROM travel_times
     WHERE datetime = ?1
     ORDER BY begin_node_id, end_node_id";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadReport {
    pub timestamp: SnapshotTime,
    /// Default speed carried by the snapshot, if it had one.
    pub default_speed: Option<f64>,
    /// Observation rows merged onto existing links.
    pub applied: usize,
    /// Observation rows for links the graph does not have.
    pub skipped: usize,
}

/// Merge the snapshot stored for `timestamp` onto `graph`.
///
/// Links without a row end with `observation_count == 0` and keep their
/// `time`; their `speed` becomes the snapshot's default speed when it has
/// one and is left alone otherwise. An empty snapshot is not an error.
///
/// On error the graph may have been partially updated.
pub fn load<G: LinkNetwork>(
    conn: &Connection,
    graph: &mut G,
    timestamp: SnapshotTime,
) -> Result<LoadReport> {
    let mut statement = conn
        .prepare(SNAPSHOT_SCAN_SQL)
        .map_err(sql("prepare snapshot scan"))?;
    let mut rows = statement
        .query(params![timestamp])
        .map_err(sql("query snapshot"))?;

    for link in graph.links_mut() {
        link.observation_count = 0;
    }

    let mut report = LoadReport {
        timestamp,
        default_speed: None,
        applied: 0,
        skipped: 0,
    };
    while let Some(row) = rows.next().map_err(sql("read snapshot row"))? {
        let decoded = decode_row(row, timestamp)?;
        merge_row(graph, decoded, &mut report)?;
    }

    info!(
        %timestamp,
        applied = report.applied,
        skipped = report.skipped,
        default = ?report.default_speed,
        "loaded snapshot"
    );
    Ok(report)
}

fn decode_row(row: &Row<'_>, timestamp: SnapshotTime) -> Result<SnapshotRow> {
    let columns = RowColumns {
        key: LinkKey {
            begin: row.get(0).map_err(sql("read begin_node_id"))?,
            end: row.get(1).map_err(sql("read end_node_id"))?,
        },
        travel_time: row.get(2).map_err(sql("read travel_time"))?,
        num_trips: row.get(3).map_err(sql("read num_trips"))?,
    };
    SnapshotRow::decode(columns).map_err(|source| Error::CorruptRow { timestamp, source })
}

fn merge_row<G: LinkNetwork>(
    graph: &mut G,
    row: SnapshotRow,
    report: &mut LoadReport,
) -> Result<()> {
    match row {
        SnapshotRow::Default { speed } => {
            if report.default_speed.is_some() {
                warn!(
                    timestamp = %report.timestamp,
                    speed,
                    "snapshot has more than one default speed row"
                );
            }
            report.default_speed = Some(speed);
            graph.set_default_speed(Some(speed));
            for link in graph.links_mut().filter(|link| !link.is_observed()) {
                link.speed = speed;
            }
        }
        SnapshotRow::Observation {
            key,
            travel_time,
            observation_count,
        } => {
            let Some(link) = graph.link_mut(key) else {
                debug!(%key, "snapshot row for unknown link");
                report.skipped += 1;
                return Ok(());
            };
            let speed = link
                .speed_for(travel_time)
                .ok_or(Error::DegenerateObservation {
                    key,
                    length: link.length,
                    travel_time,
                })?;
            link.time = travel_time;
            link.speed = speed;
            link.observation_count = observation_count;
            report.applied += 1;
        }
    }
    Ok(())
}
