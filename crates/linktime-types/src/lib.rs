//! Shared data model for linktime snapshots.
//!
//! A snapshot is the sparse set of per-link observations recorded for one
//! timestamp, plus an optional graph-wide default speed. On disk both kinds
//! of record share one row shape; [`SnapshotRow`] is the decoded form the
//! rest of the workspace works with.

use std::fmt;

use facet::Facet;
#[cfg(feature = "rusqlite")]
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantError {
    #[error("observation on {key} must have a positive trip count, got {count}")]
    NonPositiveCount { key: LinkKey, count: i64 },
    #[error("trip count {count} on {key} does not fit in 32 bits")]
    CountOutOfRange { key: LinkKey, count: i64 },
    #[error("default speed row must have a zero trip count, got {count}")]
    SentinelCount { count: i64 },
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("link key {0} is reserved for the default speed row")]
    ReservedKey(LinkKey),
}

// ── Identifiers ─────────────────────────────────────────────────

/// Road network node identifier, as stored in the `BIGINT` node columns.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct NodeId(i64);

impl NodeId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed link identity: `begin -> end`.
///
/// Ordering is lexicographic on `(begin, end)`, which matches the scan order
/// of stored snapshots.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    pub begin: NodeId,
    pub end: NodeId,
}

impl LinkKey {
    /// `(0, 0)`: marks the row that carries the default speed.
    pub const SENTINEL: LinkKey = LinkKey::new(0, 0);

    pub const fn new(begin: i64, end: i64) -> Self {
        Self {
            begin: NodeId::new(begin),
            end: NodeId::new(end),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.begin, self.end)
    }
}

/// Snapshot time key, whole seconds since the Unix epoch.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct SnapshotTime(i64);

impl SnapshotTime {
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_unix_secs(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SnapshotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[cfg(feature = "rusqlite")]
impl ToSql for NodeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.0.into())
    }
}

#[cfg(feature = "rusqlite")]
impl FromSql for NodeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(NodeId(i64::column_result(value)?))
    }
}

#[cfg(feature = "rusqlite")]
impl ToSql for SnapshotTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.0.into())
    }
}

#[cfg(feature = "rusqlite")]
impl FromSql for SnapshotTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(SnapshotTime(i64::column_result(value)?))
    }
}

// ── Rows ────────────────────────────────────────────────────────

/// One decoded snapshot row.
///
/// The stored `travel_time` column holds a speed for the sentinel row and a
/// duration for every other row; decoding splits the two meanings apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotRow {
    /// Graph-wide fallback speed for links with no observation.
    Default { speed: f64 },
    /// Observed travel time on one link, backed by `observation_count` trips.
    Observation {
        key: LinkKey,
        travel_time: f64,
        observation_count: u32,
    },
}

/// Raw column values of a `travel_times` row, minus the timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowColumns {
    pub key: LinkKey,
    pub travel_time: f64,
    pub num_trips: i64,
}

impl SnapshotRow {
    pub fn default_speed(speed: f64) -> Result<Self, InvariantError> {
        if !speed.is_finite() {
            return Err(InvariantError::NonFinite {
                field: "default speed",
                value: speed,
            });
        }
        Ok(Self::Default { speed })
    }

    pub fn observation(
        key: LinkKey,
        travel_time: f64,
        observation_count: u32,
    ) -> Result<Self, InvariantError> {
        if key.is_sentinel() {
            return Err(InvariantError::ReservedKey(key));
        }
        if observation_count == 0 {
            return Err(InvariantError::NonPositiveCount { key, count: 0 });
        }
        if !travel_time.is_finite() {
            return Err(InvariantError::NonFinite {
                field: "travel time",
                value: travel_time,
            });
        }
        Ok(Self::Observation {
            key,
            travel_time,
            observation_count,
        })
    }

    /// Decode stored columns. The `(0, 0)` key selects the default variant.
    pub fn decode(columns: RowColumns) -> Result<Self, InvariantError> {
        let RowColumns {
            key,
            travel_time,
            num_trips,
        } = columns;
        if key.is_sentinel() {
            if num_trips != 0 {
                return Err(InvariantError::SentinelCount { count: num_trips });
            }
            return Self::default_speed(travel_time);
        }
        if num_trips <= 0 {
            return Err(InvariantError::NonPositiveCount {
                key,
                count: num_trips,
            });
        }
        let count = u32::try_from(num_trips).map_err(|_| InvariantError::CountOutOfRange {
            key,
            count: num_trips,
        })?;
        Self::observation(key, travel_time, count)
    }

    pub fn encode(&self) -> RowColumns {
        match *self {
            Self::Default { speed } => RowColumns {
                key: LinkKey::SENTINEL,
                travel_time: speed,
                num_trips: 0,
            },
            Self::Observation {
                key,
                travel_time,
                observation_count,
            } => RowColumns {
                key,
                travel_time,
                num_trips: i64::from(observation_count),
            },
        }
    }
}
