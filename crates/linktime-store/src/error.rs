use linktime_types::{InvariantError, LinkKey, SnapshotTime};
use rusqlite::ErrorCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The database could not be opened or stopped answering. Not retried.
    #[error("storage unavailable ({context}): {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{context}: {source}")]
    Sql {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Per-batch commits were in use and the call failed after the old
    /// snapshot was already deleted.
    #[error(
        "snapshot {timestamp} partially written, {rows_committed} rows committed before failure: {source}"
    )]
    PartialSnapshotWrite {
        timestamp: SnapshotTime,
        rows_committed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error(
        "degenerate observation on {key}: length {length}, travel time {travel_time}"
    )]
    DegenerateObservation {
        key: LinkKey,
        length: f64,
        travel_time: f64,
    },

    #[error("observed link {0} uses the reserved default-speed key")]
    ReservedLinkKey(LinkKey),

    #[error("corrupt row in snapshot {timestamp}: {source}")]
    CorruptRow {
        timestamp: SnapshotTime,
        #[source]
        source: InvariantError,
    },

    #[error("invalid store config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// `map_err` adapter tagging a rusqlite failure with the operation that hit it.
///
/// Failures that mean the database itself is gone (cannot open, I/O, not a
/// database, locked) become [`Error::StorageUnavailable`].
pub(crate) fn sql(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |source| {
        let unavailable = matches!(
            source.sqlite_error_code(),
            Some(
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
            )
        );
        if unavailable {
            Error::StorageUnavailable {
                context: context.to_string(),
                source,
            }
        } else {
            Error::Sql { context, source }
        }
    }
}
