//! SQLite-backed store for time-indexed link travel time snapshots.
//!
//! One snapshot per timestamp lives in `travel_times`: a row per observed
//! link plus, optionally, a `(0, 0)` row carrying the graph's default speed.
//! [`save`] replaces a timestamp's rows from a graph, [`load`] merges them
//! back onto one.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub mod config;
mod error;
mod link_counts;
mod reader;
mod schema;
mod writer;

pub use config::{StoreConfig, WriteMode};
pub use error::{Error, Result};
pub use link_counts::{
    LinkCount, create_link_counts_table, drop_link_counts_table, load_link_counts,
    save_link_counts,
};
pub use reader::{LoadReport, load};
pub use schema::{
    available_timestamps, create_schema, delete_snapshot, drop_schema, pretty_size, table_size,
};
pub use writer::{SaveReport, save};

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(|source| Error::StorageUnavailable {
            context: format!("open {}", self.path.display()),
            source,
        })
    }

    /// Open and make sure both tables exist.
    pub fn open_initialized(&self) -> Result<Connection> {
        let conn = self.open()?;
        create_schema(&conn)?;
        create_link_counts_table(&conn)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_path_is_storage_unavailable() {
        let db = Db::new(PathBuf::from("/nonexistent-linktime-dir/sub/db.sqlite"));
        let err = db.open().unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }), "got {err}");
    }

    #[test]
    fn file_backed_database_persists_between_connections() {
        use linktime_graph::{Link, LinkNetwork, RoadGraph};
        use linktime_types::SnapshotTime;

        let path = std::env::temp_dir().join(format!(
            "linktime-store-test-{}-{}.sqlite",
            std::process::id(),
            line!()
        ));
        let _ = std::fs::remove_file(&path);
        let db = Db::new(path.clone());

        let mut graph = RoadGraph::from_links([Link::new(1, 2, 30.0)]).unwrap();
        graph.set_default_speed(Some(6.0));
        let t = SnapshotTime::from_unix_secs(1_700_000_000);
        {
            let mut conn = db.open_initialized().unwrap();
            save(&mut conn, &graph, t, &StoreConfig::default()).unwrap();
        }

        let conn = db.open_initialized().unwrap();
        assert_eq!(available_timestamps(&conn).unwrap(), vec![t]);
        let mut fresh = RoadGraph::from_links([Link::new(1, 2, 30.0)]).unwrap();
        load(&conn, &mut fresh, t).unwrap();
        assert!(fresh.links().all(|link| link.speed == 6.0));

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }
}
