use std::path::PathBuf;

use facet::Facet;
use figue as args;
use linktime_graph::{LinkNetwork, RoadGraph};
use linktime_store::{Db, StoreConfig, WriteMode};
use linktime_types::SnapshotTime;
use tracing::info;

type AnyResult<T> = Result<T, String>;

const DB_ENV: &str = "LINKTIME_DB";
const DEFAULT_DB_PATH: &str = "linktime.sqlite";

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// SQLite database file (env LINKTIME_DB).
    #[facet(args::named, default)]
    db: Option<String>,
    /// Rows per insert batch (env LINKTIME_BATCH_SIZE).
    #[facet(args::named, default)]
    batch_size: Option<usize>,
    /// Commit every batch on its own instead of one transaction per save.
    #[facet(args::named, default)]
    per_batch_commit: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    /// Create the snapshot and link count tables.
    Init,
    /// Drop the snapshot and link count tables.
    Drop,
    /// Delete the snapshot stored for one timestamp.
    Delete {
        #[facet(args::named)]
        at: i64,
    },
    /// List timestamps that have a stored snapshot.
    Dates,
    /// Report the storage used by snapshots.
    Size,
    /// Store the observations of a network file as the snapshot for a timestamp.
    Save {
        #[facet(args::named)]
        network: String,
        #[facet(args::named)]
        at: i64,
    },
    /// Merge a stored snapshot onto a network file.
    Load {
        #[facet(args::named)]
        network: String,
        #[facet(args::named)]
        at: i64,
        #[facet(args::named, default)]
        out: Option<String>,
    },
}

struct Settings {
    db_path: PathBuf,
    store: StoreConfig,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> AnyResult<()> {
    let cli = parse_cli()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let env_store = StoreConfig::from_env().map_err(|e| e.to_string())?;
    let settings = resolve_settings(
        cli.db.as_deref(),
        std::env::var(DB_ENV).ok().as_deref(),
        cli.batch_size,
        cli.per_batch_commit,
        env_store,
    )?;
    let db = Db::new(settings.db_path.clone());
    info!(db = %db.path().display(), "using snapshot store");

    dispatch(&db, &settings.store, cli.command)
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("linktime")
                .description("Store and replay per-link travel time snapshots")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

/// Flags win over environment values, which win over defaults.
fn resolve_settings(
    db_flag: Option<&str>,
    db_env: Option<&str>,
    batch_size: Option<usize>,
    per_batch_commit: bool,
    env_store: StoreConfig,
) -> AnyResult<Settings> {
    let db_path = PathBuf::from(db_flag.or(db_env).unwrap_or(DEFAULT_DB_PATH));

    let mut store = env_store;
    if let Some(batch_size) = batch_size {
        store = store.with_batch_size(batch_size);
    }
    if per_batch_commit {
        store = store.with_write_mode(WriteMode::PerBatch);
    }
    store.validate().map_err(|e| e.to_string())?;

    Ok(Settings { db_path, store })
}

fn dispatch(db: &Db, store: &StoreConfig, command: CommandKind) -> AnyResult<()> {
    match command {
        CommandKind::Init => {
            db.open_initialized().map_err(|e| e.to_string())?;
            println!("initialized {}", db.path().display());
        }
        CommandKind::Drop => {
            let conn = db.open().map_err(|e| e.to_string())?;
            linktime_store::drop_schema(&conn).map_err(|e| e.to_string())?;
            linktime_store::drop_link_counts_table(&conn).map_err(|e| e.to_string())?;
            println!("dropped tables in {}", db.path().display());
        }
        CommandKind::Delete { at } => {
            let conn = db.open_initialized().map_err(|e| e.to_string())?;
            let removed = linktime_store::delete_snapshot(&conn, SnapshotTime::from_unix_secs(at))
                .map_err(|e| e.to_string())?;
            println!("removed {removed} rows at {at}");
        }
        CommandKind::Dates => {
            let conn = db.open_initialized().map_err(|e| e.to_string())?;
            for timestamp in
                linktime_store::available_timestamps(&conn).map_err(|e| e.to_string())?
            {
                println!("{}", timestamp.as_unix_secs());
            }
        }
        CommandKind::Size => {
            let conn = db.open_initialized().map_err(|e| e.to_string())?;
            let bytes = linktime_store::table_size(&conn).map_err(|e| e.to_string())?;
            println!("{}", linktime_store::pretty_size(bytes));
        }
        CommandKind::Save { network, at } => {
            let graph = RoadGraph::read_file(&PathBuf::from(&network))
                .map_err(|e| format!("failed to read network: {e}"))?;
            let mut conn = db.open_initialized().map_err(|e| e.to_string())?;
            let report = linktime_store::save(
                &mut conn,
                &graph,
                SnapshotTime::from_unix_secs(at),
                store,
            )
            .map_err(|e| e.to_string())?;
            println!(
                "saved {} observed links at {at} in {} batches (default speed: {})",
                report.rows_written,
                report.batches,
                if report.sentinel_written { "yes" } else { "no" }
            );
        }
        CommandKind::Load { network, at, out } => {
            let mut graph = RoadGraph::read_file(&PathBuf::from(&network))
                .map_err(|e| format!("failed to read network: {e}"))?;
            let conn = db.open_initialized().map_err(|e| e.to_string())?;
            let report =
                linktime_store::load(&conn, &mut graph, SnapshotTime::from_unix_secs(at))
                    .map_err(|e| e.to_string())?;
            println!(
                "applied {} observations at {at}, skipped {} unknown links, default speed {}",
                report.applied,
                report.skipped,
                graph
                    .default_speed()
                    .map(|speed| speed.to_string())
                    .unwrap_or_else(|| "none".into())
            );
            if let Some(out) = out {
                graph
                    .write_file(&PathBuf::from(&out))
                    .map_err(|e| format!("failed to write network: {e}"))?;
                println!("wrote {out}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_env_and_defaults() {
        let env = StoreConfig::default().with_batch_size(300);
        let settings =
            resolve_settings(Some("flag.sqlite"), Some("env.sqlite"), Some(10), true, env)
                .expect("settings should resolve");
        assert_eq!(settings.db_path, PathBuf::from("flag.sqlite"));
        assert_eq!(settings.store.batch_size, 10);
        assert_eq!(settings.store.write_mode, WriteMode::PerBatch);
    }

    #[test]
    fn env_then_default_db_path() {
        let settings =
            resolve_settings(None, Some("env.sqlite"), None, false, StoreConfig::default())
                .unwrap();
        assert_eq!(settings.db_path, PathBuf::from("env.sqlite"));
        assert_eq!(settings.store, StoreConfig::default());

        let settings = resolve_settings(None, None, None, false, StoreConfig::default()).unwrap();
        assert_eq!(settings.db_path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn out_of_range_batch_flag_is_rejected() {
        assert!(resolve_settings(None, None, Some(0), false, StoreConfig::default()).is_err());
    }
}
