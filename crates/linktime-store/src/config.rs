//! Write-path tunables.
//!
//! Env:
//! - `LINKTIME_BATCH_SIZE`: rows per insert batch (default 5000).
//! - `LINKTIME_WRITE_MODE`: `atomic` (default) or `per-batch`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Bound parameters per `travel_times` row.
pub(crate) const COLUMNS_PER_ROW: usize = 5;

/// Largest batch whose multi-row insert stays under SQLite's 32766 bound
/// parameter limit.
pub const MAX_BATCH_SIZE: usize = 32766 / COLUMNS_PER_ROW;

pub const BATCH_SIZE_ENV: &str = "LINKTIME_BATCH_SIZE";
pub const WRITE_MODE_ENV: &str = "LINKTIME_WRITE_MODE";

/// Commit granularity of [`crate::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Delete, default row and every batch commit together.
    #[default]
    Atomic,
    /// The delete commits first, then every batch commits on its own.
    /// A failure part way through surfaces as
    /// [`Error::PartialSnapshotWrite`].
    PerBatch,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self::Atomic),
            "per-batch" | "per_batch" | "perbatch" => Ok(Self::PerBatch),
            other => Err(Error::InvalidConfig(format!(
                "unknown write mode {other:?}, expected \"atomic\" or \"per-batch\""
            ))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => f.write_str("atomic"),
            Self::PerBatch => f.write_str("per-batch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub batch_size: usize,
    pub write_mode: WriteMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            write_mode: WriteMode::Atomic,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `LINKTIME_*` variables. Malformed values are
    /// errors rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(BATCH_SIZE_ENV) {
            cfg.batch_size = raw.trim().parse::<usize>().map_err(|error| {
                Error::InvalidConfig(format!("{BATCH_SIZE_ENV}={raw:?}: {error}"))
            })?;
        }
        if let Some(raw) = lookup(WRITE_MODE_ENV) {
            cfg.write_mode = raw.parse()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(Error::InvalidConfig(format!(
                "batch size {} outside 1..={MAX_BATCH_SIZE}",
                self.batch_size
            )));
        }
        Ok(())
    }
}
