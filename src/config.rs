use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a reader bounds the versions it may observe for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadBound {
    /// Bound by the reader's own snapshot id: repeated reads of a key see the
    /// same version for the lifetime of the transaction.
    Snapshot,
    /// Bound by the key's watermark after the reader's own bump. Newer
    /// committed versions become visible to an older snapshot once they land,
    /// so reads are not repeatable.
    Watermark,
}

impl ReadBound {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "watermark" => Ok(ReadBound::Watermark),
            "snapshot" => Ok(ReadBound::Snapshot),
            other => Err(Error::InvalidConfig(format!("unknown read bound: {other}"))),
        }
    }
}

/// Tuning knobs for [`MvccEngine`](crate::MvccEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transactions buffering more operations than this commit behind a latch
    /// so waiting readers park instead of spinning.
    pub latch_threshold: usize,
    /// GC-entry count above which a commit triggers a collection pass.
    pub gc_threshold: usize,
    pub auto_gc: bool,
    pub read_bound: ReadBound,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latch_threshold: 10,
            gc_threshold: 10_000,
            auto_gc: true,
            read_bound: ReadBound::Snapshot,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `OXIDB_MVCC_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup("OXIDB_MVCC_LATCH_THRESHOLD") {
            config.latch_threshold = parse_number("OXIDB_MVCC_LATCH_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("OXIDB_MVCC_GC_THRESHOLD") {
            config.gc_threshold = parse_number("OXIDB_MVCC_GC_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("OXIDB_MVCC_AUTO_GC") {
            config.auto_gc = match raw.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "OXIDB_MVCC_AUTO_GC must be a boolean, got {other}"
                    )));
                }
            };
        }
        if let Some(raw) = lookup("OXIDB_MVCC_READ_BOUND") {
            config.read_bound = ReadBound::parse(&raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gc_threshold == 0 {
            return Err(Error::InvalidConfig("gc_threshold must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_number(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{name} must be an integer, got {raw}")))
}
