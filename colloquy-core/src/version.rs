//! Version metadata stored in the document.
//!
//! The versions array and the config map are written by the coordination
//! server; clients only read them, apart from the auto-versioning settings
//! which any client may flip.

use chrono::{DateTime, Utc};
use serde::Serialize;
use yrs::{Any, Array, ArrayRef, Doc, Map, MapRef, Out, ReadTxn, Transact};

use crate::json::{any_as_u64, any_is_truthy};
use crate::layout::DocumentLayout;
use crate::origin::UpdateOrigin;

/// One entry of the version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// 0-based and monotonically increasing
    pub version: u64,
    pub name: Option<String>,
    /// Milliseconds since the Unix epoch
    pub date: Option<i64>,
}

impl VersionRecord {
    /// Read a record; `index` stands in for a missing `version` field.
    fn read_out<T: ReadTxn>(txn: &T, out: &Out, index: u64) -> Option<Self> {
        match out {
            Out::Any(Any::Map(fields)) => Some(Self::from_fields(
                index,
                fields.get("version"),
                fields.get("name"),
                fields.get("date"),
            )),
            Out::YMap(map) => {
                let get = |key: &str| match map.get(txn, key) {
                    Some(Out::Any(any)) => Some(any),
                    _ => None,
                };
                Some(Self::from_fields(
                    index,
                    get("version").as_ref(),
                    get("name").as_ref(),
                    get("date").as_ref(),
                ))
            }
            _ => None,
        }
    }

    fn from_fields(
        index: u64,
        version: Option<&Any>,
        name: Option<&Any>,
        date: Option<&Any>,
    ) -> Self {
        Self {
            version: version.and_then(any_as_u64).unwrap_or(index),
            name: match name {
                Some(Any::String(s)) => Some(s.to_string()),
                _ => None,
            },
            date: date.and_then(|d| match d {
                Any::Number(f) => Some(*f as i64),
                Any::BigInt(i) => Some(*i),
                _ => None,
            }),
        }
    }
}

/// Highest version number for a history of `count` entries.
pub fn latest_version(count: usize) -> u64 {
    count.saturating_sub(1) as u64
}

/// Read every version record in order. Entries that are not maps are
/// skipped.
pub fn read_versions<T: ReadTxn>(txn: &T, versions: &ArrayRef) -> Vec<VersionRecord> {
    versions
        .iter(txn)
        .enumerate()
        .filter_map(|(index, out)| VersionRecord::read_out(txn, &out, index as u64))
        .collect()
}

/// Versioning settings held in the config map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionConfig {
    pub auto_versioning: bool,
    pub interval_seconds: Option<u64>,
    pub current_version: u64,
    pub last_saved: Option<DateTime<Utc>>,
}

impl VersionConfig {
    pub const AUTO_VERSIONING: &'static str = "autoVersioning";
    pub const INTERVAL_SECONDS: &'static str = "intervalSeconds";
    pub const CURRENT_VERSION: &'static str = "currentVersion";
    pub const LAST_SAVED: &'static str = "lastSaved";

    pub fn read<T: ReadTxn>(txn: &T, config: &MapRef) -> Self {
        let get = |key: &str| match config.get(txn, key) {
            Some(Out::Any(any)) => Some(any),
            _ => None,
        };
        Self {
            auto_versioning: get(Self::AUTO_VERSIONING)
                .map(|any| any_is_truthy(&any))
                .unwrap_or(false),
            interval_seconds: get(Self::INTERVAL_SECONDS).and_then(|any| any_as_u64(&any)),
            current_version: get(Self::CURRENT_VERSION)
                .and_then(|any| any_as_u64(&any))
                .unwrap_or(0),
            last_saved: get(Self::LAST_SAVED).and_then(|any| parse_saved_at(&any)),
        }
    }
}

/// `lastSaved` arrives either as an RFC 3339 string or as epoch millis.
fn parse_saved_at(any: &Any) -> Option<DateTime<Utc>> {
    match any {
        Any::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Any::Number(ms) => DateTime::from_timestamp_millis(*ms as i64),
        Any::BigInt(ms) => DateTime::from_timestamp_millis(*ms),
        _ => None,
    }
}

/// Handles to the version roots of one document.
#[derive(Clone)]
pub struct HistoryDocument {
    doc: Doc,
    versions: ArrayRef,
    config: MapRef,
}

impl HistoryDocument {
    pub fn new(doc: &Doc) -> Self {
        Self::with_layout(doc, &DocumentLayout::default())
    }

    pub fn with_layout(doc: &Doc, layout: &DocumentLayout) -> Self {
        Self {
            doc: doc.clone(),
            versions: layout.versions(doc),
            config: layout.config(doc),
        }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn versions_ref(&self) -> &ArrayRef {
        &self.versions
    }

    pub fn config_ref(&self) -> &MapRef {
        &self.config
    }

    pub fn versions(&self) -> Vec<VersionRecord> {
        let txn = self.doc.transact();
        read_versions(&txn, &self.versions)
    }

    pub fn config(&self) -> VersionConfig {
        let txn = self.doc.transact();
        VersionConfig::read(&txn, &self.config)
    }

    /// Write the auto-versioning flag as `1` / `0`.
    pub fn set_auto_versioning(&self, enabled: bool) {
        let mut txn = self.doc.transact_mut_with(UpdateOrigin::Local);
        let flag = if enabled { 1.0 } else { 0.0 };
        self.config
            .insert(&mut txn, VersionConfig::AUTO_VERSIONING, Any::Number(flag));
    }

    pub fn set_interval_seconds(&self, seconds: u64) {
        let mut txn = self.doc.transact_mut_with(UpdateOrigin::Local);
        self.config.insert(
            &mut txn,
            VersionConfig::INTERVAL_SECONDS,
            Any::Number(seconds as f64),
        );
    }
}
