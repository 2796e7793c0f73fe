//! Core domain types: slots, records and result sets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Original URL → archived URL, one entry per successfully archived URL.
pub type Mapping = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One of the fixed archival backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Internet Archive's Wayback Machine.
    Ia,
    /// archive.today single-page snapshots.
    Is,
    /// IPFS content-addressed pinning.
    Ip,
    /// Telegraph permanent pages.
    Ph,
}

impl Slot {
    /// All slots in their configured order.
    pub const ALL: [Slot; 4] = [Slot::Ia, Slot::Is, Slot::Ip, Slot::Ph];

    /// Short identifier used in config keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Ia => "ia",
            Slot::Is => "is",
            Slot::Ip => "ip",
            Slot::Ph => "ph",
        }
    }

    /// Display name shown to users when none is configured.
    pub fn default_name(&self) -> &'static str {
        match self {
            Slot::Ia => "Internet Archive",
            Slot::Is => "archive.today",
            Slot::Ip => "IPFS",
            Slot::Ph => "Telegraph",
        }
    }

    /// Home link of the backend, shown next to its results.
    pub fn default_extra(&self) -> &'static str {
        match self {
            Slot::Ia => "https://web.archive.org/",
            Slot::Is => "https://archive.today/",
            Slot::Ip => "https://ipfs.github.io/public-gateway-checker/",
            Slot::Ph => "https://telegra.ph/",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ia" => Ok(Slot::Ia),
            "is" => Ok(Slot::Is),
            "ip" => Ok(Slot::Ip),
            "ph" => Ok(Slot::Ph),
            other => Err(format!("unknown slot '{other}': expected ia, is, ip or ph")),
        }
    }
}

// ---------------------------------------------------------------------------
// Slot registry
// ---------------------------------------------------------------------------

/// A slot together with its resolved display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: Slot,
    pub enabled: bool,
    /// Display name.
    pub name: String,
    /// Auxiliary metadata (the backend's home link).
    pub extra: String,
}

impl SlotInfo {
    /// Slot metadata with the built-in name and home link.
    pub fn with_defaults(slot: Slot, enabled: bool) -> Self {
        Self {
            slot,
            enabled,
            name: slot.default_name().to_string(),
            extra: slot.default_extra().to_string(),
        }
    }
}

/// Which slots exist, which are enabled, and how they are displayed.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRegistry {
    slots: Vec<SlotInfo>,
}

impl SlotRegistry {
    /// Build a registry; later duplicates of a slot are ignored.
    pub fn new(slots: impl IntoIterator<Item = SlotInfo>) -> Self {
        let mut unique: Vec<SlotInfo> = Vec::new();
        for info in slots {
            if !unique.iter().any(|s| s.slot == info.slot) {
                unique.push(info);
            }
        }
        Self { slots: unique }
    }

    /// Enabled slots in configured order.
    pub fn enabled(&self) -> impl Iterator<Item = &SlotInfo> {
        self.slots.iter().filter(|s| s.enabled)
    }

    /// Metadata for one slot.
    pub fn get(&self, slot: Slot) -> Option<&SlotInfo> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    /// Keep only the given slots enabled.
    pub fn restrict_to(&mut self, allowed: &[Slot]) {
        for info in &mut self.slots {
            info.enabled = allowed.contains(&info.slot);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// Record / ResultSet
// ---------------------------------------------------------------------------

/// One backend's result for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub slot: Slot,
    /// Slot display name.
    pub name: String,
    /// Slot auxiliary metadata.
    pub extra: String,
    /// Archived URLs; empty when the backend failed.
    pub dst: Mapping,
}

impl Record {
    pub fn new(info: &SlotInfo, dst: Mapping) -> Self {
        Self {
            slot: info.slot,
            name: info.name.clone(),
            extra: info.extra.clone(),
            dst,
        }
    }

    /// A record for a slot whose backend produced nothing.
    pub fn empty(info: &SlotInfo) -> Self {
        Self::new(info, Mapping::new())
    }
}

/// Records produced by one dispatch, in completion order, one per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    records: Vec<Record>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns `false` and drops it if its slot is already present.
    pub fn push(&mut self, record: Record) -> bool {
        if self.contains(record.slot) {
            tracing::warn!(slot = %record.slot, "duplicate record for slot dropped");
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.records.iter().any(|r| r.slot == slot)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any record carries at least one archived URL.
    pub fn has_results(&self) -> bool {
        self.records.iter().any(|r| !r.dst.is_empty())
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// FlattenedEntry
// ---------------------------------------------------------------------------

/// A single (slot, original URL, archived URL) triple used for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedEntry {
    /// Display name of the slot the pair came from.
    pub slot: String,
    /// Original URL.
    pub src: String,
    /// Archived URL.
    pub dst: String,
}
