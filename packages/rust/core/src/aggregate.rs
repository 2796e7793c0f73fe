//! Flattening a result set into renderer-agnostic entries.

use wayback_shared::{FlattenedEntry, ResultSet};

/// One entry per archived pair, in record order, tagged with the record's
/// slot display name.
pub fn flatten(results: &ResultSet) -> Vec<FlattenedEntry> {
    results
        .iter()
        .flat_map(|record| {
            record.dst.iter().map(|(src, dst)| FlattenedEntry {
                slot: record.name.clone(),
                src: src.clone(),
                dst: dst.clone(),
            })
        })
        .collect()
}
