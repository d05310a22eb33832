//! Status field extraction
//!
//! Turns a [`MatchedLine`] into a [`StatusSnapshot`] by slicing the payload
//! at each marker's byte range and applying its optional value remap.

use std::collections::HashMap;

use tracing::warn;

use crate::definition::Marker;
use crate::matcher::MatchedLine;

/// Tag -> value view of everything resolved from one response line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct StatusSnapshot {
    fields: HashMap<String, String>,
}

impl StatusSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field by tag
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag).map(String::as_str)
    }

    /// Store a field, replacing any previous value for the tag
    pub fn insert(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(tag.into(), value.into());
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were resolved
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over (tag, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Consume the snapshot into its underlying map
    pub fn into_inner(self) -> HashMap<String, String> {
        self.fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolve a single marker against a payload
///
/// Offsets are byte offsets into the raw payload; only the selected bytes are
/// decoded, lossily. Returns `None` when the marker's range falls outside the
/// payload or selects nothing. A mapped marker whose raw value has no mapping
/// resolves to an empty string.
pub fn resolve_marker(marker: &Marker, data: &[u8]) -> Option<String> {
    if marker.index >= data.len() {
        warn!(
            tag = %marker.tag,
            index = marker.index,
            data_len = data.len(),
            "marker index out of range, skipping"
        );
        return None;
    }

    let end = marker.index.saturating_add(marker.length).min(data.len());
    if marker.index >= end {
        return None;
    }

    let raw = String::from_utf8_lossy(&data[marker.index..end]);
    if marker.value_mappings.is_empty() {
        return Some(raw.into_owned());
    }

    Some(
        marker
            .value_mappings
            .iter()
            .find(|m| m.key == raw.as_ref())
            .map(|m| m.value.clone())
            .unwrap_or_default(),
    )
}

/// Extract every marker of a matched line into a snapshot
///
/// Markers are independent: a bad range only drops that marker's tag.
pub fn extract_status(line: &MatchedLine) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new();
    for marker in &line.markers {
        if let Some(value) = resolve_marker(marker, &line.data) {
            snapshot.insert(marker.tag.clone(), value);
        }
    }
    snapshot
}
