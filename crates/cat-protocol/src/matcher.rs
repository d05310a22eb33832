//! Longest-prefix response matching
//!
//! Every inbound line is classified against the configured set of
//! [`StateDefinition`]s. Prefixes are compared case-insensitively and the
//! longest registered prefix wins, so `IFA` beats `IF` for the line `IFA123`.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::warn;

use crate::definition::{Marker, StateDefinition};
use crate::error::ProtocolError;

/// Shortest prefix the matcher will consider
pub const MIN_PREFIX_LEN: usize = 2;

/// A line that matched a state definition, ready for extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedLine {
    /// Normalized prefix of the matched definition
    pub prefix: String,
    /// Markers copied from the matched definition
    pub markers: Vec<Marker>,
    /// Raw payload following the matched prefix; marker offsets index these bytes
    pub data: Vec<u8>,
}

impl MatchedLine {
    /// Payload as text, for logging
    pub fn data_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Immutable prefix -> definition lookup table
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: HashMap<String, StateDefinition>,
    max_prefix_len: usize,
}

impl StateTable {
    /// Build the table from configured definitions
    ///
    /// Fails if any prefix is blank after trimming. When two definitions
    /// normalize to the same key the later one replaces the earlier.
    pub fn build(definitions: &[StateDefinition]) -> Result<Self, ProtocolError> {
        let mut states = HashMap::with_capacity(definitions.len());
        let mut max_prefix_len = 0;

        for (index, def) in definitions.iter().enumerate() {
            let key = def.normalized_prefix();
            if key.is_empty() {
                return Err(ProtocolError::EmptyStatePrefix { index });
            }
            max_prefix_len = max_prefix_len.max(key.len());
            if states.insert(key.clone(), def.clone()).is_some() {
                warn!(prefix = %key, index, "duplicate state prefix, later definition wins");
            }
        }

        Ok(Self {
            states,
            max_prefix_len,
        })
    }

    /// Length of the longest registered prefix
    pub fn max_prefix_len(&self) -> usize {
        self.max_prefix_len
    }

    /// Number of distinct prefixes
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no prefixes are registered
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Get a definition by (un-normalized) prefix
    pub fn get(&self, prefix: &str) -> Option<&StateDefinition> {
        self.states.get(&crate::definition::normalize_prefix(prefix))
    }

    /// Find the definition for a raw line
    ///
    /// Returns the definition and the number of leading bytes it consumed.
    pub fn lookup(&self, line: &[u8]) -> Option<(&StateDefinition, usize)> {
        if line.len() < MIN_PREFIX_LEN {
            return None;
        }

        let probe_len = self.max_prefix_len.min(line.len()).max(MIN_PREFIX_LEN);
        let probe = line[..probe_len].to_ascii_uppercase();

        for len in (MIN_PREFIX_LEN..=probe_len).rev() {
            let Ok(key) = std::str::from_utf8(probe[..len].trim_ascii()) else {
                continue;
            };
            if let Some(def) = self.states.get(key) {
                return Some((def, len));
            }
        }

        None
    }

    /// Match a raw line and split off its payload
    pub fn match_line(&self, line: &[u8]) -> Option<MatchedLine> {
        let (def, consumed) = self.lookup(line)?;
        Some(MatchedLine {
            prefix: def.normalized_prefix(),
            markers: def.markers.clone(),
            data: line[consumed..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(prefixes: &[&str]) -> StateTable {
        let defs: Vec<_> = prefixes
            .iter()
            .map(|p| StateDefinition::new(*p, vec![Marker::new(0, 1, *p)]))
            .collect();
        StateTable::build(&defs).unwrap()
    }

    #[test]
    fn test_build_rejects_blank_prefix() {
        let defs = vec![
            StateDefinition::new("FA", vec![]),
            StateDefinition::new("   ", vec![]),
        ];
        assert_eq!(
            StateTable::build(&defs).unwrap_err(),
            ProtocolError::EmptyStatePrefix { index: 1 }
        );
    }

    #[test]
    fn test_build_tracks_max_prefix() {
        let t = table(&["FA", "IF", "ZZFA"]);
        assert_eq!(t.max_prefix_len(), 4);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_duplicate_prefix_last_wins() {
        let defs = vec![
            StateDefinition::new("fa", vec![Marker::new(0, 1, "first")]),
            StateDefinition::new("FA ", vec![Marker::new(0, 1, "second")]),
        ];
        let t = StateTable::build(&defs).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("FA").unwrap().markers[0].tag, "second");
    }

    #[test]
    fn test_short_lines_never_match() {
        let t = table(&["FA"]);
        assert!(t.lookup(b"").is_none());
        assert!(t.lookup(b"F").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let t = table(&["AB", "ABCD"]);

        let (def, len) = t.lookup(b"ABCDxyz").unwrap();
        assert_eq!(def.prefix, "ABCD");
        assert_eq!(len, 4);

        let (def, len) = t.lookup(b"ABxyz").unwrap();
        assert_eq!(def.prefix, "AB");
        assert_eq!(len, 2);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let t = table(&["FA"]);
        let (def, _) = t.lookup(b"fa00014250000").unwrap();
        assert_eq!(def.prefix, "FA");
    }

    #[test]
    fn test_unknown_line_is_not_matched() {
        let t = table(&["FA", "MD"]);
        assert!(t.lookup(b"XY123").is_none());
    }

    #[test]
    fn test_line_shorter_than_longest_prefix() {
        let t = table(&["FA", "ZZFA"]);
        let (def, len) = t.lookup(b"FA").unwrap();
        assert_eq!(def.prefix, "FA");
        assert_eq!(len, 2);
    }

    #[test]
    fn test_match_line_splits_payload() {
        let t = table(&["FA"]);
        let matched = t.match_line(b"FA00014250000").unwrap();
        assert_eq!(matched.prefix, "FA");
        assert_eq!(matched.data, b"00014250000");
        assert_eq!(matched.markers.len(), 1);
    }

    #[test]
    fn test_match_line_keeps_raw_payload_bytes() {
        let t = table(&["FA"]);
        let matched = t.match_line(b"FA\xFF123").unwrap();
        assert_eq!(matched.data, b"\xFF123");
        assert_eq!(matched.data_lossy(), "\u{FFFD}123");
    }

    #[test]
    fn test_empty_table_matches_nothing() {
        let t = StateTable::build(&[]).unwrap();
        assert!(t.is_empty());
        assert!(t.lookup(b"FA123").is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn short_input_never_matches(bytes in proptest::collection::vec(any::<u8>(), 0..2)) {
                let t = table(&["FA", "IF", "ZZFA"]);
                prop_assert!(t.lookup(&bytes).is_none());
            }

            #[test]
            fn registered_prefix_always_matches(payload in "[0-9]{0,16}") {
                let t = table(&["AB", "ABCD"]);
                let line = format!("ABCD{payload}");
                let (def, len) = t.lookup(line.as_bytes()).unwrap();
                prop_assert_eq!(def.prefix.as_str(), "ABCD");
                prop_assert_eq!(len, 4);
            }
        }
    }
}
