//! Rig definition types
//!
//! A rig is described entirely by data: which response prefixes it emits,
//! where the interesting fields sit inside each response, and which command
//! templates it accepts. These types are what a rig configuration file holds.

/// A recognized response line, keyed by its leading prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateDefinition {
    /// Leading token of the response (e.g. `FA`, `IF`)
    pub prefix: String,
    /// Fields to extract from the payload that follows the prefix
    #[cfg_attr(feature = "serde", serde(default))]
    pub markers: Vec<Marker>,
}

impl StateDefinition {
    /// Create a definition with the given prefix and markers
    pub fn new(prefix: impl Into<String>, markers: Vec<Marker>) -> Self {
        Self {
            prefix: prefix.into(),
            markers,
        }
    }

    /// The lookup key: prefix trimmed and upper-cased
    pub fn normalized_prefix(&self) -> String {
        normalize_prefix(&self.prefix)
    }
}

/// Normalize a prefix the way the state table keys it
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().to_ascii_uppercase()
}

/// Byte-range extraction rule over a matched line's payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Marker {
    /// Offset into the payload
    pub index: usize,
    /// Number of bytes to take (clamped to the payload end)
    pub length: usize,
    /// Status field name the value is stored under
    pub tag: String,
    /// Optional enumeration remap, scanned in order
    #[cfg_attr(feature = "serde", serde(default))]
    pub value_mappings: Vec<ValueMapping>,
}

impl Marker {
    /// Create a marker without value mappings
    pub fn new(index: usize, length: usize, tag: impl Into<String>) -> Self {
        Self {
            index,
            length,
            tag: tag.into(),
            value_mappings: Vec::new(),
        }
    }

    /// Add a raw-value to display-value mapping
    pub fn with_mapping(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.value_mappings.push(ValueMapping {
            key: key.into(),
            value: value.into(),
        });
        self
    }
}

/// One entry of a marker's enumeration remap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueMapping {
    /// Raw slice as it appears on the wire
    pub key: String,
    /// Value published in its place
    pub value: String,
}

/// A named outbound command with positional `%s` placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandDefinition {
    /// Name callers use to enqueue the command
    pub name: String,
    /// Wire template, e.g. `FA%s;`
    pub template: String,
}

impl CommandDefinition {
    /// Create a command definition
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }
}
