//! CAT Protocol Library
//!
//! This crate provides the table-driven core of a CAT (Computer Aided
//! Transceiver) control link. Nothing here is specific to one manufacturer:
//! a rig is described by data, and this crate turns that data into
//!
//! - a **state table** that classifies inbound lines by longest prefix,
//! - a **marker extractor** that slices status fields out of a matched line,
//! - **command templates** that validate parameter arity and format
//!   outbound commands,
//! - the **transport seam** ([`Transport`], [`Connector`]) that the service
//!   drives and that real serial ports and simulators implement.
//!
//! # Example
//!
//! ```rust
//! use cat_protocol::{extract_status, Marker, StateDefinition, StateTable};
//!
//! let table = StateTable::build(&[
//!     StateDefinition::new("FA", vec![Marker::new(0, 11, "VFOA")]),
//!     StateDefinition::new("MD", vec![Marker::new(0, 1, "MODE").with_mapping("2", "USB")]),
//! ])
//! .unwrap();
//!
//! let line = table.match_line(b"MD2").unwrap();
//! let status = extract_status(&line);
//! assert_eq!(status.get("MODE"), Some("USB"));
//! ```

pub mod command;
pub mod definition;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod transport;

pub use command::{CommandSet, CommandTemplate, OutboundCommand};
pub use definition::{normalize_prefix, CommandDefinition, Marker, StateDefinition, ValueMapping};
pub use error::{ProtocolError, TransportError};
pub use extract::{extract_status, resolve_marker, StatusSnapshot};
pub use matcher::{MatchedLine, StateTable, MIN_PREFIX_LEN};
pub use transport::{Connector, FlowControl, Parity, SerialConfig, StopBits, Transport};
