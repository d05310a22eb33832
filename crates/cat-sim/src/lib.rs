//! CAT Simulation Library
//!
//! This crate provides a simulation layer for exercising the CAT service
//! without physical radio hardware. It includes:
//!
//! - **VirtualRig**: a Kenwood-style rig that answers queries and reports
//!   state changes
//! - **SimLink**: a scripted serial link with fault injection, exposed to the
//!   service through [`SimConnector`] and [`SimTransport`]
//!
//! # Example
//!
//! ```rust
//! use cat_sim::VirtualRig;
//!
//! let mut rig = VirtualRig::new("TS-2000");
//!
//! // Host asks for VFO A, then retunes it
//! rig.process_input("FA;FA00007074000;");
//!
//! while let Some(response) = rig.take_output() {
//!     println!("Rig output: {}", response);
//! }
//! assert_eq!(rig.frequency_a_hz(), 7_074_000);
//! ```

pub mod link;
pub mod rig;

pub use link::{SimConnector, SimLink, SimTransport};
pub use rig::{VirtualRig, VirtualRigConfig, MODE_USB};
