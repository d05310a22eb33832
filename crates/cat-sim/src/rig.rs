//! Virtual rig simulation
//!
//! A text-protocol transceiver in the Kenwood style: commands are two-letter
//! mnemonics terminated by `;`, a bare mnemonic is a query, and a mnemonic
//! followed by digits sets a value. Responses and auto-information reports
//! are queued as complete `;`-terminated strings.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kenwood mode digit for USB
pub const MODE_USB: u8 = 2;

/// Configuration for creating a virtual rig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualRigConfig {
    /// Display name
    pub id: String,
    /// Value reported by the `ID` query
    pub model_id: String,
    /// Initial VFO A frequency in Hz
    pub initial_frequency_hz: u64,
    /// Initial mode digit (1 LSB, 2 USB, 3 CW, 4 FM, 5 AM, ...)
    pub initial_mode: u8,
    /// Whether state changes are reported without being asked
    pub auto_info: bool,
}

impl Default for VirtualRigConfig {
    fn default() -> Self {
        Self {
            id: "Virtual Rig".to_string(),
            model_id: "019".to_string(),
            initial_frequency_hz: 14_250_000,
            initial_mode: MODE_USB,
            auto_info: true,
        }
    }
}

/// A simulated rig that answers CAT queries and reports state changes
#[derive(Debug)]
pub struct VirtualRig {
    id: String,
    model_id: String,
    frequency_a_hz: u64,
    frequency_b_hz: u64,
    mode: u8,
    ptt: bool,
    auto_info: bool,
    /// Bytes received without a terminator yet
    input: String,
    pending_output: VecDeque<String>,
}

impl VirtualRig {
    /// Create a virtual rig with default settings
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_config(VirtualRigConfig {
            id: id.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: VirtualRigConfig) -> Self {
        Self {
            id: config.id,
            model_id: config.model_id,
            frequency_a_hz: config.initial_frequency_hz,
            frequency_b_hz: config.initial_frequency_hz,
            mode: config.initial_mode,
            ptt: false,
            auto_info: config.auto_info,
            input: String::new(),
            pending_output: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn frequency_a_hz(&self) -> u64 {
        self.frequency_a_hz
    }

    pub fn frequency_b_hz(&self) -> u64 {
        self.frequency_b_hz
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn ptt(&self) -> bool {
        self.ptt
    }

    pub fn auto_info(&self) -> bool {
        self.auto_info
    }

    pub fn set_auto_info(&mut self, enabled: bool) {
        self.auto_info = enabled;
    }

    /// Set VFO A, reporting the change when auto-info is on
    pub fn set_frequency_a(&mut self, hz: u64) {
        if self.frequency_a_hz != hz {
            self.frequency_a_hz = hz;
            self.report(self.frequency_a_report());
        }
    }

    /// Set VFO B, reporting the change when auto-info is on
    pub fn set_frequency_b(&mut self, hz: u64) {
        if self.frequency_b_hz != hz {
            self.frequency_b_hz = hz;
            self.report(self.frequency_b_report());
        }
    }

    pub fn set_mode(&mut self, mode: u8) {
        if self.mode != mode {
            self.mode = mode;
            self.report(self.mode_report());
        }
    }

    pub fn set_ptt(&mut self, active: bool) {
        if self.ptt != active {
            self.ptt = active;
            let report = if active { "TX1;" } else { "RX;" };
            self.report(report.to_string());
        }
    }

    /// Feed raw CAT text from the host
    ///
    /// Input may carry several commands or end mid-command; the remainder
    /// is kept until its terminator arrives.
    pub fn process_input(&mut self, text: &str) {
        self.input.push_str(text);
        while let Some(pos) = self.input.find(';') {
            let command: String = self.input.drain(..=pos).collect();
            let command = command.trim_end_matches(';').trim().to_ascii_uppercase();
            if !command.is_empty() {
                self.handle_command(&command);
            }
        }
    }

    fn handle_command(&mut self, command: &str) {
        let split = if command.is_char_boundary(2) { 2 } else { command.len() };
        let (mnemonic, args) = command.split_at(split);
        debug!("Virtual rig {} received {}{}", self.id, mnemonic, args);

        match (mnemonic, args) {
            ("FA", "") => self.reply(self.frequency_a_report()),
            ("FB", "") => self.reply(self.frequency_b_report()),
            ("MD", "") => self.reply(self.mode_report()),
            ("ID", "") => self.reply(format!("ID{};", self.model_id)),
            ("IF", "") => self.reply(self.information_report()),
            ("AI", "") => self.reply(format!("AI{};", if self.auto_info { 2 } else { 0 })),
            ("FA", hz) => match hz.parse() {
                Ok(hz) => self.set_frequency_a(hz),
                Err(_) => self.reject(command),
            },
            ("FB", hz) => match hz.parse() {
                Ok(hz) => self.set_frequency_b(hz),
                Err(_) => self.reject(command),
            },
            ("MD", mode) => match mode.parse() {
                Ok(mode) => self.set_mode(mode),
                Err(_) => self.reject(command),
            },
            ("AI", level) => match level.parse::<u8>() {
                Ok(level) => self.auto_info = level != 0,
                Err(_) => self.reject(command),
            },
            ("TX", _) => self.set_ptt(true),
            ("RX", _) => self.set_ptt(false),
            _ => self.reject(command),
        }
    }

    fn reply(&mut self, response: String) {
        self.pending_output.push_back(response);
    }

    fn report(&mut self, response: String) {
        if self.auto_info {
            self.pending_output.push_back(response);
        }
    }

    fn reject(&mut self, command: &str) {
        debug!("Virtual rig {} rejected {}", self.id, command);
        self.pending_output.push_back("?;".to_string());
    }

    fn frequency_a_report(&self) -> String {
        format!("FA{:011};", self.frequency_a_hz)
    }

    fn frequency_b_report(&self) -> String {
        format!("FB{:011};", self.frequency_b_hz)
    }

    fn mode_report(&self) -> String {
        format!("MD{};", self.mode)
    }

    /// `IF` layout after the prefix: frequency at 0..11, step 11..16,
    /// RIT offset 16..21, flags/memory 21..26, TX at 26, mode at 27
    fn information_report(&self) -> String {
        format!(
            "IF{:011}{:5}{:+05}00000{}{}0000000;",
            self.frequency_a_hz,
            "",
            0,
            u8::from(self.ptt),
            self.mode
        )
    }

    /// Take the next queued response
    pub fn take_output(&mut self) -> Option<String> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    pub fn output_count(&self) -> usize {
        self.pending_output.len()
    }

    pub fn clear_output(&mut self) {
        self.pending_output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_create_virtual_rig() {
        let rig = VirtualRig::new("Test Rig");
        assert_eq!(rig.id(), "Test Rig");
        assert_eq!(rig.frequency_a_hz(), 14_250_000);
        assert_eq!(rig.mode(), MODE_USB);
        assert!(!rig.ptt());
        assert!(!rig.has_output());
    }

    #[test]
    fn test_queries() {
        let mut rig = VirtualRig::new("Test");
        rig.process_input("FA;MD;ID;");
        assert_eq!(rig.take_output().as_deref(), Some("FA00014250000;"));
        assert_eq!(rig.take_output().as_deref(), Some("MD2;"));
        assert_eq!(rig.take_output().as_deref(), Some("ID019;"));
        assert_eq!(rig.take_output(), None);
    }

    #[test]
    fn test_set_frequency_reports_with_auto_info() {
        let mut rig = VirtualRig::new("Test");
        rig.process_input("FA00007074000;");
        assert_eq!(rig.frequency_a_hz(), 7_074_000);
        assert_eq!(rig.take_output().as_deref(), Some("FA00007074000;"));
    }

    #[test]
    fn test_set_without_auto_info_is_silent() {
        let mut rig = VirtualRig::from_config(VirtualRigConfig {
            auto_info: false,
            ..Default::default()
        });
        rig.process_input("MD3;");
        assert_eq!(rig.mode(), 3);
        assert!(!rig.has_output());

        rig.process_input("AI2;FB00021000000;");
        assert!(rig.auto_info());
        assert_eq!(rig.take_output().as_deref(), Some("FB00021000000;"));
    }

    #[test]
    fn test_no_output_when_value_unchanged() {
        let mut rig = VirtualRig::new("Test");
        rig.set_frequency_a(14_250_000);
        rig.set_mode(MODE_USB);
        rig.set_ptt(false);
        assert!(!rig.has_output());
    }

    #[test]
    fn test_split_input() {
        let mut rig = VirtualRig::new("Test");
        rig.process_input("f");
        assert!(!rig.has_output());
        rig.process_input("a;");
        assert_eq!(rig.take_output().as_deref(), Some("FA00014250000;"));
    }

    #[test]
    fn test_ptt() {
        let mut rig = VirtualRig::new("Test");
        rig.process_input("TX;");
        assert!(rig.ptt());
        assert_eq!(rig.take_output().as_deref(), Some("TX1;"));
        rig.process_input("RX;");
        assert_eq!(rig.take_output().as_deref(), Some("RX;"));
    }

    #[test]
    fn test_information_report_layout() {
        let mut rig = VirtualRig::new("Test");
        rig.set_auto_info(false);
        rig.set_mode(3);
        rig.process_input("IF;");
        let report = rig.take_output().unwrap();
        let data = report.strip_prefix("IF").unwrap().strip_suffix(';').unwrap();
        assert_eq!(&data[0..11], "00014250000");
        assert_eq!(&data[26..27], "0");
        assert_eq!(&data[27..28], "3");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut rig = VirtualRig::new("Test");
        rig.process_input("ZZ;FAxyz;");
        assert_eq!(rig.output_count(), 2);
        assert_eq!(rig.take_output().as_deref(), Some("?;"));
        rig.clear_output();
        assert_eq!(rig.output_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_frequency_set_then_query(hz in 0u64..99_999_999_999) {
            let mut rig = VirtualRig::new("Test");
            rig.set_auto_info(false);
            rig.process_input(&format!("FA{:011};FA;", hz));
            prop_assert_eq!(rig.frequency_a_hz(), hz);
            prop_assert_eq!(rig.take_output(), Some(format!("FA{:011};", hz)));
        }
    }
}
