//! SCU timers
//!
//! Timer 0 counts HBlank-IN edges inside the active vertical display region and raises its
//! interrupt on compare match. Timer 1 is a one-shot armed per line with a cycle reload value;
//! in line-specific mode it only arms on the line where Timer 0 matched.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Timers {
    /// T1MD bit 0: both timers enabled
    pub(crate) enable: bool,
    /// T1MD bit 8: Timer 1 fires only on the line where Timer 0 matches
    pub(crate) timer1_line_specific: bool,
    pub(crate) timer0_counter: u16,
    pub(crate) timer0_compare: u16,
    pub(crate) timer1_reload: u16,
    /// Cleared when Timer 1 is scheduled, set again once it fires
    pub(crate) timer1_armed: bool,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            enable: false,
            timer1_line_specific: false,
            timer0_counter: 0,
            timer0_compare: 0,
            timer1_reload: 0,
            timer1_armed: true,
        }
    }

    // $90 (T0C) Timer 0 Compare
    pub(crate) fn write_compare(&mut self, value: u32) {
        self.timer0_compare = (value & 0x3FF) as u16;
        log::trace!("T0C write: {:03X}", self.timer0_compare);
    }

    pub(crate) fn read_compare(&self) -> u32 {
        self.timer0_compare.into()
    }

    // $94 (T1S) Timer 1 Set Data
    pub(crate) fn write_reload(&mut self, value: u32) {
        self.timer1_reload = (value & 0x1FF) as u16;
        log::trace!("T1S write: {:03X}", self.timer1_reload);
    }

    pub(crate) fn read_reload(&self) -> u32 {
        self.timer1_reload.into()
    }

    // $98 (T1MD) Timer 1 Mode
    pub(crate) fn write_mode(&mut self, value: u32) {
        self.enable = value.bit(0);
        self.timer1_line_specific = value.bit(8);
        log::trace!(
            "T1MD write: enable = {}, line-specific = {}",
            self.enable,
            self.timer1_line_specific
        );
    }

    pub(crate) fn read_mode(&self) -> u32 {
        u32::from(self.enable) | (u32::from(self.timer1_line_specific) << 8)
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
