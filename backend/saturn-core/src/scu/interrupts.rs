//! SCU interrupt aggregation
//!
//! Sixteen internal sources and sixteen external A-Bus lines funnel into a single interrupt pin
//! on the master SH-2. Only one interrupt is in flight at a time; the next candidate is selected
//! when the CPU acknowledges. External interrupts additionally latch a pending-acknowledge bit
//! that suppresses re-raising until the A-Bus acknowledge register is written.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;
use jsaturn_proc_macros::EnumAll;

/// Interrupt mask value restored when the CPU acknowledges an interrupt
pub const DEFAULT_MASK: u16 = 0xBFFF;

/// Internal source index -> master CPU interrupt level.
///
/// Index 16 is the empty-bitmask sentinel (trailing_zeros of 0).
const INTERNAL_LEVELS: [u8; 17] =
    [0xF, 0xE, 0xD, 0xC, 0xB, 0xA, 0x9, 0x8, 0x8, 0x6, 0x6, 0x5, 0x3, 0x2, 0x0, 0x0, 0x0];

/// External source index -> master CPU interrupt level
const EXTERNAL_LEVELS: [u8; 17] =
    [0x7, 0x7, 0x7, 0x7, 0x4, 0x4, 0x4, 0x4, 0x1, 0x1, 0x1, 0x1, 0x1, 0x1, 0x1, 0x1, 0x0];

const INTERNAL_VECTOR_BASE: u8 = 0x40;
const EXTERNAL_VECTOR_BASE: u8 = 0x50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, EnumAll)]
pub enum InternalInterrupt {
    VBlankIn = 0,
    VBlankOut = 1,
    HBlankIn = 2,
    Timer0 = 3,
    Timer1 = 4,
    DspEnd = 5,
    SoundRequest = 6,
    SystemManager = 7,
    Pad = 8,
    Level2DmaEnd = 9,
    Level1DmaEnd = 10,
    Level0DmaEnd = 11,
    DmaIllegal = 12,
    SpriteDrawEnd = 13,
}

impl InternalInterrupt {
    pub(crate) fn bit_mask(self) -> u16 {
        1 << (self as u8)
    }

    pub(crate) fn for_dma_level(level: usize) -> Self {
        match level {
            0 => Self::Level0DmaEnd,
            1 => Self::Level1DmaEnd,
            2 => Self::Level2DmaEnd,
            _ => panic!("invalid DMA level {level}, must be 0-2"),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InterruptController {
    /// IST low half: internal source status bits
    pub(crate) status_internal: u16,
    /// IST high half: external A-Bus line status bits
    pub(crate) status_external: u16,
    /// IMS: bits 0-13 mask individual internal sources; bit 15 gates all externals together
    pub(crate) mask: u16,
    /// External interrupts raised but not yet acknowledged through the A-Bus ack register
    pub(crate) pending_ack: u16,
    /// Level of the interrupt currently in flight to the master CPU (0 = none)
    pub(crate) pending_level: u8,
    /// Source index of the in-flight interrupt; externals are offset by 16
    pub(crate) pending_index: u8,
}

/// An interrupt raise to forward to the master CPU pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterInterrupt {
    pub level: u8,
    pub vector: u8,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            status_internal: 0,
            status_external: 0,
            mask: DEFAULT_MASK,
            pending_ack: 0,
            pending_level: 0,
            pending_index: 0,
        }
    }

    /// Re-evaluate the interrupt selection; called whenever status, mask, or the pending pair
    /// change. Short-circuits while an interrupt is already in flight.
    ///
    /// Returns the `(level, vector)` pair to drive onto the master CPU pin, if any.
    pub(crate) fn update_master_interrupt_level(&mut self) -> Option<MasterInterrupt> {
        if self.pending_level > 0 {
            return None;
        }

        let internal_bits = self.status_internal & !self.mask;
        let external_bits = if self.mask.bit(15) { self.status_external } else { 0 };
        if internal_bits == 0 && external_bits == 0 {
            return None;
        }

        let internal_index = internal_bits.trailing_zeros() as usize;
        let external_index = external_bits.trailing_zeros() as usize;

        let internal_level = INTERNAL_LEVELS[internal_index];
        let external_level = EXTERNAL_LEVELS[external_index];

        log::trace!("Intr states:  {:04X} {:04X}", self.status_internal, self.status_external);
        log::trace!("Intr indices: {internal_index:X} {external_index:X}");
        log::trace!("Intr levels:  {internal_level:X} {external_level:X}");

        if internal_level >= external_level {
            log::trace!("Raising internal interrupt {internal_index:X}, level {internal_level:X}");

            self.pending_level = internal_level;
            self.pending_index = internal_index as u8;
            self.status_internal &= !(1 << internal_index);

            Some(MasterInterrupt {
                level: internal_level,
                vector: INTERNAL_VECTOR_BASE + internal_index as u8,
            })
        } else if !self.pending_ack.bit(external_index as u8) {
            log::trace!("Raising external interrupt {external_index:X}, level {external_level:X}");

            self.pending_level = external_level;
            self.pending_index = 16 + external_index as u8;
            self.status_external &= !(1 << external_index);

            self.pending_ack |= 1 << external_index;

            Some(MasterInterrupt {
                level: external_level,
                vector: EXTERNAL_VECTOR_BASE + external_index as u8,
            })
        } else {
            None
        }
    }

    /// Set an internal source's status bit. Returns true if the bit was newly set.
    pub(crate) fn set_internal(&mut self, interrupt: InternalInterrupt) -> bool {
        let mask = interrupt.bit_mask();
        if self.status_internal & mask != 0 {
            return false;
        }
        self.status_internal |= mask;
        true
    }

    pub(crate) fn clear_internal(&mut self, interrupt: InternalInterrupt) {
        self.status_internal &= !interrupt.bit_mask();
    }

    /// Set an external A-Bus line's status bit unless it is awaiting acknowledgement.
    /// Returns true if the bit was newly set.
    pub(crate) fn set_external(&mut self, index: u8) -> bool {
        debug_assert!(index < 16);
        let mask = 1 << index;
        if self.status_external & mask != 0 || self.pending_ack & mask != 0 {
            return false;
        }
        self.status_external |= mask;
        true
    }

    /// CPU acknowledge while vectoring: clears the in-flight pair and restores the default mask
    pub(crate) fn acknowledge(&mut self) {
        if self.pending_level > 0 {
            log::trace!(
                "Acknowledging {} interrupt {:X}",
                if self.pending_index <= 15 { "internal" } else { "external" },
                self.pending_index
            );

            self.pending_level = 0;
            self.mask = DEFAULT_MASK;
        }
    }

    /// A-Bus interrupt acknowledge register write: clears all external pending-ack latches
    pub(crate) fn acknowledge_external(&mut self) {
        self.pending_ack = 0;
    }

    pub(crate) fn status(&self) -> u32 {
        (u32::from(self.status_external) << 16) | u32::from(self.status_internal)
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_level_source_wins() {
        let mut intc = InterruptController::new();
        intc.mask = 0;

        // VBlank-IN is level 15, Pad is level 8
        intc.set_internal(InternalInterrupt::Pad);
        intc.set_internal(InternalInterrupt::VBlankIn);

        let raised = intc.update_master_interrupt_level().unwrap();
        assert_eq!(raised, MasterInterrupt { level: 0xF, vector: 0x40 });

        // Pad stays latched until the first interrupt is acknowledged
        assert_eq!(intc.update_master_interrupt_level(), None);

        intc.acknowledge();
        intc.mask = 0;
        let raised = intc.update_master_interrupt_level().unwrap();
        assert_eq!(raised, MasterInterrupt { level: 0x8, vector: 0x40 + 8 });
    }

    #[test]
    fn masked_sources_are_not_raised() {
        let mut intc = InterruptController::new();
        intc.mask = InternalInterrupt::Timer0.bit_mask();

        intc.set_internal(InternalInterrupt::Timer0);
        assert_eq!(intc.update_master_interrupt_level(), None);

        intc.mask = 0;
        let raised = intc.update_master_interrupt_level().unwrap();
        assert_eq!(raised, MasterInterrupt { level: 0xD, vector: 0x40 + 3 });
    }

    #[test]
    fn acknowledge_restores_default_mask() {
        let mut intc = InterruptController::new();
        intc.mask = 0;

        intc.set_internal(InternalInterrupt::HBlankIn);
        intc.update_master_interrupt_level().unwrap();

        intc.acknowledge();
        assert_eq!(intc.mask, DEFAULT_MASK);
        assert_eq!(intc.pending_level, 0);
    }

    #[test]
    fn external_interrupts_gate_on_the_abus_mask_bit_and_latch_acks() {
        let mut intc = InterruptController::new();

        // Default mask has bit 15 set, which lets externals through
        intc.set_external(0);
        let raised = intc.update_master_interrupt_level().unwrap();
        assert_eq!(raised, MasterInterrupt { level: 7, vector: 0x50 });

        intc.acknowledge();

        // Still awaiting the A-Bus acknowledge register write; cannot re-raise
        assert!(!intc.set_external(0));
        assert_eq!(intc.update_master_interrupt_level(), None);

        intc.acknowledge_external();
        assert!(intc.set_external(0));
        let raised = intc.update_master_interrupt_level().unwrap();
        assert_eq!(raised.vector, 0x50);
    }
}
