//! SCU (System Control Unit): DMA engine, interrupt aggregator, timers, DSP host
//!
//! The SCU sits between the SH-2s and everything else. Its register window lives at
//! `$5FE0000-$5FE00FF`; registers are 32 bits wide and tolerate byte and word access on every
//! lane. It drives the master SH-2 interrupt pin from its interrupt aggregator and the slave pin
//! directly from the blanking signals.

pub mod dma;
pub mod dsp;
pub mod interrupts;
pub mod timers;

#[cfg(test)]
mod tests;

use crate::bus::MemoryBus;
use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::scu::dma::{DmaChannel, DmaTrigger};
use crate::scu::dsp::DspHost;
use crate::scu::interrupts::{InternalInterrupt, InterruptController};
use crate::scu::timers::Timers;
use bincode::{Decode, Encode};
use jsaturn_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Encode, Decode)]
pub struct Scu {
    pub(crate) dma: [DmaChannel; dma::CHANNELS],
    pub(crate) active_dma_level: Option<usize>,
    pub(crate) intc: InterruptController,
    pub(crate) timers: Timers,
    pub(crate) dsp: DspHost,
    /// RSEL: work RAM size select
    pub(crate) wram_size_select: u32,
    /// Level/vector currently driven onto the master SH-2 interrupt pin; (0, 0) when clear
    master_pin: (u8, u8),
    /// Level/vector currently driven onto the slave SH-2 interrupt pin
    slave_pin: (u8, u8),
}

impl Scu {
    pub fn new() -> Self {
        Self {
            dma: [DmaChannel::new(0), DmaChannel::new(1), DmaChannel::new(2)],
            active_dma_level: None,
            intc: InterruptController::new(),
            timers: Timers::new(),
            dsp: DspHost::new(),
            wram_size_select: 0,
            master_pin: (0, 0),
            slave_pin: (0, 0),
        }
    }

    /// Advance by the elapsed cycle delta: counts down DMA end-interrupt delays and runs any
    /// active DMA transfer, suspending on bus waits.
    pub fn advance(&mut self, cycles: u64, mem: &mut MemoryBus<'_>) {
        self.run_dma(cycles, mem);
    }

    // -------------------------------------------------------------------------------------------
    // Interrupt pins

    /// Current (level, vector) on the master SH-2 interrupt pin. Level 0 means no interrupt.
    #[must_use]
    pub fn master_interrupt_pin(&self) -> (u8, u8) {
        self.master_pin
    }

    /// Current (level, vector) on the slave SH-2 interrupt pin
    #[must_use]
    pub fn slave_interrupt_pin(&self) -> (u8, u8) {
        self.slave_pin
    }

    /// Called by the master CPU when it vectors: clears the pending pair, restores the default
    /// interrupt mask, and re-evaluates so the next candidate can raise immediately.
    pub fn acknowledge_master_interrupt(&mut self) {
        self.intc.acknowledge();
        self.master_pin = (0, 0);
        self.update_master_interrupt_level();
    }

    fn update_master_interrupt_level(&mut self) {
        if let Some(raised) = self.intc.update_master_interrupt_level() {
            self.master_pin = (raised.level, raised.vector);
        }
    }

    // -------------------------------------------------------------------------------------------
    // Blanking edges and interrupt triggers

    /// HBlank edge from the VDP. `vblank` reflects the current vertical blanking state so the
    /// slave pin is only toggled inside the active display region.
    pub fn update_hblank(
        &mut self,
        hblank: bool,
        vblank: bool,
        scheduler: &mut Scheduler,
        mem: &mut MemoryBus<'_>,
    ) {
        if hblank {
            self.intc.set_internal(InternalInterrupt::HBlankIn);
            self.update_master_interrupt_level();

            // The timers only count lines inside the active vertical display region
            if self.timers.enable && !vblank {
                let matched = self.timers.timer0_counter == self.timers.timer0_compare;
                if matched {
                    self.trigger_timer0(mem);
                }
                if self.timers.timer1_armed && (!self.timers.timer1_line_specific || matched) {
                    self.timers.timer1_armed = false;
                    scheduler
                        .schedule_from_now(SchedulerEvent::ScuTimer1, self.timers.timer1_reload.into());
                }
                self.timers.timer0_counter = self.timers.timer0_counter.wrapping_add(1);
            }

            self.trigger_dma_transfer(DmaTrigger::HBlankIn, mem);
        }

        if !vblank {
            self.slave_pin = if hblank { (2, 0x41) } else { (0, 0) };
        }
    }

    /// VBlank edge from the VDP. VBlank-OUT resets Timer 0 and re-arms Timer 1 for the new frame.
    pub fn update_vblank(&mut self, vblank: bool, mem: &mut MemoryBus<'_>) {
        if vblank {
            self.intc.set_internal(InternalInterrupt::VBlankIn);
            self.trigger_dma_transfer(DmaTrigger::VBlankIn, mem);
            self.slave_pin = (6, 0x43);
        } else {
            self.intc.set_internal(InternalInterrupt::VBlankOut);
            self.timers.timer0_counter = 0;
            self.timers.timer1_armed = true;
            self.trigger_dma_transfer(DmaTrigger::VBlankOut, mem);
            self.slave_pin = (4, 0x42);
        }
        self.update_master_interrupt_level();
    }

    fn trigger_timer0(&mut self, mem: &mut MemoryBus<'_>) {
        if self.intc.set_internal(InternalInterrupt::Timer0) {
            self.update_master_interrupt_level();
            self.trigger_dma_transfer(DmaTrigger::Timer0, mem);
        }
    }

    /// Timer 1 scheduler event handler
    pub fn tick_timer1(&mut self, mem: &mut MemoryBus<'_>) {
        if self.timers.enable && self.intc.set_internal(InternalInterrupt::Timer1) {
            self.update_master_interrupt_level();
            self.trigger_dma_transfer(DmaTrigger::Timer1, mem);
        }
        self.timers.timer1_armed = true;
    }

    /// Raised by the external DSP interpreter when program execution hits an END/ENDI instruction
    pub fn raise_dsp_end(&mut self) {
        self.dsp.ended = true;
        self.dsp.executing = false;
        if self.intc.set_internal(InternalInterrupt::DspEnd) {
            self.update_master_interrupt_level();
        }
    }

    /// Level-sensitive sound request line from the SCSP
    pub fn set_sound_request(&mut self, level: bool, mem: &mut MemoryBus<'_>) {
        if level {
            if self.intc.set_internal(InternalInterrupt::SoundRequest) {
                self.update_master_interrupt_level();
                self.trigger_dma_transfer(DmaTrigger::SoundRequest, mem);
            }
        } else {
            self.intc.clear_internal(InternalInterrupt::SoundRequest);
        }
    }

    /// SMPC system manager interrupt
    pub fn trigger_system_manager(&mut self) {
        if self.intc.set_internal(InternalInterrupt::SystemManager) {
            self.update_master_interrupt_level();
        }
    }

    /// SMPC pad data ready interrupt
    pub fn trigger_pad(&mut self) {
        if self.intc.set_internal(InternalInterrupt::Pad) {
            self.update_master_interrupt_level();
        }
    }

    pub(crate) fn trigger_dma_end(&mut self, level: usize) {
        if self.intc.set_internal(InternalInterrupt::for_dma_level(level)) {
            self.update_master_interrupt_level();
        }
    }

    pub(crate) fn trigger_dma_illegal(&mut self) {
        if self.intc.set_internal(InternalInterrupt::DmaIllegal) {
            self.update_master_interrupt_level();
        }
    }

    /// VDP1 finished processing its command table
    pub fn trigger_sprite_draw_end(&mut self, mem: &mut MemoryBus<'_>) {
        if self.intc.set_internal(InternalInterrupt::SpriteDrawEnd) {
            self.update_master_interrupt_level();
            self.trigger_dma_transfer(DmaTrigger::SpriteDrawEnd, mem);
        }
    }

    /// External interrupt line on the A-Bus (0-15)
    pub fn trigger_external_interrupt(&mut self, index: u8) {
        if self.intc.set_external(index) {
            self.update_master_interrupt_level();
        }
    }

    /// Interrupt status bitmask: internal sources in the low half, external in the high half
    #[must_use]
    pub fn interrupt_status(&self) -> u32 {
        self.intc.status()
    }

    #[must_use]
    pub fn wram_size_select(&self) -> u32 {
        self.wram_size_select
    }

    // -------------------------------------------------------------------------------------------
    // Register file

    /// Register values as a debugger sees them: no read side effects, write-only registers
    /// read back their live configuration.
    #[must_use]
    pub fn peek_reg_long(&self, address: u32) -> u32 {
        let address = address & 0xFF & !3;
        match address {
            // (DMAxRA) DMA Read Address
            0x00 | 0x20 | 0x40 => self.dma[(address >> 5) as usize].src_addr,
            // (DMAxWA) DMA Write Address
            0x04 | 0x24 | 0x44 => self.dma[(address >> 5) as usize].dst_addr,
            // (DMAxCNT) DMA Transfer Number
            0x08 | 0x28 | 0x48 => self.dma[(address >> 5) as usize].xfer_count,
            // (DMAxADD) DMA Increment
            0x0C | 0x2C | 0x4C => {
                let ch = &self.dma[(address >> 5) as usize];
                let dst_bits =
                    if ch.dst_addr_inc == 0 { 0 } else { ch.dst_addr_inc.trailing_zeros() };
                ((ch.src_addr_inc / 4) << 8) | dst_bits
            }
            // (DMAxEN) DMA Enable
            0x10 | 0x30 | 0x50 => u32::from(self.dma[(address >> 5) as usize].enabled) << 8,
            // (DMAxMODE) DMA Mode
            0x14 | 0x34 | 0x54 => {
                let ch = &self.dma[(address >> 5) as usize];
                (u32::from(ch.indirect) << 24)
                    | (u32::from(ch.update_src_addr) << 16)
                    | (u32::from(ch.update_dst_addr) << 8)
                    | (ch.trigger as u32)
            }
            // (DMA_STOP) DMA Force Stop
            0x60 => 0,
            // (DMA_STATUS) DMA Status
            0x7C => {
                (u32::from(self.dma[0].active) << 4)
                    | (u32::from(self.dma[1].active) << 8)
                    | (u32::from(self.dma[2].active) << 12)
                    | (u32::from(self.dma[0].active && (self.dma[1].active || self.dma[2].active))
                        << 16)
                    | (u32::from(self.dma[1].active && self.dma[2].active) << 17)
            }
            // (DSP_PPAF) DSP Program Control Port
            0x80 => self.dsp.peek_control(),
            // (DSP_PPD) DSP Program RAM Data Port
            0x84 => self.dsp.peek_program(),
            // (DSP_PDA) DSP Data RAM Address Port
            0x88 => self.dsp.data_address.into(),
            // (DSP_PDD) DSP Data RAM Data Port
            0x8C => self.dsp.peek_data(),
            // (T0C) Timer 0 Compare
            0x90 => self.timers.read_compare(),
            // (T1S) Timer 1 Set Data
            0x94 => self.timers.read_reload(),
            // (T1MD) Timer 1 Mode
            0x98 => self.timers.read_mode(),
            // (IMS) Interrupt Mask
            0xA0 => self.intc.mask.into(),
            // (IST) Interrupt Status
            0xA4 => self.intc.status(),
            // (AIACK) A-Bus Interrupt Acknowledge
            0xA8 => 0,
            // (ASR0/ASR1/AREF) A-Bus configuration; accepted and ignored
            0xB0 | 0xB4 | 0xB8 => 0,
            // (RSEL) SCU SDRAM Select
            0xC4 => self.wram_size_select,
            // (VER) SCU Version
            0xC8 => 0x4,
            _ => 0,
        }
    }

    #[must_use]
    pub fn peek_reg_word(&self, address: u32) -> u16 {
        (self.peek_reg_long(address & !3) >> ((!address & 2) * 8)) as u16
    }

    #[must_use]
    pub fn peek_reg_byte(&self, address: u32) -> u8 {
        (self.peek_reg_long(address & !3) >> ((!address & 3) * 8)) as u8
    }

    pub fn read_reg_long(&mut self, address: u32) -> u32 {
        let address = address & 0xFF & !3;
        match address {
            // Write-only registers read back zero on the live bus
            0x0C | 0x2C | 0x4C | 0x10 | 0x30 | 0x50 | 0x14 | 0x34 | 0x54 | 0x60 | 0x84 | 0x88
            | 0x90 | 0x94 | 0x98 | 0xA8 | 0xB0 | 0xB4 | 0xB8 => 0,
            // Control port reads clear the sticky end/overflow flags
            0x80 => self.dsp.read_control(),
            // Data port reads advance the data address
            0x8C => self.dsp.read_data(),
            _ => {
                let value = self.peek_reg_long(address);
                log::trace!("SCU register read {address:02X} -> {value:08X}");
                value
            }
        }
    }

    pub fn read_reg_word(&mut self, address: u32) -> u16 {
        (self.read_reg_long(address & !3) >> ((!address & 2) * 8)) as u16
    }

    pub fn read_reg_byte(&mut self, address: u32) -> u8 {
        (self.read_reg_long(address & !3) >> ((!address & 3) * 8)) as u8
    }

    #[allow(clippy::too_many_lines)]
    pub fn write_reg_byte(&mut self, address: u32, value: u8, mem: &mut MemoryBus<'_>) {
        let address = address & 0xFF;
        match address {
            // DMA channel registers; channel index in bits 5-6
            0x00..=0x5F => self.write_dma_reg_byte(address, value, mem),

            // (DMA_STOP) DMA Force Stop
            0x60..=0x62 => {}
            0x63 => {
                if value.bit(0) {
                    log::trace!("SCU DMA force stop");
                    self.force_stop_dma();
                }
            }

            // (DMA_STATUS) read-only
            0x7C..=0x7F => {}

            // DSP ports take longword access only
            0x80..=0x8F => {
                log::debug!("Ignoring byte write to SCU DSP port {address:02X}: {value:02X}");
            }

            // (T0C) Timer 0 Compare
            0x90..=0x93 => {
                let updated = set_reg_byte(self.timers.read_compare(), address, value);
                self.timers.write_compare(updated);
            }
            // (T1S) Timer 1 Set Data
            0x94..=0x97 => {
                let updated = set_reg_byte(self.timers.read_reload(), address, value);
                self.timers.write_reload(updated);
            }
            // (T1MD) Timer 1 Mode
            0x98..=0x9B => {
                let updated = set_reg_byte(self.timers.read_mode(), address, value);
                self.timers.write_mode(updated);
            }

            // (IMS) Interrupt Mask
            0xA0..=0xA3 => {
                let updated = set_reg_byte(self.intc.mask.into(), address, value);
                self.intc.mask = updated as u16;
                log::trace!("IMS write: {:04X}", self.intc.mask);
                self.update_master_interrupt_level();
            }
            // (IST) Interrupt Status; writing 0 bits clears them
            0xA4..=0xA7 => {
                let mask = !(0xFFu32 << ((!address & 3) * 8)) | set_reg_byte(0, address, value);
                let updated = self.intc.status() & mask;
                self.intc.status_internal = updated as u16;
                self.intc.status_external = (updated >> 16) as u16;
                self.update_master_interrupt_level();
            }
            // (AIACK) A-Bus Interrupt Acknowledge
            0xA8..=0xAB => {
                self.intc.acknowledge_external();
                self.update_master_interrupt_level();
            }

            // (ASR0/ASR1/AREF) A-Bus configuration; accepted and ignored
            0xB0..=0xBB => {
                log::trace!("A-Bus configuration write {address:02X}: {value:02X}");
            }

            // (RSEL) SCU SDRAM Select
            0xC4..=0xC6 => {}
            0xC7 => {
                self.wram_size_select = u32::from(value) & 1;
                log::trace!("RSEL write: {}", self.wram_size_select);
            }

            // (VER) read-only
            0xC8..=0xCB => {}

            _ => {
                log::debug!("Unhandled SCU register byte write {address:02X}: {value:02X}");
            }
        }
    }

    fn write_dma_reg_byte(&mut self, address: u32, value: u8, mem: &mut MemoryBus<'_>) {
        let index = (address >> 5) as usize;
        let ch = &mut self.dma[index];

        match address & 0x1F {
            // (DMAxRA) read address, one byte lane at a time; only 27 bits are held
            0x00 => ch.src_addr = (ch.src_addr & 0x00FF_FFFF) | (u32::from(value & 0x07) << 24),
            0x01 => ch.src_addr = (ch.src_addr & 0xFF00_FFFF) | (u32::from(value) << 16),
            0x02 => ch.src_addr = (ch.src_addr & 0xFFFF_00FF) | (u32::from(value) << 8),
            0x03 => ch.src_addr = (ch.src_addr & 0xFFFF_FF00) | u32::from(value),

            // (DMAxWA) write address
            0x04 => ch.dst_addr = (ch.dst_addr & 0x00FF_FFFF) | (u32::from(value & 0x07) << 24),
            0x05 => ch.dst_addr = (ch.dst_addr & 0xFF00_FFFF) | (u32::from(value) << 16),
            0x06 => ch.dst_addr = (ch.dst_addr & 0xFFFF_00FF) | (u32::from(value) << 8),
            0x07 => ch.dst_addr = (ch.dst_addr & 0xFFFF_FF00) | u32::from(value),

            // (DMAxCNT) transfer byte count; 20 bits on level 0, 12 bits on levels 1/2
            0x08 => {}
            0x09 => {
                if index == 0 {
                    ch.xfer_count =
                        (ch.xfer_count & 0x0_FFFF) | (u32::from(value & 0x0F) << 16);
                }
            }
            0x0A => {
                if index == 0 {
                    ch.xfer_count = (ch.xfer_count & 0xF_00FF) | (u32::from(value) << 8);
                } else {
                    ch.xfer_count = (ch.xfer_count & 0x00FF) | (u32::from(value & 0x0F) << 8);
                }
            }
            0x0B => ch.xfer_count = (ch.xfer_count & !0xFF) | u32::from(value),

            // (DMAxADD) address increments; read add select in bit 8, write add in bits 0-2
            0x0C | 0x0D => {}
            0x0E => ch.src_addr_inc = u32::from(value & 1) * 4,
            0x0F => ch.dst_addr_inc = (1 << (value & 7)) & !1,

            // (DMAxEN) enable / immediate trigger
            0x10 | 0x11 => {}
            0x12 => {
                ch.enabled = value.bit(0);
                if ch.enabled {
                    log::trace!(
                        "DMA{index} enabled - {:08X} (+{:02X}) -> {:08X} (+{:02X}) ({}), {:?}",
                        ch.src_addr,
                        ch.src_addr_inc,
                        ch.dst_addr,
                        ch.dst_addr_inc,
                        if ch.indirect { "indirect" } else { "direct" },
                        ch.trigger
                    );
                }
            }
            0x13 => {
                if value.bit(0) {
                    self.trigger_immediate_dma(index, mem);
                }
            }

            // (DMAxMODE) transfer mode
            0x14 => ch.indirect = value.bit(0),
            0x15 => ch.update_src_addr = value.bit(0),
            0x16 => ch.update_dst_addr = value.bit(0),
            0x17 => ch.trigger = DmaTrigger::from_bits(value),

            _ => {}
        }
    }

    pub fn write_reg_word(&mut self, address: u32, value: u16, mem: &mut MemoryBus<'_>) {
        let address = address & 0xFF & !1;
        self.write_reg_byte(address, value.msb(), mem);
        self.write_reg_byte(address + 1, value.lsb(), mem);
    }

    pub fn write_reg_long(&mut self, address: u32, value: u32, mem: &mut MemoryBus<'_>) {
        let address = address & 0xFF & !3;
        match address {
            // (DSP_PPAF) DSP Program Control Port
            0x80 => self.dsp.write_control(value),
            // (DSP_PPD) DSP Program RAM Data Port
            0x84 => self.dsp.write_program(value),
            // (DSP_PDA) DSP Data RAM Address Port
            0x88 => self.dsp.write_data_address(value),
            // (DSP_PDD) DSP Data RAM Data Port
            0x8C => self.dsp.write_data(value),
            _ => {
                for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
                    self.write_reg_byte(address + i as u32, byte, mem);
                }
            }
        }
    }
}

impl Default for Scu {
    fn default() -> Self {
        Self::new()
    }
}

// Replace the byte lane `address & 3` selects within a big-endian register value
fn set_reg_byte(current: u32, address: u32, value: u8) -> u32 {
    let shift = (!address & 3) * 8;
    (current & !(0xFF << shift)) | (u32::from(value) << shift)
}
