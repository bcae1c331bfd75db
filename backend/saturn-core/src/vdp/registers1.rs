//! VDP1 register file
//!
//! VDP1 has a small register set: mode/framebuffer control, erase parameters, and the
//! read-only status/link registers maintained by the command processor.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp1Registers {
    /// TVMR: TV mode selection
    pub tvmr: u16,
    /// FBCR: framebuffer change control
    pub fbcr: u16,
    /// PTMR: plot trigger
    pub ptmr: u16,
    /// EWDR: erase/write data
    pub ewdr: u16,
    /// EWLR: erase/write upper-left coordinate
    pub ewlr: u16,
    /// EWRR: erase/write lower-right coordinate
    pub ewrr: u16,
    /// EDSR: transfer status (read-only)
    pub edsr: u16,
    /// LOPR: last operation command address (read-only)
    pub lopr: u16,
    /// COPR: current operation command address (read-only)
    pub copr: u16,
    /// Set when FBCR was written since the last swap; manual swap/erase apply once
    pub fbcr_written: bool,
}

impl Vdp1Registers {
    pub fn new() -> Self {
        Self {
            tvmr: 0,
            fbcr: 0,
            ptmr: 0,
            ewdr: 0,
            ewlr: 0,
            ewrr: 0,
            edsr: 0,
            lopr: 0,
            copr: 0,
            fbcr_written: false,
        }
    }

    // TVMR bit 3: VBlank erase/write enable
    pub fn vblank_erase(&self) -> bool {
        self.tvmr.bit(3)
    }

    // TVMR bit 1: 8bpp framebuffer mode
    pub fn fb_8bpp(&self) -> bool {
        self.tvmr.bit(1)
    }

    // FBCR bit 0: framebuffer change mode (0 = 1-cycle auto, 1 = manual)
    pub fn manual_mode(&self) -> bool {
        self.fbcr.bit(0)
    }

    // FBCR bit 1: manual swap request
    pub fn manual_swap(&self) -> bool {
        self.fbcr.bit(1)
    }

    // FBCR bit 2: manual erase request (erase the display buffer during display)
    pub fn manual_erase(&self) -> bool {
        self.fbcr.bit(2)
    }

    // FBCR bit 3: double interlace enable
    pub fn double_interlace(&self) -> bool {
        self.fbcr.bit(3)
    }

    // PTMR bits 0-1: 0 = idle, 1 = start on write, 2 = start at framebuffer swap
    pub fn plot_mode(&self) -> u16 {
        self.ptmr & 3
    }

    /// Erase/write region in framebuffer coordinates: (x1, y1, x3, y3) inclusive
    pub fn erase_rect(&self) -> (u16, u16, u16, u16) {
        let x1 = (self.ewlr >> 9) & 0x3F;
        let y1 = self.ewlr & 0x1FF;
        let x3 = (self.ewrr >> 9) & 0x7F;
        let y3 = self.ewrr & 0x1FF;
        // X coordinates are in 8-pixel (16-byte) units
        (x1 << 3, y1, (x3 << 3) | 7, y3)
    }

    pub fn read(&self, address: u32) -> u16 {
        match address & 0x1F {
            // Write-only registers read back zero
            0x00 | 0x02 | 0x04 | 0x06 | 0x08 | 0x0A => 0,
            // (EDSR) Transfer status
            0x10 => self.edsr,
            // (LOPR) Last operation command address
            0x12 => self.lopr,
            // (COPR) Current operation command address
            0x14 => self.copr,
            // (MODR) Mode status: version 1 in bits 12-15 plus latched mode bits
            0x16 => {
                (1 << 12)
                    | (u16::from(self.tvmr.bit(3)) << 3)
                    | (self.tvmr & 7)
                    | (u16::from(self.fbcr.bit(3)) << 4)
                    | (u16::from(self.fbcr.bit(4)) << 5)
            }
            _ => {
                log::debug!("Unexpected VDP1 register read {address:08X}");
                0
            }
        }
    }

    /// Returns true if the write was to FBCR, which latches swap/erase requests
    pub fn write(&mut self, address: u32, value: u16) -> bool {
        match address & 0x1F {
            // (TVMR) TV mode selection
            0x00 => {
                self.tvmr = value & 0xF;
                log::trace!("VDP1 TVMR write: {value:04X}");
            }
            // (FBCR) Framebuffer change control
            0x02 => {
                self.fbcr = value & 0x1F;
                self.fbcr_written = true;
                log::trace!("VDP1 FBCR write: {value:04X}");
                return true;
            }
            // (PTMR) Plot trigger
            0x04 => {
                self.ptmr = value & 3;
                log::trace!("VDP1 PTMR write: {value:04X}");
            }
            // (EWDR) Erase/write data
            0x06 => self.ewdr = value,
            // (EWLR) Erase/write upper-left coordinate
            0x08 => self.ewlr = value & 0x7FFF,
            // (EWRR) Erase/write lower-right coordinate
            0x0A => self.ewrr = value,
            // (ENDR) Draw forced termination
            0x0C => {
                log::trace!("VDP1 draw forced termination");
            }
            0x10 | 0x12 | 0x14 | 0x16 => {
                log::debug!("Write to read-only VDP1 register {address:08X}: {value:04X}");
            }
            _ => {
                log::debug!("Unexpected VDP1 register write {address:08X}: {value:04X}");
            }
        }
        false
    }
}

impl Default for Vdp1Registers {
    fn default() -> Self {
        Self::new()
    }
}
