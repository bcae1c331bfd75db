//! SCU DSP host ports
//!
//! The SCU embeds a fixed-point DSP whose program and data RAM are uploaded through four host
//! ports in the SCU register file. Instruction execution is an external collaborator; the host
//! side implemented here covers program/data upload, the program counter, and the status flags
//! the control port exposes.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

pub const PROGRAM_RAM_LEN: usize = 256;
pub const DATA_RAM_BANKS: usize = 4;
pub const DATA_RAM_BANK_LEN: usize = 64;

#[derive(Debug, Clone, Encode, Decode)]
pub struct DspHost {
    pub program_ram: Box<[u32; PROGRAM_RAM_LEN]>,
    pub data_ram: Box<[[u32; DATA_RAM_BANK_LEN]; DATA_RAM_BANKS]>,
    pub pc: u8,
    /// PDA: bank in bits 6-7, offset in bits 0-5
    pub data_address: u8,
    pub executing: bool,
    pub paused: bool,
    pub ended: bool,
    pub overflow: bool,
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
    pub dma_run: bool,
}

impl DspHost {
    pub fn new() -> Self {
        Self {
            program_ram: vec![0; PROGRAM_RAM_LEN].into_boxed_slice().try_into().unwrap(),
            data_ram: vec![[0; DATA_RAM_BANK_LEN]; DATA_RAM_BANKS]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
            pc: 0,
            data_address: 0,
            executing: false,
            paused: false,
            ended: false,
            overflow: false,
            carry: false,
            zero: false,
            sign: false,
            dma_run: false,
        }
    }

    // $80 (DSP_PPAF) DSP Program Control Port
    pub(crate) fn write_control(&mut self, value: u32) {
        // LE loads the program counter before any execution change
        if value.bit(15) {
            self.pc = value as u8;
            log::trace!("DSP PC loaded: {:02X}", self.pc);
        }

        self.executing = value.bit(16);

        // T0 step and pause control
        if value.bit(25) {
            self.paused = true;
        } else if value.bit(26) {
            self.paused = false;
        }

        log::trace!(
            "DSP_PPAF write: {value:08X} (executing = {}, paused = {})",
            self.executing,
            self.paused
        );
    }

    pub(crate) fn peek_control(&self) -> u32 {
        u32::from(self.pc)
            | (u32::from(self.executing && !self.paused) << 16)
            | (u32::from(self.ended) << 18)
            | (u32::from(self.overflow) << 19)
            | (u32::from(self.carry) << 20)
            | (u32::from(self.zero) << 21)
            | (u32::from(self.sign) << 22)
            | (u32::from(self.dma_run) << 23)
    }

    pub(crate) fn read_control(&mut self) -> u32 {
        let value = self.peek_control();

        // Reading the control port clears the sticky end/overflow flags
        self.overflow = false;
        self.ended = false;

        value
    }

    // $84 (DSP_PPD) DSP Program RAM Data Port
    pub(crate) fn write_program(&mut self, value: u32) {
        self.program_ram[self.pc as usize] = value;
        self.pc = self.pc.wrapping_add(1);
    }

    pub(crate) fn peek_program(&self) -> u32 {
        self.program_ram[self.pc as usize]
    }

    // $88 (DSP_PDA) DSP Data RAM Address Port
    pub(crate) fn write_data_address(&mut self, value: u32) {
        self.data_address = value as u8;
    }

    // $8C (DSP_PDD) DSP Data RAM Data Port
    pub(crate) fn write_data(&mut self, value: u32) {
        let (bank, offset) = self.data_bank_offset();
        self.data_ram[bank][offset] = value;
        self.data_address = self.data_address.wrapping_add(1);
    }

    pub(crate) fn peek_data(&self) -> u32 {
        let (bank, offset) = self.data_bank_offset();
        self.data_ram[bank][offset]
    }

    pub(crate) fn read_data(&mut self) -> u32 {
        let value = self.peek_data();
        self.data_address = self.data_address.wrapping_add(1);
        value
    }

    fn data_bank_offset(&self) -> (usize, usize) {
        (usize::from(self.data_address >> 6), usize::from(self.data_address & 0x3F))
    }
}

impl Default for DspHost {
    fn default() -> Self {
        Self::new()
    }
}
