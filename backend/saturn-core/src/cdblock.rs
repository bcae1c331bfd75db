//! CD block bus interface stub
//!
//! The CD block proper (drive emulation, sector delivery, file system commands) is an external
//! collaborator. The core needs two things from it: a register window on A-Bus CS2, and a
//! back-pressure signal that stalls DMA transfers while its data FIFO is full or empty, so the
//! SCU can suspend a transfer mid-stream instead of over/underflowing the FIFO.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode)]
pub struct CdBlock {
    /// Set by the external CD block while its data transfer FIFO cannot accept the next access
    fifo_stalled: bool,
    /// Last value written to the data transfer register, so reads have something to echo
    hirq: u16,
}

impl CdBlock {
    pub fn new() -> Self {
        Self { fifo_stalled: false, hirq: 0 }
    }

    /// True if an access of `size` bytes at `address` would need to wait on the FIFO
    #[must_use]
    pub fn is_fifo_stalled(&self) -> bool {
        self.fifo_stalled
    }

    pub fn set_fifo_stalled(&mut self, stalled: bool) {
        self.fifo_stalled = stalled;
    }

    pub fn read_word(&self, address: u32) -> u16 {
        log::trace!("CD block register read {address:08X}");
        self.hirq
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        log::trace!("CD block register write {address:08X} {value:04X}");
        self.hirq = value;
    }
}

impl Default for CdBlock {
    fn default() -> Self {
        Self::new()
    }
}
