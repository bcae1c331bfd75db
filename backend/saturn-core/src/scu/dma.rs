//! SCU DMA engine
//!
//! Three channels at levels 0/1/2, level 0 highest priority. Transfers stream through a 4-byte
//! read-ahead buffer filled with longword reads and drained in byte-sized pieces according to the
//! destination's alignment: a prefix of up to one byte and one word, a longword bulk phase, and a
//! suffix of up to one word and one byte.
//!
//! Destinations on the B-Bus do not behave. The SCU issues longword runs to the 16-bit B-Bus as
//! two word writes whose second address is `dst + dst_inc` rather than `dst + 2`, rewinds the
//! destination by one increment when a longword run ends the transfer, and double-increments
//! around unaligned prefix/suffix writes under specific conditions. Several commercial games
//! depend on every one of these patterns, so they are reproduced exactly.

use crate::bus::{self, BusId, MemoryBus};
use crate::scu::Scu;
use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

pub const CHANNELS: usize = 3;

// Transfers ending in the VDP range get their end interrupt quickly; everything else waits
// longer. See `immediate_interrupt_delay`.
const VDP_RANGE_START: u32 = 0x5C0_0000;
const VDP_RANGE_END: u32 = 0x5FB_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum DmaTrigger {
    #[default]
    VBlankIn = 0,
    VBlankOut = 1,
    HBlankIn = 2,
    Timer0 = 3,
    Timer1 = 4,
    SoundRequest = 5,
    SpriteDrawEnd = 6,
    Immediate = 7,
}

impl DmaTrigger {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => Self::VBlankIn,
            1 => Self::VBlankOut,
            2 => Self::HBlankIn,
            3 => Self::Timer0,
            4 => Self::Timer1,
            5 => Self::SoundRequest,
            6 => Self::SpriteDrawEnd,
            7 => Self::Immediate,
            _ => unreachable!("value & 7 is always <= 7"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub(crate) struct TransferState {
    /// Set until the initial read-ahead fill happens
    pub started: bool,
    /// 4-byte read-ahead buffer, filled with longword reads at the source rounded down
    pub buf: u32,
    /// Byte position within the read-ahead buffer
    pub buf_pos: u32,
    /// Write cursor offset relative to the longword-aligned destination
    pub curr_dst_offset: u32,
    pub curr_dst_addr: u32,
    /// Byte length of this (sub)transfer as started, for the B-Bus quirk conditions
    pub xfer_length: u32,
    /// Destination alignment (`dst & 3`) as started
    pub initial_dst_alignment: u32,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaChannel {
    pub(crate) level: u8,
    // Configured registers
    pub(crate) src_addr: u32,
    pub(crate) dst_addr: u32,
    pub(crate) xfer_count: u32,
    pub(crate) src_addr_inc: u32,
    pub(crate) dst_addr_inc: u32,
    pub(crate) indirect: bool,
    pub(crate) update_src_addr: bool,
    pub(crate) update_dst_addr: bool,
    pub(crate) trigger: DmaTrigger,
    pub(crate) enabled: bool,
    // Runtime state
    pub(crate) active: bool,
    pub(crate) start: bool,
    pub(crate) curr_src_addr: u32,
    pub(crate) curr_dst_addr: u32,
    pub(crate) curr_xfer_count: u32,
    pub(crate) curr_src_addr_inc: u32,
    pub(crate) curr_dst_addr_inc: u32,
    pub(crate) curr_indirect_src: u32,
    pub(crate) end_indirect: bool,
    pub(crate) intr_delay: u64,
    pub(crate) xfer: TransferState,
}

impl DmaChannel {
    pub(crate) fn new(level: u8) -> Self {
        Self {
            level,
            src_addr: 0,
            dst_addr: 0,
            xfer_count: 0,
            src_addr_inc: 0,
            dst_addr_inc: 0,
            indirect: false,
            update_src_addr: false,
            update_dst_addr: false,
            trigger: DmaTrigger::default(),
            enabled: false,
            active: false,
            start: false,
            curr_src_addr: 0,
            curr_dst_addr: 0,
            curr_xfer_count: 0,
            curr_src_addr_inc: 0,
            curr_dst_addr_inc: 0,
            curr_indirect_src: 0,
            end_indirect: false,
            intr_delay: 0,
            xfer: TransferState::default(),
        }
    }

    /// Transfer count with zero rewritten to the channel's maximum
    pub(crate) fn effective_count(&self) -> u32 {
        adjust_zero_count(self.level, self.xfer_count)
    }

    pub(crate) fn init_transfer(&mut self) {
        self.xfer = TransferState {
            started: true,
            buf: 0,
            buf_pos: self.curr_src_addr & 3,
            curr_dst_offset: self.curr_dst_addr & 3,
            curr_dst_addr: self.curr_dst_addr,
            xfer_length: self.curr_xfer_count,
            initial_dst_alignment: self.curr_dst_addr & 3,
        };
    }
}

pub(crate) fn adjust_zero_count(level: u8, xfer_count: u32) -> u32 {
    if xfer_count != 0 {
        xfer_count
    } else if level == 0 {
        0x10_0000
    } else {
        0x1000
    }
}

// True if the next drain of `read_size` bytes would require a read-ahead refill that the source
// bus cannot currently service, or if the destination cannot accept the impending write
fn stalled(
    ch: &DmaChannel,
    mem: &MemoryBus<'_>,
    read_size: u32,
    write_addr: u32,
    write_size: u32,
) -> bool {
    (ch.xfer.buf_pos + read_size > 4 && mem.is_bus_wait(ch.curr_src_addr & !3, 4, false))
        || mem.is_bus_wait(write_addr, write_size, true)
}

// Drain `size` bytes from the read-ahead buffer, refilling it from the source when it runs dry.
// Values are assembled big-endian across refill boundaries.
fn do_read(ch: &mut DmaChannel, mem: &mut MemoryBus<'_>, size: u32) -> u32 {
    ch.xfer.buf_pos += size;
    if ch.xfer.buf_pos <= 4 {
        return ch.xfer.buf >> ((!(ch.xfer.buf_pos - 1) & 3) * 8);
    }

    let prev_buf = ch.xfer.buf;
    ch.xfer.buf_pos -= 4;
    ch.curr_src_addr = (ch.curr_src_addr + ch.curr_src_addr_inc) & bus::ADDRESS_MASK;

    ch.xfer.buf = mem.read_longword(ch.curr_src_addr & !3);
    log::trace!(
        "SCU DMA{}: Read from {:08X} -> {:08X}",
        ch.level,
        ch.curr_src_addr & !3,
        ch.xfer.buf
    );

    let mut value = ch.xfer.buf >> ((!(ch.xfer.buf_pos - 1) & 3) * 8);
    if ch.xfer.buf_pos < 4 {
        value |= prev_buf << (ch.xfer.buf_pos * 8);
    }
    value
}

// Advance the write cursor into the next destination stride. Calling this twice in a row is
// harmless, which matters when a stalled transfer resumes.
fn inc_dst(ch: &DmaChannel, curr_dst_offset: &mut u32, curr_dst_addr: &mut u32) {
    if *curr_dst_offset >= 4 {
        *curr_dst_offset -= 4;
        *curr_dst_addr = (*curr_dst_addr + ch.curr_dst_addr_inc) & bus::ADDRESS_MASK;
    }
}

enum TransferStep {
    Completed,
    Suspended,
    Discarded,
}

impl Scu {
    /// Advance the DMA engine: count down pending end-interrupt delays, then run the active
    /// channel until it completes or stalls on a bus wait.
    pub(crate) fn run_dma(&mut self, cycles: u64, mem: &mut MemoryBus<'_>) {
        for level in 0..CHANNELS {
            let ch = &mut self.dma[level];
            if ch.intr_delay == 0 {
                continue;
            }
            if ch.intr_delay > cycles {
                ch.intr_delay -= cycles;
            } else {
                ch.intr_delay = 0;
                self.trigger_dma_end(level);
            }
        }

        while let Some(level) = self.active_dma_level {
            match self.run_active_transfer(level, mem) {
                TransferStep::Suspended => return,
                TransferStep::Completed | TransferStep::Discarded => {}
            }
        }
    }

    /// Run the active channel's current (sub)transfer. Returns `Suspended` if a bus wait stalled
    /// the stream mid-transfer; the partial cursor state is retained and the transfer resumes on
    /// the next call without re-consuming bytes.
    #[allow(clippy::too_many_lines)]
    fn run_active_transfer(&mut self, level: usize, mem: &mut MemoryBus<'_>) -> TransferStep {
        let ch = &mut self.dma[level];
        debug_assert!(ch.active);

        let src_bus = bus::bus_id(ch.curr_src_addr);
        let dst_bus = bus::bus_id(ch.curr_dst_addr);

        // Bad transfers first: same-bus and off-bus transfers never run. WRAM-to-WRAM is the
        // exception; the read buffer decouples those phases on the SCU's own bus.
        if illegal_transfer(src_bus, dst_bus) {
            if src_bus == dst_bus {
                log::trace!("SCU DMA{level}: Invalid same-bus transfer; ignored");
            } else if src_bus == BusId::None {
                log::trace!("SCU DMA{level}: Invalid source bus; transfer ignored");
            } else {
                log::trace!("SCU DMA{level}: Invalid destination bus; transfer ignored");
            }

            let chain_continues = ch.indirect && !ch.end_indirect;
            if chain_continues {
                self.dma_read_indirect_entry(level, mem);
            } else {
                self.dma[level].active = false;
                self.trigger_dma_illegal();
                self.recalc_dma_channel(mem);
            }
            return TransferStep::Discarded;
        }

        // Initial read-ahead fill
        if ch.xfer.started {
            if mem.is_bus_wait(ch.curr_src_addr & !3, 4, false) {
                log::trace!("SCU DMA{level}: initial read stalled by bus wait signal");
                return TransferStep::Suspended;
            }
            ch.xfer.started = false;
            ch.xfer.buf = mem.read_longword(ch.curr_src_addr & !3);
            log::trace!(
                "SCU DMA{level}: Read from {:08X} -> {:08X}",
                ch.curr_src_addr & !3,
                ch.xfer.buf
            );
        }

        let mut curr_dst_offset = ch.xfer.curr_dst_offset;
        let mut curr_dst_addr = ch.xfer.curr_dst_addr;

        if dst_bus != BusId::BBus {
            // Straightforward writes to the A-Bus and WRAM

            curr_dst_addr &= !3;

            // 8-bit realignment up to a word boundary
            if ch.curr_xfer_count >= 1 && curr_dst_offset & 1 != 0 {
                let addr = curr_dst_addr + curr_dst_offset;
                if stalled(ch, mem, 1, addr, 1) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 1) as u8;
                mem.write_byte(addr, value);

                curr_dst_offset += 1;
                ch.curr_xfer_count -= 1;

                log::trace!(
                    "SCU DMA{level}: 8-bit write to {addr:08X} -> {value:02X}, {:X} bytes remaining",
                    ch.curr_xfer_count
                );
            }

            // 16-bit realignment up to a longword boundary
            if ch.curr_xfer_count >= 2 && curr_dst_offset & 2 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let addr = (curr_dst_addr + curr_dst_offset) & !1;
                if stalled(ch, mem, 2, addr, 2) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 2) as u16;
                mem.write_word(addr, value);

                curr_dst_offset += 2;
                ch.curr_xfer_count -= 2;

                log::trace!(
                    "SCU DMA{level}: 16-bit write to {addr:08X} -> {value:04X}, {:X} bytes remaining",
                    ch.curr_xfer_count
                );
            }

            // Longword bulk phase
            while ch.curr_xfer_count >= 4 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let addr = (curr_dst_addr + curr_dst_offset) & !3;
                if stalled(ch, mem, 4, addr, 4) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 4);
                mem.write_longword(addr, value);

                curr_dst_offset += 4;
                ch.curr_xfer_count -= 4;

                log::trace!(
                    "SCU DMA{level}: 32-bit write to {addr:08X} -> {value:08X}, {:X} bytes remaining",
                    ch.curr_xfer_count
                );
            }

            // Final 16-bit piece
            if ch.curr_xfer_count & 2 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let addr = (curr_dst_addr + curr_dst_offset) & !1;
                if stalled(ch, mem, 2, addr, 2) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 2) as u16;
                mem.write_word(addr, value);

                curr_dst_offset += 2;
                ch.curr_xfer_count -= 2;
            }

            // Final 8-bit piece
            if ch.curr_xfer_count & 1 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let addr = curr_dst_addr + curr_dst_offset;
                if stalled(ch, mem, 1, addr, 1) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 1) as u8;
                mem.write_byte(addr, value);

                curr_dst_offset += 1;
                ch.curr_xfer_count -= 1;
            }
        } else {
            // B-Bus writes. Only +2 increments produce generally useful patterns on hardware;
            // everything else picks up the extra increments below.

            curr_dst_addr &= !1;

            // 8-bit realignment
            if ch.curr_xfer_count >= 1 && curr_dst_offset & 1 != 0 {
                let addr = curr_dst_addr | curr_dst_offset;
                if stalled(ch, mem, 1, addr, 1) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 1) as u8;
                mem.write_byte(addr, value);

                curr_dst_offset += 1;
                ch.curr_xfer_count -= 1;

                log::trace!(
                    "SCU DMA{level}: 8-bit write to {addr:08X} -> {value:02X}, {:X} bytes remaining",
                    ch.curr_xfer_count
                );

                // Double increment, but only when the increment is at least 4
                if ch.xfer.xfer_length > 1 && ch.curr_dst_addr_inc >= 4 && curr_dst_offset >= 4 {
                    curr_dst_addr = (curr_dst_addr + ch.curr_dst_addr_inc) & bus::ADDRESS_MASK;
                }
            }

            // 16-bit realignment
            if ch.curr_xfer_count >= 2 && curr_dst_offset & 2 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let mut addr = (curr_dst_addr | curr_dst_offset) & !1;

                // Odd initial alignment bumps the emitted address by a full increment
                if ch.curr_dst_addr_inc >= 4
                    && ch.xfer.initial_dst_alignment == 1
                    && curr_dst_offset + 2 >= 4
                {
                    addr += ch.curr_dst_addr_inc;
                }

                if stalled(ch, mem, 2, addr, 2) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }

                let value = do_read(ch, mem, 2) as u16;
                mem.write_word(addr, value);

                curr_dst_offset += 2;
                ch.curr_xfer_count -= 2;

                log::trace!(
                    "SCU DMA{level}: 16-bit write to {addr:08X} -> {value:04X}, {:X} bytes remaining",
                    ch.curr_xfer_count
                );

                // And the working cursor gets the same bump
                if ch.xfer.xfer_length > 3
                    && ch.xfer.initial_dst_alignment == 1
                    && curr_dst_offset >= 4
                {
                    curr_dst_addr = (curr_dst_addr + ch.curr_dst_addr_inc) & bus::ADDRESS_MASK;
                }
            }

            // Longword runs are issued to the 16-bit B-Bus as two word writes. The second write
            // lands at dst + dst_inc, not dst + 2.
            while ch.curr_xfer_count >= 4 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);

                let addr1 = (curr_dst_addr | curr_dst_offset) & !1;
                let addr2 = (((curr_dst_addr + ch.curr_dst_addr_inc) & bus::ADDRESS_MASK)
                    | curr_dst_offset)
                    & !1;

                if stalled(ch, mem, 4, addr1, 2) || mem.is_bus_wait(addr2, 2, true) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }

                let value1 = do_read(ch, mem, 2) as u16;
                mem.write_word(addr1, value1);
                log::trace!("SCU DMA{level}: 16-bit write to {addr1:08X} -> {value1:04X}");

                let value2 = do_read(ch, mem, 2) as u16;
                mem.write_word(addr2, value2);
                log::trace!("SCU DMA{level}: 16-bit write to {addr2:08X} -> {value2:04X}");

                curr_dst_addr = (curr_dst_addr + ch.curr_dst_addr_inc) & bus::ADDRESS_MASK;
                curr_dst_offset += 4;
                ch.curr_xfer_count -= 4;

                log::trace!("SCU DMA{level}: {:X} bytes remaining", ch.curr_xfer_count);

                // A longword run that ends the transfer rewinds the destination, so chained
                // transfers reuse the previous write address
                if ch.curr_xfer_count == 0 {
                    curr_dst_addr =
                        curr_dst_addr.wrapping_sub(ch.curr_dst_addr_inc) & bus::ADDRESS_MASK;
                }
            }

            // Final 16-bit piece; the only well-behaved B-Bus case
            if ch.curr_xfer_count & 2 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let addr = (curr_dst_addr | curr_dst_offset) & !1;
                if stalled(ch, mem, 2, addr, 2) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }
                let value = do_read(ch, mem, 2) as u16;
                mem.write_word(addr, value);

                curr_dst_offset += 2;
                ch.curr_xfer_count -= 2;
            }

            // Final 8-bit piece
            if ch.curr_xfer_count & 1 != 0 {
                inc_dst(ch, &mut curr_dst_offset, &mut curr_dst_addr);
                let mut addr = curr_dst_addr | curr_dst_offset;

                if ch.xfer.xfer_length > 1 && ch.curr_dst_addr_inc >= 4 && curr_dst_offset & 2 != 0
                {
                    addr += ch.curr_dst_addr_inc;
                }

                if stalled(ch, mem, 1, addr, 1) {
                    ch.xfer.curr_dst_offset = curr_dst_offset;
                    ch.xfer.curr_dst_addr = curr_dst_addr;
                    return TransferStep::Suspended;
                }

                let value = do_read(ch, mem, 1) as u8;
                mem.write_byte(addr, value);

                curr_dst_offset += 1;
                ch.curr_xfer_count -= 1;
            }
        }

        log::trace!(
            "SCU DMA{level}: Addresses incremented to {:08X}, {curr_dst_addr:08X}",
            ch.curr_src_addr
        );

        debug_assert_eq!(ch.curr_xfer_count, 0);

        if ch.indirect && !ch.end_indirect {
            self.dma_read_indirect_entry(level, mem);
            return TransferStep::Completed;
        }

        log::trace!("SCU DMA{level}: Finished transfer");
        ch.active = false;
        if ch.update_src_addr {
            ch.src_addr = (ch.curr_src_addr & !3) + ch.xfer.buf_pos;
        }
        if ch.update_dst_addr {
            if ch.indirect {
                ch.dst_addr = ch.curr_indirect_src;
            } else if dst_bus == BusId::BBus {
                // Not even the final register write-back is straightforward on the B-Bus
                ch.dst_addr =
                    ((curr_dst_addr & !3) | (curr_dst_offset & 3)) + (curr_dst_offset & !3);
            } else {
                ch.dst_addr = (curr_dst_addr & !3) + curr_dst_offset;
            }
        }
        ch.xfer.curr_dst_offset = curr_dst_offset;
        ch.xfer.curr_dst_addr = curr_dst_addr;
        ch.curr_dst_addr = curr_dst_addr;

        if ch.trigger == DmaTrigger::Immediate {
            // Delay the end interrupt by a destination-dependent heuristic: VDP targets want the
            // signal quickly, SCSP RAM targets want it later. The transfer itself has already
            // completed within this advance.
            ch.intr_delay = immediate_interrupt_delay(ch.dst_addr)
                + u64::from((adjust_zero_count(ch.level, ch.xfer_count) >> 4).min(32));
        } else {
            self.trigger_dma_end(level);
        }
        self.recalc_dma_channel(mem);

        TransferStep::Completed
    }

    /// Read the next 12-byte indirect table entry `(count, dest, source)` and start its
    /// sub-transfer. The source longword's high bit marks the final entry of the chain.
    pub(crate) fn dma_read_indirect_entry(&mut self, level: usize, mem: &mut MemoryBus<'_>) {
        let ch = &mut self.dma[level];
        let base_indirect_src = ch.curr_indirect_src;
        let inc = ch.src_addr_inc;

        let raw_count = mem.read_longword(base_indirect_src);
        let raw_dst = mem.read_longword(base_indirect_src + inc);
        let raw_src = mem.read_longword(base_indirect_src + 2 * inc);

        ch.curr_xfer_count = (raw_count.wrapping_sub(1) & 0xFFFFF) + 1;
        ch.curr_dst_addr = raw_dst & bus::ADDRESS_MASK;
        ch.curr_src_addr = raw_src & bus::ADDRESS_MASK;
        ch.curr_indirect_src = base_indirect_src + 3 * inc;
        ch.end_indirect = raw_src.bit(31);
        ch.curr_src_addr_inc = ch.src_addr_inc;
        ch.curr_dst_addr_inc = ch.dst_addr_inc;
        ch.init_transfer();

        log::trace!(
            "SCU DMA{level}: Starting indirect transfer at {base_indirect_src:08X} - {:06X} bytes from {:08X} (+{:02X}) to {:08X} (+{:02X}){}",
            ch.curr_xfer_count,
            ch.curr_src_addr,
            ch.curr_src_addr_inc,
            ch.curr_dst_addr,
            ch.curr_dst_addr_inc,
            if ch.end_indirect { " (final)" } else { "" }
        );
    }

    /// Pick the channel to run: a still-active channel keeps the bus, otherwise the
    /// highest-priority channel with a latched start request is activated.
    pub(crate) fn recalc_dma_channel(&mut self, mem: &mut MemoryBus<'_>) {
        self.active_dma_level = None;

        for level in 0..CHANNELS {
            let ch = &self.dma[level];
            if ch.enabled && ch.active {
                self.active_dma_level = Some(level);
                return;
            }
        }

        for level in 0..CHANNELS {
            if !self.dma[level].enabled || !self.dma[level].start {
                continue;
            }

            self.dma[level].start = false;
            self.dma[level].active = true;

            if self.dma[level].indirect {
                self.dma[level].curr_indirect_src = self.dma[level].dst_addr;
                self.dma_read_indirect_entry(level, mem);

                let ch = &self.dma[level];
                let src_bus = bus::bus_id(ch.curr_src_addr);
                let dst_bus = bus::bus_id(ch.curr_dst_addr);
                if illegal_transfer(src_bus, dst_bus) {
                    log::trace!("SCU DMA{level}: Invalid indirect transfer start; ignored");
                    self.dma[level].active = false;
                    self.trigger_dma_illegal();
                    continue;
                }
            } else {
                let ch = &mut self.dma[level];
                ch.curr_src_addr = ch.src_addr & bus::ADDRESS_MASK;
                ch.curr_dst_addr = ch.dst_addr & bus::ADDRESS_MASK;
                ch.curr_xfer_count = ch.effective_count();
                ch.curr_src_addr_inc = ch.src_addr_inc;
                ch.curr_dst_addr_inc = ch.dst_addr_inc;
                ch.init_transfer();

                log::trace!(
                    "SCU DMA{level}: Starting direct transfer of {:06X} bytes from {:08X} (+{:02X}) to {:08X} (+{:02X})",
                    ch.curr_xfer_count,
                    ch.curr_src_addr,
                    ch.curr_src_addr_inc,
                    ch.curr_dst_addr,
                    ch.curr_dst_addr_inc
                );
            }

            self.active_dma_level = Some(level);
            return;
        }
    }

    pub(crate) fn trigger_immediate_dma(&mut self, level: usize, mem: &mut MemoryBus<'_>) {
        let ch = &self.dma[level];
        if ch.enabled && ch.trigger == DmaTrigger::Immediate {
            log::trace!("SCU DMA{level}: Transfer triggered immediately");
            self.dma[level].start = true;
            self.recalc_dma_channel(mem);
            self.run_dma(0, mem);
        }
    }

    /// Latch a start request into every enabled, inactive channel whose trigger matches
    pub(crate) fn trigger_dma_transfer(&mut self, trigger: DmaTrigger, mem: &mut MemoryBus<'_>) {
        for level in 0..CHANNELS {
            let ch = &mut self.dma[level];
            if ch.enabled && !ch.active && ch.trigger == trigger {
                log::trace!("SCU DMA{level}: Transfer triggered by {trigger:?}");
                ch.start = true;
            }
        }
        self.recalc_dma_channel(mem);
    }

    /// DMA force stop: clears `active` on all channels without raising any interrupt
    pub(crate) fn force_stop_dma(&mut self) {
        for ch in &mut self.dma {
            ch.active = false;
        }
        self.active_dma_level = None;
    }
}

fn illegal_transfer(src_bus: BusId, dst_bus: BusId) -> bool {
    (src_bus == dst_bus && src_bus != BusId::CBus)
        || src_bus == BusId::None
        || dst_bus == BusId::None
}

fn immediate_interrupt_delay(dst_addr: u32) -> u64 {
    if (VDP_RANGE_START..=VDP_RANGE_END).contains(&(dst_addr & bus::ADDRESS_MASK)) { 1 } else { 33 }
}
