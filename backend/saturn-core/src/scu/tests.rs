//! SCU DMA, interrupt, and timer scenario tests

use super::*;
use crate::bus::{SoundRam, WramHigh, WramLow};
use crate::cartridge::Cartridge;
use crate::cdblock::CdBlock;
use crate::scu::interrupts::InternalInterrupt;
use crate::vdp::{Vdp, VdpConfig};

struct ScuFixture {
    scu: Scu,
    scheduler: Scheduler,
    wram_low: WramLow,
    wram_high: WramHigh,
    sound_ram: SoundRam,
    vdp: Vdp,
    cartridge: Cartridge,
    cd: CdBlock,
}

impl ScuFixture {
    fn new() -> Self {
        Self {
            scu: Scu::new(),
            scheduler: Scheduler::new(),
            wram_low: WramLow::new(),
            wram_high: WramHigh::new(),
            sound_ram: SoundRam::new(),
            vdp: Vdp::new(VdpConfig::default()),
            cartridge: Cartridge::none(),
            cd: CdBlock::new(),
        }
    }
}

// Writing the fixture accessor as a macro sidesteps borrowing the whole fixture mutably while
// the SCU is borrowed separately
macro_rules! mem {
    ($fixture:expr) => {
        crate::bus::MemoryBus {
            wram_low: &mut $fixture.wram_low,
            wram_high: &mut $fixture.wram_high,
            sound_ram: &mut $fixture.sound_ram,
            vdp: &mut $fixture.vdp,
            cartridge: &mut $fixture.cartridge,
            cd: &mut $fixture.cd,
            bios: &[],
        }
    };
}

fn configure_channel(
    fixture: &mut ScuFixture,
    level: u32,
    src: u32,
    dst: u32,
    count: u32,
    src_inc_bit: u32,
    dst_inc_bits: u32,
    mode: u32,
) {
    let base = level * 0x20;
    let mut mem = mem!(fixture);
    fixture.scu.write_reg_long(base, src, &mut mem);
    fixture.scu.write_reg_long(base + 0x04, dst, &mut mem);
    fixture.scu.write_reg_long(base + 0x08, count, &mut mem);
    fixture.scu.write_reg_long(base + 0x0C, (src_inc_bit << 8) | dst_inc_bits, &mut mem);
    fixture.scu.write_reg_long(base + 0x14, mode, &mut mem);
}

fn enable_channel(fixture: &mut ScuFixture, level: u32) {
    let mut mem = mem!(fixture);
    fixture.scu.write_reg_long(level * 0x20 + 0x10, 0x101, &mut mem);
}

const MODE_DIRECT_IMMEDIATE: u32 = 0x0000_0007;
const MODE_DIRECT_VBLANK_IN: u32 = 0x0000_0000;
const MODE_INDIRECT_IMMEDIATE: u32 = 0x0100_0007;

fn status_bit(scu: &Scu, interrupt: InternalInterrupt) -> bool {
    scu.interrupt_status() & u32::from(interrupt.bit_mask()) != 0
}

#[test]
fn immediate_dma_to_wram_round_trip() {
    let mut fixture = ScuFixture::new();

    // Pattern in high WRAM at $6000000
    {
        let mut mem = mem!(fixture);
        for i in 0..0x100u32 {
            mem.write_byte(0x600_0000 + i, (i ^ 0xA5) as u8);
        }
    }

    configure_channel(
        &mut fixture,
        1,
        0x600_0000,
        0x602_0000,
        0x100,
        1,
        2,
        MODE_DIRECT_IMMEDIATE,
    );
    enable_channel(&mut fixture, 1);

    // The copy itself completes within the enable write; the end interrupt lags behind it
    {
        let mut mem = mem!(fixture);
        for i in 0..0x100u32 {
            assert_eq!(
                mem.read_byte(0x602_0000 + i),
                (i ^ 0xA5) as u8,
                "mismatch at offset {i:X}"
            );
        }
    }
    assert!(!status_bit(&fixture.scu, InternalInterrupt::Level1DmaEnd));

    let mut mem = mem!(fixture);
    fixture.scu.advance(50, &mut mem);
    assert!(status_bit(&fixture.scu, InternalInterrupt::Level1DmaEnd));
}

#[test]
fn bbus_longword_runs_land_at_dst_plus_increment() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        for i in 0..0x10u32 {
            mem.write_byte(0x600_1000 + i, i as u8);
        }
    }

    // Channel 0 to VDP2 VRAM, dst_inc = 4, with destination register write-back enabled
    configure_channel(
        &mut fixture,
        0,
        0x600_1000,
        0x5E0_0000,
        0x10,
        1,
        2,
        MODE_DIRECT_IMMEDIATE | 0x100,
    );
    enable_channel(&mut fixture, 0);

    let mut mem = mem!(fixture);

    // Each longword run issues two word writes; the second lands at dst + dst_inc rather than
    // dst + 2, leaving every odd word untouched
    let expected: &[(u32, u16)] = &[
        (0x5E0_0000, 0x0001),
        (0x5E0_0004, 0x0203),
        (0x5E0_0008, 0x0405),
        (0x5E0_000C, 0x0607),
        (0x5E0_0010, 0x0809),
        (0x5E0_0014, 0x0A0B),
        (0x5E0_0018, 0x0C0D),
        (0x5E0_001C, 0x0E0F),
    ];
    for &(address, value) in expected {
        assert_eq!(mem.read_word(address), value, "mismatch at {address:08X}");
        assert_eq!(mem.read_word(address + 2), 0, "gap word written at {address:08X}");
    }

    // The final run rewinds the cursor by one increment; the written-back register points one
    // increment past the rewound position
    assert_eq!(fixture.scu.peek_reg_long(0x04), 0x5E0_001C);
}

#[test]
fn indirect_chain_runs_all_entries_and_raises_one_interrupt() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        for i in 0..0x30u32 {
            mem.write_byte(0x600_3000 + i, (0x40 + i) as u8);
        }

        // Three 12-byte entries of (count, dest, source); final entry marked in the source's
        // high bit
        let entries: &[(u32, u32, u32)] = &[
            (0x10, 0x5A0_0000, 0x600_3000),
            (0x10, 0x5A0_0100, 0x600_3010),
            (0x10, 0x5A0_0200, 0x8600_3020),
        ];
        for (i, &(count, dst, src)) in entries.iter().enumerate() {
            let base = 0x600_2000 + 12 * i as u32;
            mem.write_longword(base, count);
            mem.write_longword(base + 4, dst);
            mem.write_longword(base + 8, src);
        }
    }

    // Channel 2 indirect: the write address register holds the table base, and the table is
    // walked with the 4-byte read address stride
    configure_channel(
        &mut fixture,
        2,
        0,
        0x600_2000,
        0x10,
        1,
        1,
        MODE_INDIRECT_IMMEDIATE,
    );
    enable_channel(&mut fixture, 2);

    {
        let mut mem = mem!(fixture);
        for (entry, dst_base) in [(0u32, 0x5A0_0000u32), (1, 0x5A0_0100), (2, 0x5A0_0200)] {
            for i in 0..0x10u32 {
                assert_eq!(
                    mem.read_byte(dst_base + i),
                    (0x40 + entry * 0x10 + i) as u8,
                    "entry {entry} offset {i:X}"
                );
            }
        }
    }

    assert!(!status_bit(&fixture.scu, InternalInterrupt::Level2DmaEnd));

    let mut mem = mem!(fixture);
    fixture.scu.advance(100, &mut mem);
    assert!(status_bit(&fixture.scu, InternalInterrupt::Level2DmaEnd));
}

#[test]
fn level_0_runs_before_level_2_on_simultaneous_trigger() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        for i in 0..0x10u32 {
            mem.write_byte(0x600_4000 + i, (0x30 + i) as u8);
        }
        // Unmask the DMA end interrupts; keep the blanking interrupts masked so they don't
        // occupy the pin first
        fixture.scu.write_reg_long(0xA0, 0x8007, &mut mem);
    }

    configure_channel(&mut fixture, 0, 0x600_4000, 0x5A0_1000, 0x10, 1, 1, MODE_DIRECT_VBLANK_IN);
    configure_channel(&mut fixture, 2, 0x600_4000, 0x5A0_2000, 0x10, 1, 1, MODE_DIRECT_VBLANK_IN);
    enable_channel(&mut fixture, 0);
    enable_channel(&mut fixture, 2);

    {
        let mut mem = mem!(fixture);
        fixture.scu.update_vblank(true, &mut mem);
        fixture.scu.advance(10, &mut mem);
    }

    // Both transfers completed within the advance; level 0's end interrupt went to the pin
    // first, leaving level 2's latched in status behind it
    let (level, vector) = fixture.scu.master_interrupt_pin();
    assert_eq!((level, vector), (0x5, 0x40 + 11));
    assert!(status_bit(&fixture.scu, InternalInterrupt::Level2DmaEnd));
    assert!(!status_bit(&fixture.scu, InternalInterrupt::Level0DmaEnd));

    let mut mem = mem!(fixture);
    assert_eq!(mem.read_byte(0x5A0_1000), 0x30);
    assert_eq!(mem.read_byte(0x5A0_100F), 0x3F);
    assert_eq!(mem.read_byte(0x5A0_2000), 0x30);
}

#[test]
fn same_bus_transfer_is_discarded_with_dma_illegal() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        mem.write_longword(0x5A0_0000, 0x11223344);
    }

    // Sound RAM to VDP2 VRAM is B-Bus to B-Bus
    configure_channel(&mut fixture, 0, 0x5A0_0000, 0x5E0_0000, 0x10, 1, 1, MODE_DIRECT_IMMEDIATE);
    enable_channel(&mut fixture, 0);

    assert!(status_bit(&fixture.scu, InternalInterrupt::DmaIllegal));
    assert!(!status_bit(&fixture.scu, InternalInterrupt::Level0DmaEnd));

    let mut mem = mem!(fixture);
    assert_eq!(mem.read_longword(0x5E0_0000), 0);
}

#[test]
fn wram_to_wram_is_not_illegal() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        mem.write_longword(0x600_0000, 0xCAFEBABE);
    }

    configure_channel(&mut fixture, 2, 0x600_0000, 0x601_0000, 4, 1, 2, MODE_DIRECT_IMMEDIATE);
    enable_channel(&mut fixture, 2);

    assert!(!status_bit(&fixture.scu, InternalInterrupt::DmaIllegal));

    let mut mem = mem!(fixture);
    assert_eq!(mem.read_longword(0x601_0000), 0xCAFEBABE);
}

#[test]
fn bus_wait_suspends_and_force_stop_aborts_without_interrupt() {
    let mut fixture = ScuFixture::new();

    fixture.cd.set_fifo_stalled(true);

    // WRAM to the CD block data port; the stalled FIFO suspends the transfer immediately
    configure_channel(&mut fixture, 0, 0x600_0000, 0x580_0000, 0x10, 1, 1, MODE_DIRECT_IMMEDIATE);
    enable_channel(&mut fixture, 0);

    assert_eq!(fixture.scu.peek_reg_long(0x7C) & 0x10, 0x10, "channel 0 should be active");

    // Force stop, then release the FIFO; nothing further should run
    {
        let mut mem = mem!(fixture);
        fixture.scu.write_reg_long(0x60, 1, &mut mem);
    }
    fixture.cd.set_fifo_stalled(false);

    let mut mem = mem!(fixture);
    fixture.scu.advance(1000, &mut mem);

    assert_eq!(fixture.scu.peek_reg_long(0x7C) & 0x10, 0);
    assert!(!status_bit(&fixture.scu, InternalInterrupt::Level0DmaEnd));
}

#[test]
fn timer0_matches_at_line_100() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        // Compare = 100, timers enabled
        fixture.scu.write_reg_long(0x90, 100, &mut mem);
        fixture.scu.write_reg_long(0x98, 1, &mut mem);
        // Mask everything except Timer 0
        fixture
            .scu
            .write_reg_long(0xA0, u32::from(!InternalInterrupt::Timer0.bit_mask()), &mut mem);

        // VBlank-OUT resets the counter
        fixture.scu.update_vblank(false, &mut mem);
    }

    for line in 0..=100u16 {
        assert!(
            !status_bit(&fixture.scu, InternalInterrupt::Timer0),
            "timer fired early on line {line}"
        );
        let mut mem = mem!(fixture);
        fixture.scu.update_hblank(true, false, &mut fixture.scheduler, &mut mem);
        fixture.scu.update_hblank(false, false, &mut fixture.scheduler, &mut mem);
    }

    // Counter reached 100 before the increment on the 101st HBlank-IN; Timer 0 raises at
    // level 13 with vector $43
    assert_eq!(fixture.scu.master_interrupt_pin(), (0xD, 0x43));
}

#[test]
fn timer1_fires_reload_cycles_after_hblank() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        fixture.scu.write_reg_long(0x94, 0x40, &mut mem);
        fixture.scu.write_reg_long(0x98, 1, &mut mem);
        fixture.scu.update_vblank(false, &mut mem);
        fixture.scu.update_hblank(true, false, &mut fixture.scheduler, &mut mem);
    }

    let (event, _) = fixture.scheduler.advance_to(0x40);
    assert_eq!(event, Some(SchedulerEvent::ScuTimer1));

    let mut mem = mem!(fixture);
    fixture.scu.tick_timer1(&mut mem);
    assert!(status_bit(&fixture.scu, InternalInterrupt::Timer1));
}

#[test]
fn slave_interrupt_pin_follows_blanking_signals() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        fixture.scu.update_hblank(true, false, &mut fixture.scheduler, &mut mem);
    }
    assert_eq!(fixture.scu.slave_interrupt_pin(), (2, 0x41));

    {
        let mut mem = mem!(fixture);
        fixture.scu.update_hblank(false, false, &mut fixture.scheduler, &mut mem);
    }
    assert_eq!(fixture.scu.slave_interrupt_pin(), (0, 0));

    {
        let mut mem = mem!(fixture);
        fixture.scu.update_vblank(true, &mut mem);
    }
    assert_eq!(fixture.scu.slave_interrupt_pin(), (6, 0x43));

    {
        let mut mem = mem!(fixture);
        fixture.scu.update_vblank(false, &mut mem);
    }
    assert_eq!(fixture.scu.slave_interrupt_pin(), (4, 0x42));
}

#[test]
fn vblank_in_outranks_pad_interrupt() {
    let mut fixture = ScuFixture::new();

    // Latch both sources in status while everything is masked, then unmask
    {
        let mut mem = mem!(fixture);
        fixture.scu.trigger_pad();
        fixture.scu.update_vblank(true, &mut mem);
        assert_eq!(fixture.scu.master_interrupt_pin(), (0, 0));

        fixture.scu.write_reg_long(0xA0, 0, &mut mem);
    }
    assert_eq!(fixture.scu.master_interrupt_pin(), (0xF, 0x40));

    // Pad follows once the CPU acknowledges and the mask is cleared again
    fixture.scu.acknowledge_master_interrupt();
    {
        let mut mem = mem!(fixture);
        fixture.scu.write_reg_long(0xA0, 0, &mut mem);
    }
    assert_eq!(fixture.scu.master_interrupt_pin(), (0x8, 0x48));
}

#[test]
fn acknowledging_clears_the_pin_and_restores_the_mask() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        fixture.scu.write_reg_long(0xA0, 0, &mut mem);
        fixture.scu.update_vblank(true, &mut mem);
    }
    assert_eq!(fixture.scu.master_interrupt_pin(), (0xF, 0x40));

    fixture.scu.acknowledge_master_interrupt();
    assert_eq!(fixture.scu.master_interrupt_pin(), (0, 0));
    assert_eq!(fixture.scu.peek_reg_long(0xA0), 0xBFFF);
}

#[test]
fn write_only_registers_read_zero_but_peek_their_configuration() {
    let mut fixture = ScuFixture::new();

    {
        let mut mem = mem!(fixture);
        fixture.scu.write_reg_long(0x0C, 0x0000_0102, &mut mem);
        fixture.scu.write_reg_long(0x14, 0x0100_0103, &mut mem);
    }

    assert_eq!(fixture.scu.read_reg_long(0x0C), 0);
    assert_eq!(fixture.scu.read_reg_long(0x14), 0);

    assert_eq!(fixture.scu.peek_reg_long(0x0C), 0x0000_0102);
    assert_eq!(fixture.scu.peek_reg_long(0x14), 0x0100_0103);
}

#[test]
fn dsp_program_upload_advances_the_program_counter() {
    let mut fixture = ScuFixture::new();

    let mut mem = mem!(fixture);
    // Load PC = 0x10, then upload two opcodes
    fixture.scu.write_reg_long(0x80, 0x8010, &mut mem);
    fixture.scu.write_reg_long(0x84, 0x1234_5678, &mut mem);
    fixture.scu.write_reg_long(0x84, 0x9ABC_DEF0, &mut mem);

    assert_eq!(fixture.scu.dsp.program_ram[0x10], 0x1234_5678);
    assert_eq!(fixture.scu.dsp.program_ram[0x11], 0x9ABC_DEF0);
    assert_eq!(fixture.scu.dsp.pc, 0x12);

    // Data RAM upload through PDA/PDD
    fixture.scu.write_reg_long(0x88, 0x40, &mut mem);
    fixture.scu.write_reg_long(0x8C, 0xAAAA_5555, &mut mem);
    assert_eq!(fixture.scu.dsp.data_ram[1][0], 0xAAAA_5555);
}
