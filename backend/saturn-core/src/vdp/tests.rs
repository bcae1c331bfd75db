//! VDP frame pacing, framebuffer swap, and VDP1 command processor tests

use super::*;
use crate::scheduler::Scheduler;
use crate::vdp::timing::LINE_CYCLES_NORMAL;

fn new_vdp() -> (Vdp, Scheduler) {
    let mut scheduler = Scheduler::new();
    let mut vdp = Vdp::new(VdpConfig::default());
    vdp.update_resolution();
    vdp.init(&mut scheduler);
    (vdp, scheduler)
}

/// Run the phase machine until the predicate matches an effect, returning the cycle count at
/// which it fired
fn run_until(
    vdp: &mut Vdp,
    scheduler: &mut Scheduler,
    mut predicate: impl FnMut(&VdpTickEffects) -> bool,
) -> u64 {
    // At most four fields worth of events
    for _ in 0..4 * 4 * 263 {
        let (event, _) = scheduler.advance_to(u64::MAX >> 1);
        assert_eq!(event, Some(crate::scheduler::SchedulerEvent::VdpPhase));
        let effects = vdp.on_phase_event(scheduler);
        if predicate(&effects) {
            return scheduler.current();
        }
    }
    panic!("phase machine never produced the expected effect");
}

#[test]
fn vblank_in_to_vblank_out_spans_the_blanking_lines() {
    let (mut vdp, mut scheduler) = new_vdp();

    let vblank_in_at =
        run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(true));
    let vblank_out_at =
        run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(false));

    // NTSC 320x224: 263 lines per even field, 224 of them active
    let blanking_lines = 263 - 224;
    assert_eq!(
        vblank_out_at - vblank_in_at,
        u64::from(LINE_CYCLES_NORMAL) * blanking_lines
    );
}

#[test]
fn smpc_vblank_in_signal_accompanies_the_vblank_edge() {
    let (mut vdp, mut scheduler) = new_vdp();

    let mut smpc_seen = false;
    run_until(&mut vdp, &mut scheduler, |effects| {
        smpc_seen |= effects.smpc_vblank_in;
        effects.vblank == Some(true)
    });
    assert!(smpc_seen);
}

#[test]
fn manual_swap_happens_exactly_once_at_vblank_out() {
    let (mut vdp, mut scheduler) = new_vdp();

    // Manual change mode with a swap request
    vdp.vdp1_write_reg(0x02, 0x0003);
    assert_eq!(vdp.display_fb_index(), 0);

    run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(false));
    assert_eq!(vdp.display_fb_index(), 1);

    // No new FBCR write: the next VBlank-OUT must not swap again
    run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(false));
    assert_eq!(vdp.display_fb_index(), 1);
}

#[test]
fn one_cycle_mode_swaps_every_frame() {
    let (mut vdp, mut scheduler) = new_vdp();

    run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(false));
    assert_eq!(vdp.display_fb_index(), 1);
    run_until(&mut vdp, &mut scheduler, |effects| effects.vblank == Some(false));
    assert_eq!(vdp.display_fb_index(), 0);
}

fn write_polygon_command(vdp: &mut Vdp, address: u32, color: u16, quad: [(i16, i16); 4]) {
    vdp.vdp1_write_vram_word(address, 0x0004);
    vdp.vdp1_write_vram_word(address + 0x02, 0);
    // SPD set so zero color data still plots
    vdp.vdp1_write_vram_word(address + 0x04, 0x0040);
    vdp.vdp1_write_vram_word(address + 0x06, color);
    for (i, (x, y)) in quad.into_iter().enumerate() {
        vdp.vdp1_write_vram_word(address + 0x0C + 4 * i as u32, x as u16);
        vdp.vdp1_write_vram_word(address + 0x0E + 4 * i as u32, y as u16);
    }
}

#[test]
fn vdp1_polygon_rasterizes_into_the_draw_framebuffer() {
    let (mut vdp, mut scheduler) = new_vdp();

    write_polygon_command(&mut vdp, 0, 0x7FFF, [(0, 0), (7, 0), (7, 7), (0, 7)]);
    // End command
    vdp.vdp1_write_vram_word(0x20, 0x8000);

    // Plot mode 1: drawing starts on the PTMR write
    vdp.vdp1_write_reg(0x04, 1);
    let finished = vdp.take_vdp1_start_request(&mut scheduler);
    assert!(finished, "an 8x8 polygon fits in a single slice");

    // EDSR reports the transfer complete
    assert_eq!(vdp.vdp1_read_reg(0x10) & 0x2, 0x2);

    for y in 0..8u32 {
        for x in 0..8u32 {
            assert_eq!(
                vdp.vdp1_read_fb_word((y * 512 + x) * 2),
                0x7FFF,
                "missing pixel at ({x}, {y})"
            );
        }
    }
    assert_eq!(vdp.vdp1_read_fb_word((8 * 512 + 8) * 2), 0, "pixel outside the polygon");
}

#[test]
fn vdp1_gouraud_polygon_shades_between_vertices() {
    let (mut vdp, mut scheduler) = new_vdp();

    // Polygon with gouraud shading (draw mode 4), gouraud table at $40
    vdp.vdp1_write_vram_word(0, 0x0004);
    vdp.vdp1_write_vram_word(0x04, 0x0044);
    vdp.vdp1_write_vram_word(0x06, 0x294A); // mid-grey RGB555
    let quad: [(i16, i16); 4] = [(0, 0), (15, 0), (15, 15), (0, 15)];
    for (i, (x, y)) in quad.into_iter().enumerate() {
        vdp.vdp1_write_vram_word(0x0C + 4 * i as u32, x as u16);
        vdp.vdp1_write_vram_word(0x0E + 4 * i as u32, y as u16);
    }
    vdp.vdp1_write_vram_word(0x1C, 0x40 >> 3);
    // Gouraud: A dark, B bright, C dark, D bright
    vdp.vdp1_write_vram_word(0x40, 0x0000);
    vdp.vdp1_write_vram_word(0x42, 0x7FFF);
    vdp.vdp1_write_vram_word(0x44, 0x0000);
    vdp.vdp1_write_vram_word(0x46, 0x7FFF);
    vdp.vdp1_write_vram_word(0x20, 0x8000);

    vdp.vdp1_write_reg(0x04, 1);
    assert!(vdp.take_vdp1_start_request(&mut scheduler));

    let left = vdp.vdp1_read_fb_word(0);
    let right = vdp.vdp1_read_fb_word(15 * 2);
    assert!(
        (right & 0x1F) > (left & 0x1F),
        "gouraud shading should brighten towards vertex B: {left:04X} vs {right:04X}"
    );
}

#[test]
fn external_vram_writes_accrue_the_timing_penalty() {
    let (mut vdp, mut scheduler) = new_vdp();

    // A very long polygon list so drawing stays active across slices
    for i in 0..64u32 {
        write_polygon_command(&mut vdp, i * 0x20, 0x001F, [(0, 0), (127, 0), (127, 127), (0, 127)]);
    }
    vdp.vdp1_write_vram_word(64 * 0x20, 0x8000);

    vdp.vdp1_write_reg(0x04, 1);
    let finished = vdp.take_vdp1_start_request(&mut scheduler);
    assert!(!finished, "64 full-screen polygons cannot finish in one slice");
    assert!(vdp.vdp1_drawing());

    let penalty_before = vdp.vdp1_timing_penalty;
    vdp.vdp1_write_vram_word(0x7000, 0x1234);
    assert_eq!(vdp.vdp1_timing_penalty, penalty_before + VDP1_VRAM_WRITE_PENALTY);
}

#[test]
fn save_state_round_trips_vdp_memory() {
    let (mut vdp, mut scheduler) = new_vdp();

    vdp.vdp2_write_vram_word(0x1234, 0xBEEF);
    vdp.vdp2_write_cram_word(0x10, 0x7C00);
    vdp.vdp1_write_vram_word(0x100, 0xCAFE);
    vdp.vdp1_write_fb_word(0x40, 0x1111);

    let state = vdp.save_state();

    // Clobber everything, then restore
    vdp.vdp2_write_vram_word(0x1234, 0);
    vdp.vdp2_write_cram_word(0x10, 0);
    vdp.vdp1_write_vram_word(0x100, 0);
    vdp.vdp1_write_fb_word(0x40, 0);

    vdp.load_state(state, &mut scheduler);

    assert_eq!(vdp.vdp2_read_vram_word(0x1234), 0xBEEF);
    assert_eq!(vdp.vdp2_read_cram_word(0x10), 0x7C00);
    assert_eq!(vdp.vdp1_read_vram_word(0x100), 0xCAFE);
    assert_eq!(vdp.vdp1_read_fb_word(0x40), 0x1111);
}
