//! Dual VDP simulation
//!
//! VDP1 draws sprites, polygons, and lines into one of two framebuffers while the other is
//! displayed; VDP2 composes scroll/rotation backgrounds with the displayed sprite framebuffer
//! into the final picture. This module owns the live state both CPUs and the SCU DMA engine see
//! over the B-Bus; the VDP2 pixel pipeline runs against mirror state on the render backend,
//! which may be a worker thread.

pub mod registers1;
pub mod registers2;
pub mod render;
pub mod rotation;
pub mod timing;
pub mod vdp2;

mod vdp1;

#[cfg(test)]
mod tests;

use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::vdp::registers1::Vdp1Registers;
use crate::vdp::registers2::Vdp2Registers;
use crate::vdp::render::{RenderBackend, RenderEvent, RendererSync};
use crate::vdp::timing::{HorizontalPhase, TimingState};
use crate::vdp::vdp1::Vdp1RenderState;
use crate::vdp::vdp2::FrameParams;
use bincode::{Decode, Encode};
use jsaturn_common::boxedarray::BoxedByteArray;
use jsaturn_common::frontend::{InterlaceMode, TimingMode};

pub const VDP1_VRAM_LEN: usize = 512 * 1024;
pub const VDP1_FB_LEN: usize = 256 * 1024;
pub const VDP2_VRAM_LEN: usize = 512 * 1024;
pub const VDP2_CRAM_LEN: usize = 4 * 1024;

/// Default VDP1 command timing penalty per external VRAM write while drawing, in cycles.
///
/// The exact per-command cost of VDP1 is partially empirical; this constant is a tunable.
pub const VDP1_VRAM_WRITE_PENALTY: u64 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct VdpConfig {
    pub timing_mode: TimingMode,
    pub threaded_rendering: bool,
    pub deinterlace: bool,
    pub transparent_meshes: bool,
    /// Cycles of VDP1 command processing granted per scheduler slice
    pub vdp1_cycles_per_slice: u64,
    pub vdp1_vram_write_penalty: u64,
}

impl Default for VdpConfig {
    fn default() -> Self {
        Self {
            timing_mode: TimingMode::Ntsc,
            threaded_rendering: false,
            deinterlace: false,
            transparent_meshes: false,
            vdp1_cycles_per_slice: 2000,
            vdp1_vram_write_penalty: VDP1_VRAM_PENALTY_DEFAULT,
        }
    }
}

const VDP1_VRAM_PENALTY_DEFAULT: u64 = VDP1_VRAM_WRITE_PENALTY;

/// Edge notifications the emulator routes to the SCU and SMPC after a phase event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VdpTickEffects {
    pub hblank: Option<bool>,
    pub vblank: Option<bool>,
    pub smpc_vblank_in: bool,
    pub vdp1_draw_end: bool,
}

pub struct Vdp {
    vram1: BoxedByteArray<VDP1_VRAM_LEN>,
    sprite_fb: [BoxedByteArray<VDP1_FB_LEN>; 2],
    mesh_fb: [BoxedByteArray<VDP1_FB_LEN>; 2],
    /// Index of the framebuffer currently being displayed; VDP1 draws into the other one
    display_fb: u8,
    vram2: BoxedByteArray<VDP2_VRAM_LEN>,
    cram: BoxedByteArray<VDP2_CRAM_LEN>,
    regs1: Vdp1Registers,
    regs2: Vdp2Registers,
    pub timing: TimingState,
    vdp1: Vdp1RenderState,
    vdp1_timing_penalty: u64,
    renderer: RenderBackend,
    config: VdpConfig,
}

impl Vdp {
    pub fn new(config: VdpConfig) -> Self {
        Self {
            vram1: BoxedByteArray::new(),
            sprite_fb: [BoxedByteArray::new(), BoxedByteArray::new()],
            mesh_fb: [BoxedByteArray::new(), BoxedByteArray::new()],
            display_fb: 0,
            vram2: BoxedByteArray::new(),
            cram: BoxedByteArray::new(),
            regs1: Vdp1Registers::new(),
            regs2: Vdp2Registers::new(),
            timing: TimingState::new(config.timing_mode),
            vdp1: Vdp1RenderState::new(),
            vdp1_timing_penalty: 0,
            renderer: RenderBackend::new(&config),
            config,
        }
    }

    /// Arm the phase event; called once after construction and after a load state
    pub fn init(&mut self, scheduler: &mut Scheduler) {
        scheduler.schedule_from_now(SchedulerEvent::VdpPhase, self.timing.current_phase_cycles());
    }

    pub fn config(&self) -> &VdpConfig {
        &self.config
    }

    pub fn reload_config(&mut self, config: VdpConfig) {
        self.renderer.send(RenderEvent::UpdateEffectiveRenderingFlags {
            deinterlace: config.deinterlace,
            transparent_meshes: config.transparent_meshes,
        });
        self.config = config;
    }

    fn draw_fb(&self) -> usize {
        usize::from(self.display_fb ^ 1)
    }

    // -------------------------------------------------------------------------------------------
    // Phase machine glue

    /// Handle a `VdpPhase` scheduler event: advance the phase machine, re-arm, and surface
    /// blanking edges and frame bookkeeping to the caller.
    pub fn on_phase_event(&mut self, scheduler: &mut Scheduler) -> VdpTickEffects {
        let update = self.timing.step_phase();
        scheduler.schedule_from_now(SchedulerEvent::VdpPhase, self.timing.current_phase_cycles());

        let mut effects = VdpTickEffects {
            hblank: update.hblank,
            vblank: update.vblank,
            smpc_vblank_in: update.smpc_vblank_in,
            vdp1_draw_end: false,
        };

        if let Some(y) = update.draw_line {
            // Erase-during-display runs a line at a time over the display buffer
            if self.vdp1.display_erase_active {
                self.erase_framebuffer_line(usize::from(self.display_fb), y);
            }
            self.renderer.send(RenderEvent::Vdp2DrawLine(y));
        }

        if update.vblank == Some(true) {
            // End of active display: VDP1 considers the frame complete for swap purposes
            self.vdp1.frame_ended = true;
            self.renderer.send(RenderEvent::Vdp2EndFrame);
        }

        if update.frame_start {
            effects.vdp1_draw_end |= self.handle_frame_start(scheduler);
        }

        effects
    }

    /// VBlank-OUT: apply erase rules, swap framebuffers if requested, and kick off rendering
    /// for the new frame.
    fn handle_frame_start(&mut self, scheduler: &mut Scheduler) -> bool {
        let mut draw_end = false;

        let manual = self.regs1.manual_mode();
        let swap_requested = if manual { self.regs1.manual_swap() && self.regs1.fbcr_written } else { true };

        // Latch erase parameters at the swap decision point
        let (x1, y1, x3, y3) = self.regs1.erase_rect();
        self.vdp1.erase_value = self.regs1.ewdr;
        self.vdp1.erase_rect = (x1, y1, x3, y3);

        if swap_requested {
            // Erase the buffer about to become the display buffer, in one go during VBlank
            if !manual || self.regs1.vblank_erase() {
                let target = self.draw_fb();
                self.erase_framebuffer(target);
            }

            self.display_fb ^= 1;
            self.regs1.fbcr_written = false;
            self.vdp1.display_erase_active = false;
            log::trace!("VDP1 framebuffer swap; display buffer is now {}", self.display_fb);

            // Manual erase applies to the new display buffer across the coming field
            if manual && self.regs1.manual_erase() {
                self.vdp1.display_erase_active = true;
            }

            // Clear the mesh overlay for the new draw frame
            if self.config.transparent_meshes {
                self.mesh_fb[self.draw_fb()].fill(0);
            }

            self.renderer.send(RenderEvent::Vdp1SwapFramebuffer {
                display_fb: clone_framebuffer(&self.sprite_fb[usize::from(self.display_fb)]),
                mesh_fb: self
                    .config
                    .transparent_meshes
                    .then(|| clone_framebuffer(&self.mesh_fb[usize::from(self.display_fb)])),
            });

            // Plot mode 2 starts command processing at every swap
            if self.regs1.plot_mode() == 2 {
                draw_end = self.start_vdp1_drawing(scheduler);
            }
        }

        self.renderer.send(RenderEvent::OddField(self.timing.odd_field));
        self.renderer.send(RenderEvent::Vdp1BeginFrame);
        self.renderer.send(RenderEvent::Vdp2BeginFrame(self.frame_params()));
        self.renderer.send(RenderEvent::Vdp2UpdateEnabledBGs);

        draw_end
    }

    fn frame_params(&self) -> FrameParams {
        FrameParams {
            width: self.timing.hres.width(),
            height: self.timing.vres.height(),
            interlace: match self.timing.interlace {
                timing::InterlaceMode::None => InterlaceMode::Progressive,
                timing::InterlaceMode::Single => InterlaceMode::SingleDensity,
                timing::InterlaceMode::Double => InterlaceMode::DoubleDensity,
            },
            odd_field: self.timing.odd_field,
            fb_8bpp: self.regs1.fb_8bpp(),
        }
    }

    /// Handle a `Vdp1Commands` scheduler event: process one budget slice of the command table.
    /// Returns true when the command table finished and SpriteDrawEnd should be raised.
    pub fn on_vdp1_commands_event(&mut self, scheduler: &mut Scheduler) -> bool {
        if !self.vdp1.rendering {
            return false;
        }

        let budget = self.config.vdp1_cycles_per_slice + std::mem::take(&mut self.vdp1_timing_penalty);
        let finished = self.process_vdp1_commands(budget);

        if finished {
            self.vdp1.rendering = false;
            self.regs1.edsr |= 0x2;
            true
        } else {
            scheduler.schedule_from_now(SchedulerEvent::Vdp1Commands, self.config.vdp1_cycles_per_slice);
            false
        }
    }

    fn start_vdp1_drawing(&mut self, scheduler: &mut Scheduler) -> bool {
        self.vdp1.rendering = true;
        self.vdp1.command_address = 0;
        self.vdp1.return_address = u32::MAX;
        self.vdp1.cycles_spent = 0;
        // BEF <- CEF, CEF cleared at draw start
        self.regs1.edsr = (self.regs1.edsr & 0x2) >> 1;

        // Process the first slice immediately; games poll EDSR right after the trigger
        let finished = self.on_vdp1_commands_event_inline();
        if !finished {
            scheduler.schedule_from_now(SchedulerEvent::Vdp1Commands, self.config.vdp1_cycles_per_slice);
        }
        finished
    }

    fn on_vdp1_commands_event_inline(&mut self) -> bool {
        let budget = self.config.vdp1_cycles_per_slice + std::mem::take(&mut self.vdp1_timing_penalty);
        let finished = self.process_vdp1_commands(budget);
        if finished {
            self.vdp1.rendering = false;
            self.regs1.edsr |= 0x2;
        }
        finished
    }

    // -------------------------------------------------------------------------------------------
    // Erase

    fn erase_framebuffer(&mut self, fb: usize) {
        let (x1, y1, x3, y3) = self.vdp1.erase_rect;
        for y in y1..=y3 {
            self.erase_rows(fb, y, x1, x3);
        }
        log::trace!("VDP1 erased buffer {fb} to {:04X}", self.vdp1.erase_value);
    }

    fn erase_framebuffer_line(&mut self, fb: usize, y: u16) {
        let (x1, y1, x3, y3) = self.vdp1.erase_rect;
        if (y1..=y3).contains(&y) {
            self.erase_rows(fb, y, x1, x3);
        }
    }

    fn erase_rows(&mut self, fb: usize, y: u16, x1: u16, x3: u16) {
        let value = self.vdp1.erase_value.to_be_bytes();
        let fb_data = &mut self.sprite_fb[fb];
        for x in x1..=x3 {
            let offset = ((usize::from(y) * 512 + usize::from(x)) * 2) & (VDP1_FB_LEN - 1);
            fb_data[offset] = value[0];
            fb_data[offset + 1] = value[1];
        }
    }

    // -------------------------------------------------------------------------------------------
    // VDP1 memory and register access

    pub fn vdp1_read_vram_byte(&self, address: u32) -> u8 {
        self.vram1[(address as usize) & (VDP1_VRAM_LEN - 1)]
    }

    pub fn vdp1_read_vram_word(&self, address: u32) -> u16 {
        let address = (address as usize) & (VDP1_VRAM_LEN - 1) & !1;
        u16::from_be_bytes([self.vram1[address], self.vram1[address + 1]])
    }

    pub fn vdp1_write_vram_byte(&mut self, address: u32, value: u8) {
        self.vram1[(address as usize) & (VDP1_VRAM_LEN - 1)] = value;
        self.note_vdp1_vram_write();
    }

    pub fn vdp1_write_vram_word(&mut self, address: u32, value: u16) {
        let address = (address as usize) & (VDP1_VRAM_LEN - 1) & !1;
        self.vram1[address..address + 2].copy_from_slice(&value.to_be_bytes());
        self.note_vdp1_vram_write();
    }

    // External VRAM writes slow the command processor down while it is drawing
    fn note_vdp1_vram_write(&mut self) {
        if self.vdp1.rendering {
            self.vdp1_timing_penalty += self.config.vdp1_vram_write_penalty;
        }
    }

    pub fn vdp1_read_fb_byte(&self, address: u32) -> u8 {
        self.sprite_fb[self.draw_fb()][(address as usize) & (VDP1_FB_LEN - 1)]
    }

    pub fn vdp1_read_fb_word(&self, address: u32) -> u16 {
        let fb = &self.sprite_fb[self.draw_fb()];
        let address = (address as usize) & (VDP1_FB_LEN - 1) & !1;
        u16::from_be_bytes([fb[address], fb[address + 1]])
    }

    pub fn vdp1_write_fb_byte(&mut self, address: u32, value: u8) {
        let fb = self.draw_fb();
        self.sprite_fb[fb][(address as usize) & (VDP1_FB_LEN - 1)] = value;
    }

    pub fn vdp1_write_fb_word(&mut self, address: u32, value: u16) {
        let fb = self.draw_fb();
        let address = (address as usize) & (VDP1_FB_LEN - 1) & !1;
        self.sprite_fb[fb][address..address + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn vdp1_read_reg(&self, address: u32) -> u16 {
        self.regs1.read(address)
    }

    pub fn vdp1_peek_reg(&self, address: u32) -> u16 {
        match address & 0x1F {
            0x00 => self.regs1.tvmr,
            0x02 => self.regs1.fbcr,
            0x04 => self.regs1.ptmr,
            0x06 => self.regs1.ewdr,
            0x08 => self.regs1.ewlr,
            0x0A => self.regs1.ewrr,
            _ => self.regs1.read(address),
        }
    }

    pub fn vdp1_write_reg(&mut self, address: u32, value: u16) {
        self.regs1.write(address, value);

        // Plot mode 1: drawing starts as soon as PTMR is written
        if address & 0x1F == 0x04 && value & 3 == 1 {
            self.vdp1.start_requested = true;
        }
    }

    /// Start VDP1 drawing if a PTMR write requested it; called from the emulator loop where the
    /// scheduler is available.
    pub fn take_vdp1_start_request(&mut self, scheduler: &mut Scheduler) -> bool {
        if !self.vdp1.start_requested {
            return false;
        }
        self.vdp1.start_requested = false;
        self.start_vdp1_drawing(scheduler)
    }

    // -------------------------------------------------------------------------------------------
    // VDP2 memory and register access

    pub fn vdp2_read_vram_byte(&self, address: u32) -> u8 {
        self.vram2[(address as usize) & (VDP2_VRAM_LEN - 1)]
    }

    pub fn vdp2_read_vram_word(&self, address: u32) -> u16 {
        let address = (address as usize) & (VDP2_VRAM_LEN - 1) & !1;
        u16::from_be_bytes([self.vram2[address], self.vram2[address + 1]])
    }

    pub fn vdp2_write_vram_byte(&mut self, address: u32, value: u8) {
        self.vram2[(address as usize) & (VDP2_VRAM_LEN - 1)] = value;
        self.renderer.send_write(RenderEvent::Vdp2VramWriteByte { address, value });
    }

    pub fn vdp2_write_vram_word(&mut self, address: u32, value: u16) {
        let masked = (address as usize) & (VDP2_VRAM_LEN - 1) & !1;
        self.vram2[masked..masked + 2].copy_from_slice(&value.to_be_bytes());
        self.renderer.send_write(RenderEvent::Vdp2VramWriteWord { address, value });
    }

    pub fn vdp2_read_cram_byte(&self, address: u32) -> u8 {
        self.cram[(address as usize) & (VDP2_CRAM_LEN - 1)]
    }

    pub fn vdp2_read_cram_word(&self, address: u32) -> u16 {
        let address = (address as usize) & (VDP2_CRAM_LEN - 1) & !1;
        u16::from_be_bytes([self.cram[address], self.cram[address + 1]])
    }

    pub fn vdp2_write_cram_byte(&mut self, address: u32, value: u8) {
        self.cram[(address as usize) & (VDP2_CRAM_LEN - 1)] = value;
        self.renderer.send_write(RenderEvent::Vdp2CramWriteByte { address, value });
    }

    pub fn vdp2_write_cram_word(&mut self, address: u32, value: u16) {
        let masked = (address as usize) & (VDP2_CRAM_LEN - 1) & !1;
        self.cram[masked..masked + 2].copy_from_slice(&value.to_be_bytes());
        self.renderer.send_write(RenderEvent::Vdp2CramWriteWord { address, value });
    }

    pub fn vdp2_read_reg(&self, address: u32) -> u16 {
        match address & 0x1FF {
            // (TVSTAT) screen status: PAL flag, field parity, blanking flags
            0x04 => {
                u16::from(self.timing.timing_mode == TimingMode::Pal)
                    | (u16::from(!self.timing.odd_field) << 1)
                    | (u16::from(self.timing.in_hblank()) << 2)
                    | (u16::from(self.timing.in_vblank()) << 3)
            }
            // (HCNT) horizontal counter, coarse: cycles into the current line are not tracked
            // below phase granularity
            0x08 => match self.timing.h_phase {
                HorizontalPhase::Active => 0,
                _ => self.timing.hres.width() as u16,
            },
            // (VCNT) vertical counter
            0x0A => self.timing.vcnt,
            _ => self.regs2.read(address),
        }
    }

    pub fn vdp2_peek_reg(&self, address: u32) -> u16 {
        self.vdp2_read_reg(address)
    }

    pub fn vdp2_write_reg(&mut self, address: u32, value: u16) {
        let tvmd_written = self.regs2.write(address, value);
        if tvmd_written {
            self.update_resolution();
        }
        self.renderer.send_write(RenderEvent::Vdp2RegWrite { address, value });
    }

    /// Recompute resolution-derived timing state from TVMD
    pub fn update_resolution(&mut self) {
        self.timing.update_resolution(self.regs2.tvmd());
    }

    /// Clock speed divider exposed to the rest of the system: hi-res dot clocks run the system
    /// at the faster master clock
    pub fn clock_divider(&self) -> u32 {
        if self.timing.hres.is_hires() { 2 } else { 4 }
    }

    // -------------------------------------------------------------------------------------------
    // Frontend surface

    /// Take the most recently completed frame, if one finished since the last call
    pub fn take_completed_frame(&mut self) -> Option<render::CompletedFrame> {
        self.renderer.take_completed_frame()
    }

    pub fn display_fb_index(&self) -> u8 {
        self.display_fb
    }

    pub fn vdp1_drawing(&self) -> bool {
        self.vdp1.rendering
    }

    // -------------------------------------------------------------------------------------------
    // Save states

    pub fn save_state(&mut self) -> VdpState {
        let renderer_sync = self.renderer.pre_save_sync();

        VdpState {
            vram1: self.vram1.clone(),
            vram2: self.vram2.clone(),
            cram: self.cram.clone(),
            sprite_fb: self.sprite_fb.clone(),
            display_fb: self.display_fb,
            vdp1_timing_penalty: self.vdp1_timing_penalty,
            regs1: self.regs1.clone(),
            regs2: self.regs2.clone(),
            timing: self.timing.clone(),
            vdp1: self.vdp1.clone(),
            mesh_fb: self.mesh_fb.clone(),
            renderer: renderer_sync,
        }
    }

    pub fn load_state(&mut self, state: VdpState, scheduler: &mut Scheduler) {
        self.vram1 = state.vram1;
        self.vram2 = state.vram2;
        self.cram = state.cram;
        self.sprite_fb = state.sprite_fb;
        self.display_fb = state.display_fb;
        self.vdp1_timing_penalty = state.vdp1_timing_penalty;
        self.regs1 = state.regs1;
        self.regs2 = state.regs2;
        self.timing = state.timing;
        self.vdp1 = state.vdp1;
        self.mesh_fb = state.mesh_fb;

        let mut sync = state.renderer;
        // The renderer mirrors follow the live copies on load
        sync.vram.copy_from_slice(&self.vram2[..]);
        sync.cram.copy_from_slice(&self.cram[..]);
        sync.regs = self.regs2.clone();
        sync.display_fb.copy_from_slice(&self.sprite_fb[usize::from(self.display_fb)][..]);
        self.renderer.post_load_sync(sync);

        // A restored scheduler still carries the phase events; only arm what is missing
        if self.vdp1.rendering && !scheduler.is_scheduled(SchedulerEvent::Vdp1Commands) {
            scheduler.schedule_from_now(SchedulerEvent::Vdp1Commands, self.config.vdp1_cycles_per_slice);
        }
        if !scheduler.is_scheduled(SchedulerEvent::VdpPhase) {
            self.init(scheduler);
        }
    }
}

// Heap-to-heap copy; these buffers are far too large for the stack
fn clone_framebuffer(fb: &BoxedByteArray<VDP1_FB_LEN>) -> Box<[u8; VDP1_FB_LEN]> {
    let mut copy: Box<[u8; VDP1_FB_LEN]> =
        vec![0; VDP1_FB_LEN].into_boxed_slice().try_into().unwrap();
    copy.copy_from_slice(&fb[..]);
    copy
}

/// Structured VDP save-state record
#[derive(Debug, Clone, Encode, Decode)]
pub struct VdpState {
    pub vram1: BoxedByteArray<VDP1_VRAM_LEN>,
    pub vram2: BoxedByteArray<VDP2_VRAM_LEN>,
    pub cram: BoxedByteArray<VDP2_CRAM_LEN>,
    pub sprite_fb: [BoxedByteArray<VDP1_FB_LEN>; 2],
    pub display_fb: u8,
    pub vdp1_timing_penalty: u64,
    pub regs1: Vdp1Registers,
    pub regs2: Vdp2Registers,
    pub timing: TimingState,
    pub vdp1: Vdp1RenderState,
    pub mesh_fb: [BoxedByteArray<VDP1_FB_LEN>; 2],
    pub renderer: Box<RendererSync>,
}
