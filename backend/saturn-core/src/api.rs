//! Saturn core public interface and main loop
//!
//! [`SaturnCore`] owns the scheduler, the SCU, the VDPs, work RAM, sound RAM, the cartridge
//! slot, and the CD block stub, and drives them in lockstep. The CPU interpreters are external
//! collaborators: they access memory through [`MainBus`] and observe the SCU's interrupt pins
//! between advances.

use crate::bus::{MainBus, MemoryBus, SoundRam, WramHigh, WramLow};
use crate::cartridge::{Cartridge, CartridgeStateError, CartridgeType};
use crate::cdblock::CdBlock;
use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::scu::Scu;
use crate::vdp::render::CompletedFrame;
use crate::vdp::{Vdp, VdpConfig, VdpState};
use bincode::{Decode, Encode};
use jsaturn_common::frontend::{FrameSize, Renderer, TickEffect, TimingMode};
use thiserror::Error;

const SAVE_STATE_VERSION: &str = "0.1.0-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SaturnConfig {
    pub timing_mode: TimingMode,
    pub threaded_rendering: bool,
    pub deinterlace: bool,
    pub transparent_meshes: bool,
    pub vdp1_vram_write_penalty: u64,
}

impl Default for SaturnConfig {
    fn default() -> Self {
        Self {
            timing_mode: TimingMode::Ntsc,
            threaded_rendering: false,
            deinterlace: false,
            transparent_meshes: false,
            vdp1_vram_write_penalty: crate::vdp::VDP1_VRAM_WRITE_PENALTY,
        }
    }
}

impl SaturnConfig {
    fn to_vdp_config(self) -> VdpConfig {
        VdpConfig {
            timing_mode: self.timing_mode,
            threaded_rendering: self.threaded_rendering,
            deinterlace: self.deinterlace,
            transparent_meshes: self.transparent_meshes,
            vdp1_vram_write_penalty: self.vdp1_vram_write_penalty,
            ..VdpConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("save state version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: String, expected: &'static str },
    #[error("incompatible cartridge state: {0}")]
    Cartridge(#[from] CartridgeStateError),
    #[error("failed to decode save state: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("failed to encode save state: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("work RAM payload has the wrong size")]
    WramSizeMismatch,
}

/// Signals surfaced to the caller from one advance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceEffects {
    /// The SMPC should observe its VBlank-IN signal
    pub smpc_vblank_in: bool,
    /// A frame finished rendering and can be presented
    pub frame_rendered: bool,
    /// VDP1 finished its command table this advance
    pub vdp1_draw_finished: bool,
    /// The VDP1 framebuffers swapped this advance
    pub vdp1_framebuffer_swapped: bool,
}

macro_rules! memory_bus {
    ($self:expr) => {
        MemoryBus {
            wram_low: &mut $self.wram_low,
            wram_high: &mut $self.wram_high,
            sound_ram: &mut $self.sound_ram,
            vdp: &mut $self.vdp,
            cartridge: &mut $self.cartridge,
            cd: &mut $self.cd,
            bios: &$self.bios,
        }
    };
}

pub struct SaturnCore {
    scheduler: Scheduler,
    scu: Scu,
    vdp: Vdp,
    wram_low: WramLow,
    wram_high: WramHigh,
    sound_ram: SoundRam,
    cartridge: Cartridge,
    cd: CdBlock,
    bios: Box<[u8]>,
    config: SaturnConfig,
    last_frame: Option<CompletedFrame>,
    last_display_fb: u8,
}

impl SaturnCore {
    pub fn new(config: SaturnConfig, cartridge: Cartridge, bios: Box<[u8]>) -> Self {
        let mut scheduler = Scheduler::new();
        let mut vdp = Vdp::new(config.to_vdp_config());
        vdp.update_resolution();
        vdp.init(&mut scheduler);

        Self {
            scheduler,
            scu: Scu::new(),
            vdp,
            wram_low: WramLow::new(),
            wram_high: WramHigh::new(),
            sound_ram: SoundRam::new(),
            cartridge,
            cd: CdBlock::new(),
            bios,
            config,
            last_frame: None,
            last_display_fb: 0,
        }
    }

    /// The CPU-facing bus, for the external CPU interpreters and the debugger
    pub fn main_bus(&mut self) -> MainBus<'_> {
        MainBus {
            scu: &mut self.scu,
            mem: MemoryBus {
                wram_low: &mut self.wram_low,
                wram_high: &mut self.wram_high,
                sound_ram: &mut self.sound_ram,
                vdp: &mut self.vdp,
                cartridge: &mut self.cartridge,
                cd: &mut self.cd,
                bios: &self.bios,
            },
        }
    }

    pub fn scu(&self) -> &Scu {
        &self.scu
    }

    pub fn scu_mut(&mut self) -> &mut Scu {
        &mut self.scu
    }

    pub fn vdp(&self) -> &Vdp {
        &self.vdp
    }

    pub fn config(&self) -> &SaturnConfig {
        &self.config
    }

    pub fn current_cycles(&self) -> u64 {
        self.scheduler.current()
    }

    /// Master CPU interrupt pin: `(level, vector)`, level 0 when clear.
    ///
    /// The external CPU must call [`Self::acknowledge_master_interrupt`] when it vectors; the
    /// pin is then re-raised with the next pending interrupt or cleared to `(0, 0)`.
    pub fn master_interrupt_pin(&self) -> (u8, u8) {
        self.scu.master_interrupt_pin()
    }

    pub fn slave_interrupt_pin(&self) -> (u8, u8) {
        self.scu.slave_interrupt_pin()
    }

    pub fn acknowledge_master_interrupt(&mut self) {
        self.scu.acknowledge_master_interrupt();
    }

    /// Advance all hardware units by `cycles` master clocks, dispatching every scheduler event
    /// that falls due.
    pub fn advance(&mut self, cycles: u64) -> AdvanceEffects {
        let mut effects = AdvanceEffects::default();
        let target = self.scheduler.current() + cycles;

        loop {
            let (event, elapsed) = self.scheduler.advance_to(target);

            if elapsed > 0 {
                let mut mem = memory_bus!(self);
                self.scu.advance(elapsed, &mut mem);
            }

            let Some(event) = event else { break };

            match event {
                SchedulerEvent::VdpPhase => {
                    let phase = self.vdp.on_phase_event(&mut self.scheduler);
                    let in_vblank = self.vdp.timing.in_vblank();

                    if let Some(vblank) = phase.vblank {
                        let mut mem = memory_bus!(self);
                        self.scu.update_vblank(vblank, &mut mem);
                    }
                    if let Some(hblank) = phase.hblank {
                        let mut mem = memory_bus!(self);
                        self.scu.update_hblank(hblank, in_vblank, &mut self.scheduler, &mut mem);
                    }
                    if phase.smpc_vblank_in {
                        effects.smpc_vblank_in = true;
                    }
                    if phase.vdp1_draw_end {
                        let mut mem = memory_bus!(self);
                        self.scu.trigger_sprite_draw_end(&mut mem);
                    }
                }
                SchedulerEvent::Vdp1Commands => {
                    if self.vdp.on_vdp1_commands_event(&mut self.scheduler) {
                        effects.vdp1_draw_finished = true;
                        let mut mem = memory_bus!(self);
                        self.scu.trigger_sprite_draw_end(&mut mem);
                    }
                }
                SchedulerEvent::ScuTimer1 => {
                    let mut mem = memory_bus!(self);
                    self.scu.tick_timer1(&mut mem);
                }
                SchedulerEvent::Dummy => {}
            }

            // CPU writes to PTMR request a draw start; service it with the scheduler in hand
            if self.vdp.take_vdp1_start_request(&mut self.scheduler) {
                effects.vdp1_draw_finished = true;
                let mut mem = memory_bus!(self);
                self.scu.trigger_sprite_draw_end(&mut mem);
            }
        }

        if let Some(frame) = self.vdp.take_completed_frame() {
            self.last_frame = Some(frame);
            effects.frame_rendered = true;
        }

        let display_fb = self.vdp.display_fb_index();
        if display_fb != self.last_display_fb {
            self.last_display_fb = display_fb;
            effects.vdp1_framebuffer_swapped = true;
        }

        effects
    }

    /// Present the most recently completed frame
    pub fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<TickEffect, R::Err> {
        let Some(frame) = &self.last_frame else {
            return Ok(TickEffect::None);
        };

        renderer.render_frame(
            &frame.pixels,
            FrameSize { width: frame.width, height: frame.height },
            frame.interlace,
        )?;
        Ok(TickEffect::FrameRendered)
    }

    pub fn reload_config(&mut self, config: SaturnConfig) {
        self.vdp.reload_config(config.to_vdp_config());
        self.config = config;
    }

    // -------------------------------------------------------------------------------------------
    // Save states

    pub fn save_state(&mut self) -> Result<Vec<u8>, SaveStateError> {
        let state = SaturnState {
            version: SAVE_STATE_VERSION.into(),
            scheduler: self.scheduler.clone(),
            vdp: self.vdp.save_state(),
            scu: self.scu.clone(),
            wram_low: self.wram_low.clone(),
            wram_high: self.wram_high.clone(),
            sound_ram: self.sound_ram.clone(),
            cartridge_type: self.cartridge.cartridge_type(),
            cartridge_ram: self.cartridge.ram_contents().to_vec(),
            cd: self.cd.clone(),
        };

        Ok(bincode::encode_to_vec(state, bincode::config::standard())?)
    }

    /// Restore a previously saved state. Validation happens against the decoded record before
    /// any live state is overwritten; on error the core is untouched.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let (state, _): (SaturnState, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())?;

        if state.version != SAVE_STATE_VERSION {
            return Err(SaveStateError::VersionMismatch {
                found: state.version,
                expected: SAVE_STATE_VERSION,
            });
        }

        self.cartridge.check_state_compatible(state.cartridge_type, state.cartridge_ram.len())?;

        self.scheduler = state.scheduler;
        self.scu = state.scu;
        self.wram_low = state.wram_low;
        self.wram_high = state.wram_high;
        self.sound_ram = state.sound_ram;
        self.cartridge.load_ram(&state.cartridge_ram);
        self.cd = state.cd;
        self.vdp.load_state(state.vdp, &mut self.scheduler);
        self.last_frame = None;
        self.last_display_fb = self.vdp.display_fb_index();

        Ok(())
    }
}

#[derive(Encode, Decode)]
struct SaturnState {
    version: String,
    scheduler: Scheduler,
    vdp: VdpState,
    scu: Scu,
    wram_low: WramLow,
    wram_high: WramHigh,
    sound_ram: SoundRam,
    cartridge_type: CartridgeType,
    cartridge_ram: Vec<u8>,
    cd: CdBlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsaturn_common::frontend::{Color, InterlaceMode};
    use std::convert::Infallible;

    #[derive(Default)]
    struct TestRenderer {
        frames: Vec<(Vec<Color>, FrameSize)>,
    }

    impl Renderer for TestRenderer {
        type Err = Infallible;

        fn render_frame(
            &mut self,
            frame_buffer: &[Color],
            frame_size: FrameSize,
            _interlace_mode: InterlaceMode,
        ) -> Result<(), Infallible> {
            self.frames.push((frame_buffer.to_vec(), frame_size));
            Ok(())
        }
    }

    const NTSC_FIELD_CYCLES: u64 = 263 * 1820;

    fn new_core() -> SaturnCore {
        SaturnCore::new(SaturnConfig::default(), Cartridge::backup_ram(None), Box::default())
    }

    #[test]
    fn a_full_field_renders_one_frame() {
        let mut core = new_core();

        let effects = core.advance(NTSC_FIELD_CYCLES + 1820);
        assert!(effects.frame_rendered);
        assert!(effects.smpc_vblank_in);

        let mut renderer = TestRenderer::default();
        assert_eq!(core.render_frame(&mut renderer).unwrap(), TickEffect::FrameRendered);
        assert_eq!(renderer.frames[0].1, FrameSize { width: 320, height: 224 });
    }

    #[test]
    fn vblank_edges_reach_the_scu() {
        let mut core = new_core();

        // Unmask only VBlank-IN so the HBlank interrupts don't occupy the pin first
        core.main_bus().write_longword(0x5FE_00A0, 0xFFFE);
        core.advance(NTSC_FIELD_CYCLES);

        assert_eq!(core.master_interrupt_pin(), (0xF, 0x40));

        core.acknowledge_master_interrupt();
        assert_ne!(core.master_interrupt_pin().1, 0x40);
    }

    #[test]
    fn save_state_round_trip_preserves_memory() {
        let mut core = new_core();

        core.main_bus().write_longword(0x600_0000, 0x12345678);
        core.main_bus().write_word(0x5E0_0100, 0xABCD);
        core.advance(1000);

        let state = core.save_state().unwrap();

        core.main_bus().write_longword(0x600_0000, 0);
        core.main_bus().write_word(0x5E0_0100, 0);

        core.load_state(&state).unwrap();

        assert_eq!(core.main_bus().read_longword(0x600_0000), 0x12345678);
        assert_eq!(core.main_bus().read_word(0x5E0_0100), 0xABCD);
        assert_eq!(core.current_cycles(), 1000);
    }

    #[test]
    fn restored_state_renders_an_identical_frame() {
        let mut core = new_core();

        // Distinct back screen color so VRAM corruption is visible in the output
        core.main_bus().write_word(0x5E0_0000, 0x7C1F);

        core.advance(NTSC_FIELD_CYCLES + 1820);
        let mut renderer = TestRenderer::default();
        core.render_frame(&mut renderer).unwrap();
        let reference = renderer.frames.remove(0);

        let state = core.save_state().unwrap();

        // Corrupt live VRAM, restore, and render a fresh frame
        core.main_bus().write_word(0x5E0_0000, 0x0000);
        core.load_state(&state).unwrap();
        core.advance(2 * NTSC_FIELD_CYCLES);

        core.render_frame(&mut renderer).unwrap();
        let restored = renderer.frames.remove(0);

        assert_eq!(reference.1, restored.1);
        assert_eq!(reference.0, restored.0);
    }

    #[test]
    fn invalid_save_states_leave_live_state_untouched() {
        let mut core = new_core();

        core.main_bus().write_word(0x600_0000, 0xAAAA);

        assert!(core.load_state(&[0x01, 0x02, 0x03]).is_err());
        assert_eq!(core.main_bus().read_word(0x600_0000), 0xAAAA);
    }

    #[test]
    fn scheduler_monotonicity_across_advances() {
        let mut core = new_core();

        core.advance(100);
        assert_eq!(core.current_cycles(), 100);
        core.advance(1820 * 10);
        assert_eq!(core.current_cycles(), 100 + 1820 * 10);
    }
}
