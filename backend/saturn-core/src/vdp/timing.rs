//! Display timing: resolution decode, phase tables, and the phase state machine
//!
//! A scanline is divided into four horizontal phases and a frame into up to six vertical phases.
//! A single self-re-arming scheduler event walks the horizontal phases; the vertical phase
//! advances whenever the horizontal machine wraps back to active display. All blanking edges,
//! per-line rendering, and frame bookkeeping hang off these transitions.

use bincode::{Decode, Encode};
use jsaturn_common::frontend::TimingMode;
use jsaturn_proc_macros::EnumAll;

/// Master clocks per scanline in normal-resolution modes
pub const LINE_CYCLES_NORMAL: u32 = 1820;
/// Master clocks per scanline in hi-res modes
pub const LINE_CYCLES_HIRES: u32 = 3413;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumAll)]
pub enum HorizontalPhase {
    #[default]
    Active = 0,
    RightBorder = 1,
    Sync = 2,
    LeftBorder = 3,
}

impl HorizontalPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Active => Self::RightBorder,
            Self::RightBorder => Self::Sync,
            Self::Sync => Self::LeftBorder,
            Self::LeftBorder => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumAll)]
pub enum VerticalPhase {
    #[default]
    Active = 0,
    BottomBorder = 1,
    Blanking = 2,
    VCounterSkip = 3,
    TopBorder = 4,
    LastLine = 5,
}

impl VerticalPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Active => Self::BottomBorder,
            Self::BottomBorder => Self::Blanking,
            Self::Blanking => Self::VCounterSkip,
            Self::VCounterSkip => Self::TopBorder,
            Self::TopBorder => Self::LastLine,
            Self::LastLine => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum HorizontalRes {
    #[default]
    H320,
    H352,
    H640,
    H704,
}

impl HorizontalRes {
    pub fn from_tvmd(hreso: u16) -> Self {
        match hreso & 3 {
            0 => Self::H320,
            1 => Self::H352,
            2 => Self::H640,
            3 => Self::H704,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Self::H320 => 320,
            Self::H352 => 352,
            Self::H640 => 640,
            Self::H704 => 704,
        }
    }

    pub fn is_hires(self) -> bool {
        matches!(self, Self::H640 | Self::H704)
    }

    /// Cycles spent in each horizontal phase: active, right border, sync, left border.
    ///
    /// The splits are per-mode but every normal-res line sums to 1820 master clocks and every
    /// hi-res line to 3413.
    pub fn h_timings(self) -> [u32; 4] {
        match self {
            Self::H320 => [1280, 80, 280, 180],
            Self::H352 => [1408, 60, 240, 112],
            Self::H640 => [2560, 160, 413, 280],
            Self::H704 => [2816, 120, 357, 120],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum VerticalRes {
    #[default]
    V224,
    V240,
    V256,
}

impl VerticalRes {
    pub fn from_tvmd(vreso: u16, timing_mode: TimingMode) -> Self {
        match vreso & 3 {
            0 => Self::V224,
            1 => Self::V240,
            // 256-line output only exists on PAL units
            2 | 3 if timing_mode == TimingMode::Pal => Self::V256,
            _ => Self::V240,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            Self::V224 => 224,
            Self::V240 => 240,
            Self::V256 => 256,
        }
    }

    /// Lines spent in each vertical phase, indexed by [field odd][phase].
    ///
    /// NTSC fields are 263 lines with the VCounterSkip line dropped on the alternating field
    /// (262); PAL fields are 313/312.
    pub fn v_timings(self, timing_mode: TimingMode) -> [[u16; 6]; 2] {
        match (timing_mode, self) {
            (TimingMode::Ntsc, Self::V224) => [[224, 8, 3, 1, 26, 1], [224, 8, 3, 0, 26, 1]],
            (TimingMode::Ntsc, Self::V240 | Self::V256) => {
                [[240, 2, 3, 1, 16, 1], [240, 2, 3, 0, 16, 1]]
            }
            (TimingMode::Pal, Self::V224) => [[224, 24, 3, 1, 60, 1], [224, 24, 3, 0, 60, 1]],
            (TimingMode::Pal, Self::V240) => [[240, 16, 3, 1, 52, 1], [240, 16, 3, 0, 52, 1]],
            (TimingMode::Pal, Self::V256) => [[256, 8, 3, 1, 44, 1], [256, 8, 3, 0, 44, 1]],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum InterlaceMode {
    #[default]
    None,
    Single,
    Double,
}

impl InterlaceMode {
    pub fn from_tvmd(lsmd: u16) -> Self {
        match lsmd & 3 {
            2 => Self::Single,
            3 => Self::Double,
            _ => Self::None,
        }
    }
}

/// Everything derived from TVMD plus the live phase machine position
#[derive(Debug, Clone, Encode, Decode)]
pub struct TimingState {
    pub timing_mode: TimingMode,
    pub h_phase: HorizontalPhase,
    pub v_phase: VerticalPhase,
    pub vcnt: u16,
    pub odd_field: bool,
    pub hres: HorizontalRes,
    pub vres: VerticalRes,
    pub interlace: InterlaceMode,
    pub display_enabled: bool,
    pub border_color_mode: bool,
    pub h_timings: [u32; 4],
    pub v_timings: [[u16; 6]; 2],
}

/// Edge notifications produced by a single phase step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseUpdate {
    /// HBlank edge: Some(true) entering, Some(false) leaving
    pub hblank: Option<bool>,
    /// VBlank edge: Some(true) entering, Some(false) leaving
    pub vblank: Option<bool>,
    /// VBlank-IN moment for the SMPC and the VDP1 frame-complete flag
    pub smpc_vblank_in: bool,
    /// Entering the first line of a new frame: swap/erase and begin rendering
    pub frame_start: bool,
    /// Render this scanline now; emitted at the end of each active line
    pub draw_line: Option<u16>,
}

impl TimingState {
    pub fn new(timing_mode: TimingMode) -> Self {
        let hres = HorizontalRes::default();
        let vres = VerticalRes::default();
        Self {
            timing_mode,
            h_phase: HorizontalPhase::Active,
            v_phase: VerticalPhase::Active,
            vcnt: 0,
            odd_field: false,
            hres,
            vres,
            interlace: InterlaceMode::None,
            display_enabled: false,
            border_color_mode: false,
            h_timings: hres.h_timings(),
            v_timings: vres.v_timings(timing_mode),
        }
    }

    /// Recompute resolution-derived state from a TVMD value
    pub fn update_resolution(&mut self, tvmd: u16) {
        use jsaturn_common::num::GetBit;

        self.hres = HorizontalRes::from_tvmd(tvmd);
        self.vres = VerticalRes::from_tvmd(tvmd >> 4, self.timing_mode);
        self.interlace = InterlaceMode::from_tvmd(tvmd >> 6);
        self.display_enabled = tvmd.bit(15);
        self.border_color_mode = tvmd.bit(8);
        self.h_timings = self.hres.h_timings();
        self.v_timings = self.vres.v_timings(self.timing_mode);

        log::debug!(
            "Resolution update: {}x{} interlace {:?} display {}",
            self.hres.width(),
            self.vres.height(),
            self.interlace,
            self.display_enabled
        );
    }

    /// Cycles until the next horizontal phase boundary from the start of the current one
    pub fn current_phase_cycles(&self) -> u64 {
        self.h_timings[self.h_phase as usize].into()
    }

    /// Total lines in the current field
    pub fn lines_in_field(&self) -> u16 {
        self.v_timings[usize::from(self.odd_field)].iter().sum()
    }

    pub fn in_vblank(&self) -> bool {
        self.v_phase != VerticalPhase::Active
    }

    pub fn in_hblank(&self) -> bool {
        self.h_phase != HorizontalPhase::Active
    }

    /// Line at which the given vertical phase ends (exclusive)
    fn v_phase_end_line(&self, phase: VerticalPhase) -> u16 {
        let timings = &self.v_timings[usize::from(self.odd_field)];
        timings[..=phase as usize].iter().sum()
    }

    /// Advance to the next horizontal phase, stepping the vertical phase machine when the line
    /// wraps. Returns the edge notifications for this transition.
    pub fn step_phase(&mut self) -> PhaseUpdate {
        let mut update = PhaseUpdate::default();

        self.h_phase = self.h_phase.next();
        match self.h_phase {
            HorizontalPhase::Active => {
                self.increment_vcounter(&mut update);
                if !self.in_vblank() {
                    update.hblank = Some(false);
                }
            }
            HorizontalPhase::RightBorder => {
                if self.v_phase == VerticalPhase::Active {
                    update.draw_line = Some(self.vcnt);
                }
                update.hblank = Some(true);
            }
            HorizontalPhase::Sync | HorizontalPhase::LeftBorder => {}
        }

        update
    }

    fn increment_vcounter(&mut self, update: &mut PhaseUpdate) {
        self.vcnt += 1;

        while self.vcnt >= self.v_phase_end_line(self.v_phase) {
            // Zero-length phases (VCounterSkip on the short field, the bottom border in some
            // modes) pass through within the same line
            let prev = self.v_phase;
            self.v_phase = self.v_phase.next();

            match self.v_phase {
                VerticalPhase::BottomBorder => {
                    update.vblank = Some(true);
                    update.smpc_vblank_in = true;
                    log::trace!("VBlank-IN at line {}", self.vcnt);
                }
                VerticalPhase::Active => {
                    debug_assert_eq!(prev, VerticalPhase::LastLine);
                    self.vcnt = 0;
                    self.odd_field = !self.odd_field;
                    update.vblank = Some(false);
                    update.frame_start = true;
                    log::trace!("VBlank-OUT; starting {} field", if self.odd_field { "odd" } else { "even" });
                    break;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_cycle_sums_match_the_canonical_clock_counts() {
        for hres in [HorizontalRes::H320, HorizontalRes::H352] {
            assert_eq!(hres.h_timings().iter().sum::<u32>(), LINE_CYCLES_NORMAL, "{hres:?}");
        }
        for hres in [HorizontalRes::H640, HorizontalRes::H704] {
            assert_eq!(hres.h_timings().iter().sum::<u32>(), LINE_CYCLES_HIRES, "{hres:?}");
        }
    }

    #[test]
    fn ntsc_fields_are_263_and_262_lines() {
        let timings = VerticalRes::V224.v_timings(TimingMode::Ntsc);
        assert_eq!(timings[0].iter().sum::<u16>(), 263);
        assert_eq!(timings[1].iter().sum::<u16>(), 262);
    }

    #[test]
    fn pal_fields_are_313_and_312_lines() {
        for vres in [VerticalRes::V224, VerticalRes::V240, VerticalRes::V256] {
            let timings = vres.v_timings(TimingMode::Pal);
            assert_eq!(timings[0].iter().sum::<u16>(), 313, "{vres:?}");
            assert_eq!(timings[1].iter().sum::<u16>(), 312, "{vres:?}");
        }
    }

    #[test]
    fn phase_machine_walks_a_full_ntsc_field() {
        let mut timing = TimingState::new(TimingMode::Ntsc);

        let mut vblank_in_edges = 0;
        let mut vblank_out_edges = 0;
        let mut lines_drawn = 0;
        let mut cycles: u64 = 0;

        // Two full fields: 263 + 262 lines, 4 phases each
        for _ in 0..4 * (263 + 262) {
            cycles += timing.current_phase_cycles();
            let update = timing.step_phase();
            if update.vblank == Some(true) {
                vblank_in_edges += 1;
            }
            if update.vblank == Some(false) {
                vblank_out_edges += 1;
            }
            if update.draw_line.is_some() {
                lines_drawn += 1;
            }
        }

        assert_eq!(vblank_in_edges, 2);
        assert_eq!(vblank_out_edges, 2);
        assert_eq!(lines_drawn, 2 * 224);
        assert_eq!(cycles, u64::from(LINE_CYCLES_NORMAL) * (263 + 262));
        assert_eq!(timing.vcnt, 0);
        assert_eq!(timing.v_phase, VerticalPhase::Active);
    }

    #[test]
    fn vblank_in_fires_at_the_end_of_active_display() {
        let mut timing = TimingState::new(TimingMode::Ntsc);

        let mut steps_to_vblank_in = 0;
        loop {
            let update = timing.step_phase();
            steps_to_vblank_in += 1;
            if update.vblank == Some(true) {
                break;
            }
        }

        // 224 lines of 4 phases each, then the wrap into line 224 triggers VBlank-IN
        assert_eq!(steps_to_vblank_in, 4 * 224);
        assert_eq!(timing.vcnt, 224);
    }
}
