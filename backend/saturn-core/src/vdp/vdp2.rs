//! VDP2 scanline renderer
//!
//! This module owns the renderer-side mirror state: copies of VDP2 VRAM, CRAM (plus a decoded
//! RGB888 cache), the register file, and the VDP1 display framebuffer, along with the per-layer
//! accumulator state that persists across lines. The hardware-simulation side feeds it through
//! the render event queue; all pixel work for a scanline runs against the consistent snapshot
//! taken when its `Vdp2DrawLine` event was enqueued.
//!
//! Per line the renderer runs: line/back screen fetch, sprite layer decode, rotation
//! backgrounds, normal backgrounds, window precomputation, and finally composition through the
//! top-two-priority color calculator.

use crate::vdp::registers2::{ColorFormat, NbgConfig, Vdp2Registers};
use crate::vdp::rotation::{
    self, Coefficient, RotationParamState, RotationParams, ScreenOverMode,
};
use crate::vdp::{VDP1_FB_LEN, VDP2_CRAM_LEN, VDP2_VRAM_LEN};
use bincode::{Decode, Encode};
use jsaturn_common::frontend::{Color, InterlaceMode};
use jsaturn_common::num::GetBit;

pub const MAX_RES_H: usize = 704;
pub const MAX_RES_V: usize = 512;

pub const FRAME_BUFFER_LEN: usize = MAX_RES_H * MAX_RES_V;

/// Composition layer indices: NBG0-3, RBG0, then the non-BG layers
const LAYER_NBG0: usize = 0;
const LAYER_RBG0: usize = 4;
const LAYER_BACK: usize = 5;
const LAYER_SPRITE: usize = 6;

/// Parameters latched at the start of each rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FrameParams {
    pub width: u32,
    pub height: u32,
    pub interlace: InterlaceMode,
    pub odd_field: bool,
    pub fb_8bpp: bool,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            width: 320,
            height: 224,
            interlace: InterlaceMode::Progressive,
            odd_field: false,
            fb_8bpp: false,
        }
    }
}

/// A decoded pattern name table entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct Character {
    pub char_num: u16,
    pub palette_num: u16,
    pub flip_h: bool,
    pub flip_v: bool,
    pub special_color_calc: bool,
    pub special_priority: bool,
}

/// One-entry pattern name cache per layer; most adjacent pixels hit the same character
#[derive(Debug, Clone, Encode, Decode)]
pub struct VramFetcher {
    pub curr_char: Character,
    pub last_entry_address: u32,
    pub last_vcell_offset: u32,
}

impl VramFetcher {
    fn invalidate(&mut self) {
        self.last_entry_address = u32::MAX;
    }
}

impl Default for VramFetcher {
    fn default() -> Self {
        Self { curr_char: Character::default(), last_entry_address: u32::MAX, last_vcell_offset: 0 }
    }
}

/// Per-layer accumulator state persisted across lines and into save states
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct NbgLayerState {
    pub frac_scroll_x: u32,
    pub frac_scroll_y: u32,
    pub scroll_inc_h: u32,
    pub line_scroll_table_address: u32,
    pub mosaic_counter_y: u16,
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct LineBackState {
    pub line_color: u32,
    pub back_color: u32,
}

/// Scanline output of one background layer
struct LayerLine {
    color: Box<[Color; MAX_RES_H]>,
    priority: Box<[u8; MAX_RES_H]>,
    transparent: Box<[bool; MAX_RES_H]>,
    /// Per-pixel color calculation enable (special color calculation)
    color_calc: Box<[bool; MAX_RES_H]>,
}

impl LayerLine {
    fn new() -> Self {
        Self {
            color: boxed_array(Color::BLACK),
            priority: boxed_array(0),
            transparent: boxed_array(true),
            color_calc: boxed_array(false),
        }
    }

    fn clear(&mut self) {
        self.transparent.fill(true);
    }
}

/// Scanline output of the sprite layer, with the extra attributes VDP1 pixels carry
struct SpriteLine {
    color: Box<[Color; MAX_RES_H]>,
    priority: Box<[u8; MAX_RES_H]>,
    transparent: Box<[bool; MAX_RES_H]>,
    cc_ratio: Box<[u8; MAX_RES_H]>,
    color_calc: Box<[bool; MAX_RES_H]>,
    shadow: Box<[bool; MAX_RES_H]>,
    normal_shadow: Box<[bool; MAX_RES_H]>,
    window: Box<[bool; MAX_RES_H]>,
}

impl SpriteLine {
    fn new() -> Self {
        Self {
            color: boxed_array(Color::BLACK),
            priority: boxed_array(0),
            transparent: boxed_array(true),
            cc_ratio: boxed_array(0),
            color_calc: boxed_array(false),
            shadow: boxed_array(false),
            normal_shadow: boxed_array(false),
            window: boxed_array(false),
        }
    }
}

fn boxed_array<T: Copy>(value: T) -> Box<[T; MAX_RES_H]> {
    vec![value; MAX_RES_H].into_boxed_slice().try_into().map_err(|_| ()).unwrap()
}

/// Sprite data field layout per SPCTL.TYPE
struct SpriteTypeInfo {
    prio_shift: u8,
    prio_mask: u16,
    cc_shift: u8,
    cc_mask: u16,
    /// Shadow/window flag in the MSB
    sd: bool,
    dc_mask: u16,
}

// Types 0-7 are word-sized, 8-15 byte-sized
static SPRITE_TYPES: [SpriteTypeInfo; 16] = [
    SpriteTypeInfo { prio_shift: 14, prio_mask: 3, cc_shift: 11, cc_mask: 7, sd: false, dc_mask: 0x7FF },
    SpriteTypeInfo { prio_shift: 13, prio_mask: 7, cc_shift: 11, cc_mask: 3, sd: false, dc_mask: 0x7FF },
    SpriteTypeInfo { prio_shift: 14, prio_mask: 1, cc_shift: 11, cc_mask: 7, sd: true, dc_mask: 0x7FF },
    SpriteTypeInfo { prio_shift: 13, prio_mask: 3, cc_shift: 11, cc_mask: 3, sd: true, dc_mask: 0x7FF },
    SpriteTypeInfo { prio_shift: 13, prio_mask: 3, cc_shift: 10, cc_mask: 7, sd: true, dc_mask: 0x3FF },
    SpriteTypeInfo { prio_shift: 12, prio_mask: 7, cc_shift: 11, cc_mask: 1, sd: true, dc_mask: 0x7FF },
    SpriteTypeInfo { prio_shift: 12, prio_mask: 7, cc_shift: 10, cc_mask: 3, sd: true, dc_mask: 0x3FF },
    SpriteTypeInfo { prio_shift: 12, prio_mask: 7, cc_shift: 9, cc_mask: 7, sd: true, dc_mask: 0x1FF },
    SpriteTypeInfo { prio_shift: 7, prio_mask: 1, cc_shift: 0, cc_mask: 0, sd: false, dc_mask: 0x7F },
    SpriteTypeInfo { prio_shift: 7, prio_mask: 1, cc_shift: 6, cc_mask: 1, sd: false, dc_mask: 0x3F },
    SpriteTypeInfo { prio_shift: 6, prio_mask: 3, cc_shift: 0, cc_mask: 0, sd: false, dc_mask: 0x3F },
    SpriteTypeInfo { prio_shift: 0, prio_mask: 0, cc_shift: 6, cc_mask: 3, sd: false, dc_mask: 0x3F },
    SpriteTypeInfo { prio_shift: 7, prio_mask: 1, cc_shift: 0, cc_mask: 0, sd: false, dc_mask: 0xFF },
    SpriteTypeInfo { prio_shift: 7, prio_mask: 1, cc_shift: 6, cc_mask: 1, sd: false, dc_mask: 0xFF },
    SpriteTypeInfo { prio_shift: 6, prio_mask: 3, cc_shift: 0, cc_mask: 0, sd: false, dc_mask: 0xFF },
    SpriteTypeInfo { prio_shift: 0, prio_mask: 0, cc_shift: 6, cc_mask: 3, sd: false, dc_mask: 0xFF },
];

/// Renderer-side mirror state and the pixel pipeline
pub struct RenderState {
    pub vram: Box<[u8; VDP2_VRAM_LEN]>,
    pub cram: Box<[u8; VDP2_CRAM_LEN]>,
    cram_cache: Box<[Color; VDP2_CRAM_LEN / 2]>,
    pub regs: Vdp2Registers,
    pub display_fb: Box<[u8; VDP1_FB_LEN]>,
    pub mesh_fb: Box<[u8; VDP1_FB_LEN]>,
    pub frame: FrameParams,
    pub framebuffer: Box<[Color]>,
    pub nbg_state: [NbgLayerState; 4],
    pub rot_state: [RotationParamState; 2],
    pub fetchers: [VramFetcher; 6],
    pub line_back: LineBackState,
    pub deinterlace: bool,
    pub transparent_meshes: bool,
    enabled_layers: [bool; 6],
    rbg1_active: bool,
    bg_lines: [LayerLine; 5],
    sprite_line: SpriteLine,
    windows: [Box<[bool; MAX_RES_H]>; 2],
}

impl RenderState {
    pub fn new() -> Self {
        Self {
            vram: vec![0; VDP2_VRAM_LEN].into_boxed_slice().try_into().unwrap(),
            cram: vec![0; VDP2_CRAM_LEN].into_boxed_slice().try_into().unwrap(),
            cram_cache: vec![Color::BLACK; VDP2_CRAM_LEN / 2]
                .into_boxed_slice()
                .try_into()
                .map_err(|_| ())
                .unwrap(),
            regs: Vdp2Registers::new(),
            display_fb: vec![0; VDP1_FB_LEN].into_boxed_slice().try_into().unwrap(),
            mesh_fb: vec![0; VDP1_FB_LEN].into_boxed_slice().try_into().unwrap(),
            frame: FrameParams::default(),
            framebuffer: vec![Color::BLACK; FRAME_BUFFER_LEN].into_boxed_slice(),
            nbg_state: Default::default(),
            rot_state: Default::default(),
            fetchers: Default::default(),
            line_back: LineBackState::default(),
            deinterlace: false,
            transparent_meshes: false,
            enabled_layers: [false; 6],
            rbg1_active: false,
            bg_lines: [
                LayerLine::new(),
                LayerLine::new(),
                LayerLine::new(),
                LayerLine::new(),
                LayerLine::new(),
            ],
            sprite_line: SpriteLine::new(),
            windows: [boxed_array(false), boxed_array(false)],
        }
    }

    pub fn reset(&mut self) {
        self.vram.fill(0);
        self.cram.fill(0);
        self.cram_cache.fill(Color::BLACK);
        self.regs = Vdp2Registers::new();
        self.display_fb.fill(0);
        self.mesh_fb.fill(0);
        self.framebuffer.fill(Color::BLACK);
        self.nbg_state = Default::default();
        self.rot_state = Default::default();
        self.fetchers = Default::default();
        self.enabled_layers = [false; 6];
    }

    // ---------------------------------------------------------------------------------------
    // Mirror updates

    pub fn write_vram_byte(&mut self, address: u32, value: u8) {
        self.vram[(address as usize) & (VDP2_VRAM_LEN - 1)] = value;
    }

    pub fn write_vram_word(&mut self, address: u32, value: u16) {
        let address = (address as usize) & (VDP2_VRAM_LEN - 1) & !1;
        self.vram[address..address + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn write_cram_byte(&mut self, address: u32, value: u8) {
        self.cram[(address as usize) & (VDP2_CRAM_LEN - 1)] = value;
        self.update_cram_cache_word(address & !1);
    }

    pub fn write_cram_word(&mut self, address: u32, value: u16) {
        let address = address & (VDP2_CRAM_LEN - 1) as u32 & !1;
        self.cram[address as usize..address as usize + 2].copy_from_slice(&value.to_be_bytes());
        self.update_cram_cache_word(address);
    }

    pub fn write_reg(&mut self, address: u32, value: u16) {
        let cram_mode_before = self.regs.cram_mode();
        self.regs.write(address, value);
        if self.regs.cram_mode() != cram_mode_before {
            self.rebuild_cram_cache();
        }
    }

    fn cram_word(&self, word_index: usize) -> u16 {
        let address = (word_index * 2) & (VDP2_CRAM_LEN - 1);
        u16::from_be_bytes([self.cram[address], self.cram[address + 1]])
    }

    fn update_cram_cache_word(&mut self, address: u32) {
        let word_index = (address as usize & (VDP2_CRAM_LEN - 1)) >> 1;
        match self.regs.cram_mode() {
            // RGB555 modes: one word per color
            0 | 1 => self.cram_cache[word_index] = rgb555_color(self.cram_word(word_index)),
            // RGB888 modes: one longword per color; both word slots mirror the same color
            _ => {
                let long_index = word_index & !1;
                let high = self.cram_word(long_index);
                let low = self.cram_word(long_index + 1);
                let color = Color::rgb(low as u8, (low >> 8) as u8, high as u8);
                self.cram_cache[long_index] = color;
                self.cram_cache[long_index + 1] = color;
            }
        }
    }

    fn rebuild_cram_cache(&mut self) {
        for word_index in 0..VDP2_CRAM_LEN / 2 {
            self.update_cram_cache_word((word_index * 2) as u32);
        }
    }

    /// Color at a CRAM color index, through the decoded cache
    fn cram_color(&self, index: u32) -> Color {
        match self.regs.cram_mode() {
            // Mode 0: 1024 colors mirrored
            0 => self.cram_cache[(index as usize) & 0x3FF],
            // Mode 1: 2048 colors
            1 => self.cram_cache[(index as usize) & 0x7FF],
            // Modes 2/3: 1024 RGB888 colors, one per longword
            _ => self.cram_cache[((index as usize) & 0x3FF) << 1],
        }
    }

    fn vram_u8(&self, address: u32) -> u8 {
        self.vram[(address as usize) & (VDP2_VRAM_LEN - 1)]
    }

    fn vram_u16(&self, address: u32) -> u16 {
        let address = (address as usize) & (VDP2_VRAM_LEN - 1) & !1;
        u16::from_be_bytes([self.vram[address], self.vram[address + 1]])
    }

    fn vram_u32(&self, address: u32) -> u32 {
        let address = (address as usize) & (VDP2_VRAM_LEN - 1) & !3;
        u32::from_be_bytes(self.vram[address..address + 4].try_into().unwrap())
    }

    // ---------------------------------------------------------------------------------------
    // Frame lifecycle

    pub fn begin_frame(&mut self, frame: FrameParams) {
        self.frame = frame;

        // Latch per-frame layer accumulators
        for bg in 0..4 {
            let state = &mut self.nbg_state[bg];
            state.frac_scroll_x = self.regs.bg_scroll_x(bg);
            state.frac_scroll_y = self.regs.bg_scroll_y(bg);
            state.scroll_inc_h = self.regs.bg_zoom_x(bg);
            state.line_scroll_table_address = self.regs.bg_line_scroll_table(bg.min(1));
            state.mosaic_counter_y = 0;
        }

        let table = self.regs.rotation_table_address();
        for param in 0..2 {
            let params = rotation::read_rotation_params(&self.vram[..], table, param);
            let state = &mut self.rot_state[param];
            state.xst = params.xst;
            state.yst = params.yst;
            state.ka = params.kast;
        }
    }

    pub fn update_enabled_bgs(&mut self) {
        self.rbg1_active = self.regs.bg_enabled(5);
        for bg in 0..6 {
            self.enabled_layers[bg] = self.regs.bg_enabled(bg);
        }
        if self.rbg1_active {
            // RBG1 replaces all the normal backgrounds; it renders through the NBG0 slot and
            // borrows its screen configuration
            for bg in 0..4 {
                self.enabled_layers[bg] = false;
            }
        }
        log::trace!("Enabled BGs: {:?}", self.enabled_layers);
    }

    pub fn frame_size(&self) -> (u32, u32) {
        let height = if self.doubled_output() { self.frame.height * 2 } else { self.frame.height };
        (self.frame.width, height)
    }

    fn doubled_output(&self) -> bool {
        self.deinterlace && self.frame.interlace == InterlaceMode::DoubleDensity
    }

    // ---------------------------------------------------------------------------------------
    // Scanline pipeline

    pub fn draw_line(&mut self, y: u16) {
        if u32::from(y) >= self.frame.height {
            return;
        }

        if self.doubled_output() {
            // Deinterlaced double-density: render both fields of this line into adjacent output
            // rows each frame
            self.draw_field_line(y, false, 2 * u32::from(y));
            self.draw_field_line(y, true, 2 * u32::from(y) + 1);
        } else {
            self.draw_field_line(y, self.frame.odd_field, y.into());
        }
    }

    fn draw_field_line(&mut self, y: u16, odd_field: bool, out_row: u32) {
        let width = self.frame.width as usize;

        // Pattern name caches cannot be carried across lines; VRAM writes land between the
        // per-line draw events
        for fetcher in &mut self.fetchers {
            fetcher.invalidate();
        }

        self.fetch_line_back_colors(y);
        self.compute_windows(y);
        self.draw_sprite_layer(y, odd_field);

        let rbg1_active = self.rbg1_active;
        if self.enabled_layers[5] && rbg1_active {
            self.draw_rotation_line(y, 1);
        }
        if self.enabled_layers[LAYER_RBG0] {
            self.draw_rotation_line(y, 0);
        }
        for bg in (0..4).rev() {
            if self.enabled_layers[bg] {
                self.draw_nbg_line(bg, y);
            } else if !(bg == 0 && rbg1_active) {
                self.bg_lines[bg].clear();
            }
        }

        self.compose_line(out_row, width);
    }

    fn fetch_line_back_colors(&mut self, y: u16) {
        let back_table = self.regs.back_color_table();
        let back_entry =
            if self.regs.back_color_per_line() { back_table + 2 * u32::from(y) } else { back_table };
        self.line_back.back_color = u32::from(self.vram_u16(back_entry));

        let line_table = self.regs.line_color_table();
        let line_entry =
            if self.regs.line_color_per_line() { line_table + 2 * u32::from(y) } else { line_table };
        self.line_back.line_color = u32::from(self.vram_u16(line_entry)) & 0x7FF;
    }

    // ---------------------------------------------------------------------------------------
    // Windows

    fn compute_windows(&mut self, y: u16) {
        for window in 0..2 {
            let (mut sx, sy, mut ex, ey) = self.regs.window_rect(window);

            // The line window table overrides the horizontal extent per line
            if let Some(table) = self.regs.line_window_table(window) {
                let entry = table + 4 * u32::from(y);
                sx = (self.vram_u16(entry) >> 1) & 0x1FF;
                ex = (self.vram_u16(entry + 2) >> 1) & 0x1FF;
            }

            let y_inside = (sy..=ey).contains(&y);
            let buffer = &mut self.windows[window];
            if !y_inside || sx > ex {
                buffer.fill(false);
            } else {
                for (x, inside) in buffer.iter_mut().enumerate() {
                    *inside = (u32::from(sx)..=u32::from(ex)).contains(&(x as u32));
                }
            }
        }
    }

    /// True if the given layer is hidden at `x` by its window configuration.
    ///
    /// Each enabled window contributes a match (area bit selects inside/outside); matches
    /// combine with OR or AND per the control byte, and a matched pixel is not displayed.
    fn window_hides(&self, layer: usize, x: usize) -> bool {
        let ctl = self.regs.window_control(layer);

        let w0_enabled = ctl.bit(1);
        let w1_enabled = ctl.bit(3);
        let sw_enabled = ctl.bit(5) && self.regs.sprite_window_enabled();
        if !w0_enabled && !w1_enabled && !sw_enabled {
            return false;
        }

        let mut matches = [false; 3];
        let mut enabled = [false; 3];
        if w0_enabled {
            enabled[0] = true;
            matches[0] = self.windows[0][x] == !ctl.bit(0);
        }
        if w1_enabled {
            enabled[1] = true;
            matches[1] = self.windows[1][x] == !ctl.bit(2);
        }
        if sw_enabled {
            enabled[2] = true;
            matches[2] = self.sprite_line.window[x] == !ctl.bit(4);
        }

        let and_logic = ctl.bit(7);
        if and_logic {
            enabled.iter().zip(&matches).all(|(&e, &m)| !e || m)
        } else {
            matches.iter().any(|&m| m)
        }
    }

    // ---------------------------------------------------------------------------------------
    // Sprite layer

    fn draw_sprite_layer(&mut self, y: u16, odd_field: bool) {
        let width = self.frame.width as usize;
        let type_info = &SPRITE_TYPES[self.regs.sprite_type() as usize];
        let byte_type = self.regs.sprite_type() >= 8;
        let palette_only = !self.regs.sprite_color_mode();
        let cram_offset = self.regs.sprite_cram_offset();
        let window_active = self.regs.sprite_window_enabled();

        // Double-density interlace stores the fields in alternating framebuffer lines
        let fb_row = match self.frame.interlace {
            InterlaceMode::DoubleDensity => 2 * u32::from(y) + u32::from(odd_field),
            _ => u32::from(y),
        };

        for x in 0..width {
            self.sprite_line.transparent[x] = true;
            self.sprite_line.shadow[x] = false;
            self.sprite_line.normal_shadow[x] = false;
            self.sprite_line.window[x] = false;
            self.sprite_line.color_calc[x] = false;

            let raw = if self.frame.fb_8bpp || byte_type {
                u16::from(self.display_fb[((fb_row * 512 + x as u32) as usize) & (VDP1_FB_LEN - 1)])
            } else {
                let offset = ((fb_row * 512 + x as u32) * 2) as usize & (VDP1_FB_LEN - 1) & !1;
                u16::from_be_bytes([self.display_fb[offset], self.display_fb[offset + 1]])
            };

            if raw == 0 {
                continue;
            }

            // RGB555 sprite data bypasses the type decode entirely
            if !palette_only && raw.bit(15) {
                self.sprite_line.color[x] = rgb555_color(raw);
                self.sprite_line.priority[x] = self.regs.sprite_priority(0);
                self.sprite_line.cc_ratio[x] = self.regs.sprite_cc_ratio(0);
                self.sprite_line.color_calc[x] = self.regs.sprite_cc_enabled();
                self.sprite_line.transparent[x] = false;
                continue;
            }

            let prio_bits = (raw >> type_info.prio_shift) & type_info.prio_mask;
            let cc_bits = (raw >> type_info.cc_shift) & type_info.cc_mask;
            let dc = raw & type_info.dc_mask;
            let sd_flag = type_info.sd && raw.bit(15);

            if dc == 0 {
                continue;
            }

            if sd_flag && window_active {
                self.sprite_line.window[x] = true;
                continue;
            }

            // The all-ones-but-LSB color pattern is the normal shadow marker
            if dc == type_info.dc_mask & !1 {
                self.sprite_line.normal_shadow[x] = true;
                self.sprite_line.transparent[x] = false;
                continue;
            }

            let color = self.cram_color(cram_offset + u32::from(dc));
            let priority = self.regs.sprite_priority(prio_bits as usize);

            let line = &mut self.sprite_line;
            line.shadow[x] = sd_flag;
            line.color[x] = color;
            line.priority[x] = priority;
            line.cc_ratio[x] = self.regs.sprite_cc_ratio(cc_bits as usize);
            line.color_calc[x] = self.regs.sprite_cc_enabled()
                && sprite_cc_condition_met(
                    self.regs.sprite_cc_condition(),
                    self.regs.sprite_cc_number(),
                    priority,
                );
            line.transparent[x] = false;
        }

        if self.transparent_meshes {
            self.blend_mesh_layer(fb_row, width);
        }
    }

    /// Transparent-mesh enhancement: pixels the VDP1 drew into the parallel mesh framebuffer
    /// composite at 50% over the sprite layer instead of producing a checkerboard.
    fn blend_mesh_layer(&mut self, fb_row: u32, width: usize) {
        let palette_only = !self.regs.sprite_color_mode();
        let cram_offset = self.regs.sprite_cram_offset();
        let type_info = &SPRITE_TYPES[self.regs.sprite_type() as usize];

        for x in 0..width {
            let offset = ((fb_row * 512 + x as u32) * 2) as usize & (VDP1_FB_LEN - 1) & !1;
            let raw = u16::from_be_bytes([self.mesh_fb[offset], self.mesh_fb[offset + 1]]);
            if raw == 0 {
                continue;
            }

            let mesh_color = if !palette_only && raw.bit(15) {
                rgb555_color(raw)
            } else {
                let dc = raw & type_info.dc_mask;
                if dc == 0 {
                    continue;
                }
                self.cram_color(cram_offset + u32::from(dc))
            };

            let line = &mut self.sprite_line;
            let under = if line.transparent[x] { Color::BLACK } else { line.color[x] };
            line.color[x] = average_color(mesh_color, under);
            if line.transparent[x] {
                line.priority[x] = self.regs.sprite_priority(0);
                line.cc_ratio[x] = self.regs.sprite_cc_ratio(0);
                line.transparent[x] = false;
            }
        }
    }

    // ---------------------------------------------------------------------------------------
    // Normal backgrounds

    fn draw_nbg_line(&mut self, bg: usize, y: u16) {
        let cfg = self.regs.nbg_config(bg);
        let width = self.frame.width as usize;

        if cfg.priority == 0 {
            self.bg_lines[bg].clear();
            return;
        }

        // Mosaic repeats rows: fetch from the top line of the current mosaic cell
        let src_y = if self.regs.mosaic_enabled(bg) {
            u32::from(y) - u32::from(y % self.regs.mosaic_v())
        } else {
            y.into()
        };

        let (scroll_x, scroll_y, zoom_x, zoom_y) = self.line_scrolled_coords(bg, src_y);

        let v_cell_scroll = cfg_supports_vcell(bg) && self.regs.bg_vertical_cell_scroll(bg);
        let vcs_table = self.regs.vertical_cell_scroll_table();
        // NBG1's entries follow NBG0's in each table stride
        let vcs_stride_offset = if bg == 1 && self.regs.bg_vertical_cell_scroll(0) { 4 } else { 0 };
        let vcs_stride: u32 = [
            self.regs.bg_vertical_cell_scroll(0),
            self.regs.bg_vertical_cell_scroll(1),
        ]
        .iter()
        .map(|&e| u32::from(e) * 4)
        .sum();

        let mosaic_h =
            if self.regs.mosaic_enabled(bg) { u32::from(self.regs.mosaic_h()) } else { 1 };

        let mut fx = scroll_x;
        let fy_base = scroll_y.wrapping_add(src_y.wrapping_mul(zoom_y));

        for x in 0..width {
            if self.window_hides(bg, x) {
                self.bg_lines[bg].transparent[x] = true;
                fx = fx.wrapping_add(zoom_x);
                continue;
            }

            let mosaic_x = (x as u32) - ((x as u32) % mosaic_h);
            let sample_fx = if mosaic_h > 1 {
                scroll_x.wrapping_add(mosaic_x.wrapping_mul(zoom_x))
            } else {
                fx
            };

            let sx = sample_fx >> 8;
            let mut sy = fy_base >> 8;

            if v_cell_scroll {
                let column = sx >> 3;
                let entry = vcs_table + column * vcs_stride + vcs_stride_offset;
                let offset = (self.vram_u32(entry) >> 8) & 0x7FF;
                sy = sy.wrapping_add(offset);
            }

            let (color, transparent, special_cc) = if cfg.bitmap {
                self.fetch_bitmap_pixel(bg, &cfg, sx, sy)
            } else {
                self.fetch_cell_pixel(bg, &cfg, sx, sy)
            };

            let color_calc =
                self.regs.cc_enabled(bg) && (!special_cc_gated(&self.regs, bg) || special_cc);

            let line = &mut self.bg_lines[bg];
            line.color[x] = color;
            line.transparent[x] = transparent && !cfg.transparency_disabled;
            line.priority[x] = cfg.priority;
            line.color_calc[x] = color_calc;

            fx = fx.wrapping_add(zoom_x);
        }
    }

    /// Apply the line scroll table: per-line X/Y offsets and per-line zoom for NBG0/NBG1
    fn line_scrolled_coords(&mut self, bg: usize, y: u32) -> (u32, u32, u32, u32) {
        let mut scroll_x = self.regs.bg_scroll_x(bg);
        let mut scroll_y = self.regs.bg_scroll_y(bg);
        let mut zoom_x = if bg < 2 { self.regs.bg_zoom_x(bg) } else { 0x100 };
        let zoom_y = if bg < 2 { self.regs.bg_zoom_y(bg) } else { 0x100 };

        if bg < 2 {
            let has_x = self.regs.bg_line_scroll_x(bg);
            let has_y = self.regs.bg_line_scroll_y(bg);
            let has_zoom = self.regs.bg_line_zoom_x(bg);

            if has_x || has_y || has_zoom {
                let interval = u32::from(self.regs.bg_line_scroll_interval(bg));
                let entry_len =
                    4 * (u32::from(has_x) + u32::from(has_y) + u32::from(has_zoom));
                let mut entry =
                    self.regs.bg_line_scroll_table(bg) + (y / interval) * entry_len;

                if has_x {
                    scroll_x = scroll_x.wrapping_add((self.vram_u32(entry) >> 8) & 0x7FFFF);
                    entry += 4;
                }
                if has_y {
                    scroll_y = scroll_y.wrapping_add((self.vram_u32(entry) >> 8) & 0x7FFFF);
                    entry += 4;
                }
                if has_zoom {
                    zoom_x = (self.vram_u32(entry) >> 8) & 0x7FF;
                    if zoom_x == 0 {
                        zoom_x = 0x100;
                    }
                }
            }
        }

        (scroll_x, scroll_y, zoom_x, zoom_y)
    }

    // ---------------------------------------------------------------------------------------
    // Character/bitmap fetch

    fn fetch_bitmap_pixel(
        &self,
        bg: usize,
        cfg: &NbgConfig,
        sx: u32,
        sy: u32,
    ) -> (Color, bool, bool) {
        let (bw, bh) = bitmap_dimensions(cfg.bitmap_size);
        let x = sx & (bw - 1);
        let y = sy & (bh - 1);
        let base = cfg.map_offset * 0x20000;
        let palette = u32::from(self.regs.bg_bitmap_palette(bg)) << 4;

        self.read_texel(cfg.color_format, base, bw, x, y, palette, self.regs.bg_cram_offset(bg))
    }

    fn fetch_cell_pixel(
        &mut self,
        bg: usize,
        cfg: &NbgConfig,
        sx: u32,
        sy: u32,
    ) -> (Color, bool, bool) {
        let ch = self.fetch_character(bg, cfg, sx, sy);

        let char_pixels = if cfg.char_2x2 { 16 } else { 8 };
        let mut cx = sx & (char_pixels - 1);
        let mut cy = sy & (char_pixels - 1);
        if ch.flip_h {
            cx = char_pixels - 1 - cx;
        }
        if ch.flip_v {
            cy = char_pixels - 1 - cy;
        }

        // A 2x2-cell character stores its four cells sequentially, row-major
        let mut cell_index = u32::from(ch.char_num);
        if cfg.char_2x2 {
            cell_index = cell_index.wrapping_add((cy >> 3) * 2 + (cx >> 3));
            cx &= 7;
            cy &= 7;
        }

        let cell_bytes = cfg.color_format.cell_row_bytes() * 8;
        let base = cell_index.wrapping_mul(cell_bytes);

        let (color, transparent, _) = self.read_texel(
            cfg.color_format,
            base,
            8,
            cx,
            cy,
            u32::from(ch.palette_num) << 4,
            self.regs.bg_cram_offset(bg),
        );
        (color, transparent, ch.special_color_calc)
    }

    /// Pattern name fetch with the one-entry cache the fetcher state carries
    fn fetch_character(&mut self, bg: usize, cfg: &NbgConfig, sx: u32, sy: u32) -> Character {
        let entry_address = self.pattern_name_address(cfg, sx, sy);

        let fetcher = &mut self.fetchers[bg];
        if fetcher.last_entry_address == entry_address {
            return fetcher.curr_char;
        }

        let ch = if cfg.one_word_chars {
            decode_one_word_character(self.vram_u16(entry_address), cfg)
        } else {
            decode_two_word_character(self.vram_u32(entry_address))
        };

        let fetcher = &mut self.fetchers[bg];
        fetcher.last_entry_address = entry_address;
        fetcher.curr_char = ch;
        ch
    }

    fn pattern_name_address(&self, cfg: &NbgConfig, sx: u32, sy: u32) -> u32 {
        let entry_bytes: u32 = if cfg.one_word_chars { 2 } else { 4 };
        let char_pixels: u32 = if cfg.char_2x2 { 16 } else { 8 };
        let entries_per_page = 512 / char_pixels;
        let page_bytes = entries_per_page * entries_per_page * entry_bytes;

        let (pages_w, pages_h) = plane_dimensions(cfg.plane_size);
        let plane_bytes = page_bytes * pages_w * pages_h;

        // 2x2 planes per map
        let plane_px_w = 512 * pages_w;
        let plane_px_h = 512 * pages_h;
        let plane_idx = (((sy / plane_px_h) & 1) * 2 + ((sx / plane_px_w) & 1)) as usize;

        let plane_num = (cfg.map_offset << 6) | u32::from(cfg.map_planes[plane_idx]);
        let plane_addr = plane_num.wrapping_mul(plane_bytes) & !(plane_bytes - 1);

        let page_x = (sx >> 9) & (pages_w - 1);
        let page_y = (sy >> 9) & (pages_h - 1);
        let page_addr = plane_addr + (page_y * pages_w + page_x) * page_bytes;

        let entry_x = (sx & 511) / char_pixels;
        let entry_y = (sy & 511) / char_pixels;
        page_addr + (entry_y * entries_per_page + entry_x) * entry_bytes
    }

    /// Read one texel and resolve it to RGB888. Returns (color, transparent, special flag).
    fn read_texel(
        &self,
        format: ColorFormat,
        base: u32,
        row_pixels: u32,
        x: u32,
        y: u32,
        palette: u32,
        cram_offset: u32,
    ) -> (Color, bool, bool) {
        match format {
            ColorFormat::Palette16 => {
                let byte = self.vram_u8(base + y * (row_pixels / 2) + x / 2);
                let nibble = if x & 1 == 0 { byte >> 4 } else { byte & 0xF };
                let transparent = nibble == 0;
                (self.cram_color(cram_offset + palette + u32::from(nibble)), transparent, false)
            }
            ColorFormat::Palette256 => {
                let byte = self.vram_u8(base + y * row_pixels + x);
                let transparent = byte == 0;
                let index = ((palette & 0x700) | u32::from(byte)) & 0x7FF;
                (self.cram_color(cram_offset + index), transparent, false)
            }
            ColorFormat::Palette2048 => {
                let word = self.vram_u16(base + (y * row_pixels + x) * 2);
                let transparent = word & 0x7FF == 0;
                (self.cram_color(cram_offset + u32::from(word & 0x7FF)), transparent, false)
            }
            ColorFormat::Rgb555 => {
                let word = self.vram_u16(base + (y * row_pixels + x) * 2);
                (rgb555_color(word), !word.bit(15), false)
            }
            ColorFormat::Rgb888 => {
                let long = self.vram_u32(base + (y * row_pixels + x) * 4);
                let color = Color::rgb(long as u8, (long >> 8) as u8, (long >> 16) as u8);
                (color, !long.bit(31), false)
            }
        }
    }

    // ---------------------------------------------------------------------------------------
    // Rotation backgrounds

    fn draw_rotation_line(&mut self, y: u16, rbg: usize) {
        let width = self.frame.width as usize;
        let table = self.regs.rotation_table_address();
        let mode = self.regs.rotation_parameter_mode();

        // RBG1 always uses parameter B; RBG0 selects per mode (and per pixel in mode 2)
        let layer = if rbg == 0 { LAYER_RBG0 } else { LAYER_NBG0 };
        let base_param = if rbg == 1 || mode == 1 { 1 } else { 0 };

        let params_a = rotation::read_rotation_params(&self.vram[..], table, 0);
        let params_b = rotation::read_rotation_params(&self.vram[..], table, 1);

        let cfg = self.rotation_config(rbg);
        let priority = cfg.priority;
        if priority == 0 {
            self.bg_lines[layer].clear();
            return;
        }

        for x in 0..width {
            if self.window_hides(layer, x) {
                self.bg_lines[layer].transparent[x] = true;
                continue;
            }

            // Mode 2 switches parameter sets inside window 0
            let param = match mode {
                2 if rbg == 0 => usize::from(!self.windows[0][x]),
                _ => base_param,
            };
            let params = if param == 0 { &params_a } else { &params_b };

            let (color, transparent, special_cc) =
                self.rotation_pixel(rbg, &cfg, params, param, x as u32, y.into());

            let line = &mut self.bg_lines[layer];
            line.color[x] = color;
            line.transparent[x] = transparent && !cfg.transparency_disabled;
            line.priority[x] = priority;
            line.color_calc[x] = self.regs.cc_enabled(if rbg == 0 { 4 } else { 0 })
                && (!special_cc_gated(&self.regs, if rbg == 0 { 4 } else { 0 }) || special_cc);
        }
    }

    /// RBG0 uses its own screen configuration; RBG1 borrows NBG0's with parameter B's maps
    fn rotation_config(&self, rbg: usize) -> NbgConfig {
        if rbg == 0 {
            NbgConfig {
                enabled: self.regs.bg_enabled(4),
                transparency_disabled: self.regs.bg_transparency_disabled(4),
                char_2x2: self.regs.bg_char_2x2(4),
                bitmap: self.regs.bg_bitmap(4),
                bitmap_size: self.regs.bg_bitmap_size(4),
                color_format: self.regs.bg_color_format(4),
                one_word_chars: self.regs.bg_one_word_chars(4),
                supp_char_num: self.regs.bg_supp_char_num(4),
                supp_palette: self.regs.bg_supp_palette(4),
                supp_flags_in_char: !self.regs.bg_char_num_12bit(4),
                plane_size: self.regs.rbg_plane_size(0),
                map_offset: self.regs.rbg_map_offset(0),
                map_planes: [0; 4],
                priority: self.regs.bg_priority(4),
            }
        } else {
            let mut cfg = self.regs.nbg_config(0);
            cfg.plane_size = self.regs.rbg_plane_size(1);
            cfg.map_offset = self.regs.rbg_map_offset(1);
            cfg
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rotation_pixel(
        &mut self,
        rbg: usize,
        cfg: &NbgConfig,
        params: &RotationParams,
        param: usize,
        x: u32,
        y: u32,
    ) -> (Color, bool, bool) {
        let mut kx = params.kx;
        let mut ky = params.ky;

        // Per-pixel coefficient fetch replaces the scale factors (and can force transparency)
        if self.regs.coeff_enabled(param) {
            let coeff = self.fetch_coefficient(params, param, x, y);
            if coeff.transparent {
                return (Color::BLACK, true, false);
            }
            match self.regs.coeff_mode(param) {
                0 => {
                    kx = coeff.value;
                    ky = coeff.value;
                }
                1 => kx = coeff.value,
                2 => ky = coeff.value,
                _ => {
                    kx = coeff.value;
                    ky = coeff.value;
                }
            }
        }

        let xs = params.xst
            + params.dxst * i64::from(y)
            + params.dx * i64::from(x);
        let ys = params.yst
            + params.dyst * i64::from(y)
            + params.dy * i64::from(x);

        let (xsp, ysp) = params.rotate(xs, ys);
        let (xp, yp) = params.view_offset();

        let sx = (rotation::mul_fixed(kx, xsp) + xp) >> 16;
        let sy = (rotation::mul_fixed(ky, ysp) + yp) >> 16;

        let over_mode = ScreenOverMode::from_bits(self.regs_over_bits(param));

        if cfg.bitmap {
            let (bw, bh) = rotation_bitmap_dimensions(cfg.bitmap_size);
            let out_of_area = sx < 0 || sy < 0 || sx >= i64::from(bw) || sy >= i64::from(bh);
            if out_of_area && over_mode != ScreenOverMode::Repeat {
                return (Color::BLACK, true, false);
            }
            let x = (sx as u32) & (bw - 1);
            let y = (sy as u32) & (bh - 1);
            let base = cfg.map_offset * 0x20000;
            let palette = u32::from(self.regs.bg_bitmap_palette(4)) << 4;
            return self.read_texel(
                cfg.color_format,
                base,
                bw,
                x,
                y,
                palette,
                self.regs.bg_cram_offset(4),
            );
        }

        // Cell mode: the rotation map is 4x4 planes
        let (pages_w, pages_h) = plane_dimensions(cfg.plane_size);
        let map_px_w = 4 * 512 * pages_w;
        let map_px_h = 4 * 512 * pages_h;

        let out_of_map = sx < 0 || sy < 0 || sx >= i64::from(map_px_w) || sy >= i64::from(map_px_h);
        match over_mode {
            ScreenOverMode::Repeat | ScreenOverMode::OverPattern => {}
            ScreenOverMode::Transparent => {
                if out_of_map {
                    return (Color::BLACK, true, false);
                }
            }
            ScreenOverMode::Fixed512 => {
                if sx < 0 || sy < 0 || sx >= 512 || sy >= 512 {
                    return (Color::BLACK, true, false);
                }
            }
        }

        // Map sizes are powers of two, so masking wraps negative coordinates correctly
        let sx = (sx as u32) & (map_px_w - 1);
        let sy = (sy as u32) & (map_px_h - 1);

        let ch = self.fetch_rotation_character(rbg, cfg, param, sx, sy);

        let char_pixels = if cfg.char_2x2 { 16u32 } else { 8 };
        let mut cx = sx & (char_pixels - 1);
        let mut cy = sy & (char_pixels - 1);
        if ch.flip_h {
            cx = char_pixels - 1 - cx;
        }
        if ch.flip_v {
            cy = char_pixels - 1 - cy;
        }

        let mut cell_index = u32::from(ch.char_num);
        if cfg.char_2x2 {
            cell_index = cell_index.wrapping_add((cy >> 3) * 2 + (cx >> 3));
            cx &= 7;
            cy &= 7;
        }

        let cell_bytes = cfg.color_format.cell_row_bytes() * 8;
        let (color, transparent, _) = self.read_texel(
            cfg.color_format,
            cell_index.wrapping_mul(cell_bytes),
            8,
            cx,
            cy,
            u32::from(ch.palette_num) << 4,
            self.regs.bg_cram_offset(4),
        );
        (color, transparent, ch.special_color_calc)
    }

    fn regs_over_bits(&self, param: usize) -> u16 {
        // Screen-over mode lives next to the rotation plane sizes in PLSZ
        self.regs.raw[0x3A >> 1] >> (10 + 4 * param as u32)
    }

    fn fetch_coefficient(
        &mut self,
        params: &RotationParams,
        param: usize,
        x: u32,
        y: u32,
    ) -> Coefficient {
        let word_size = self.regs.coeff_word_size(param);
        let base = self.regs.coeff_table_offset(param) * 0x10000;

        let ka = (params.kast as i64
            + i64::from(params.dkast) * i64::from(y)
            + i64::from(params.dkax) * i64::from(x)) as u32;
        self.rot_state[param].ka = ka;

        if self.regs.coeff_table_in_cram() {
            rotation::read_coefficient(&self.cram[..], base & 0xFFF, ka, word_size)
        } else {
            rotation::read_coefficient(&self.vram[..], base, ka, word_size)
        }
    }

    fn fetch_rotation_character(
        &mut self,
        rbg: usize,
        cfg: &NbgConfig,
        param: usize,
        sx: u32,
        sy: u32,
    ) -> Character {
        let entry_bytes: u32 = if cfg.one_word_chars { 2 } else { 4 };
        let char_pixels: u32 = if cfg.char_2x2 { 16 } else { 8 };
        let entries_per_page = 512 / char_pixels;
        let page_bytes = entries_per_page * entries_per_page * entry_bytes;

        let (pages_w, pages_h) = plane_dimensions(cfg.plane_size);
        let plane_bytes = page_bytes * pages_w * pages_h;
        let plane_px_w = 512 * pages_w;
        let plane_px_h = 512 * pages_h;

        let planes = self.regs.rbg_map_planes(param);
        let plane_idx = (((sy / plane_px_h) & 3) * 4 + ((sx / plane_px_w) & 3)) as usize;
        let plane_num = (cfg.map_offset << 6) | u32::from(planes[plane_idx]);
        let plane_addr = plane_num.wrapping_mul(plane_bytes) & !(plane_bytes - 1);
        self.rot_state[param].page_base_addresses[plane_idx] = plane_addr;

        let page_x = (sx >> 9) & (pages_w - 1);
        let page_y = (sy >> 9) & (pages_h - 1);
        let page_addr = plane_addr + (page_y * pages_w + page_x) * page_bytes;

        let entry_x = (sx & 511) / char_pixels;
        let entry_y = (sy & 511) / char_pixels;
        let entry_address = page_addr + (entry_y * entries_per_page + entry_x) * entry_bytes;

        let fetcher = &mut self.fetchers[4 + rbg];
        if fetcher.last_entry_address == entry_address {
            return fetcher.curr_char;
        }

        let ch = if cfg.one_word_chars {
            decode_one_word_character(self.vram_u16(entry_address), cfg)
        } else {
            decode_two_word_character(self.vram_u32(entry_address))
        };

        let fetcher = &mut self.fetchers[4 + rbg];
        fetcher.last_entry_address = entry_address;
        fetcher.curr_char = ch;
        ch
    }

    // ---------------------------------------------------------------------------------------
    // Composition

    fn compose_line(&mut self, out_row: u32, width: usize) {
        let back_color = rgb555_color(self.line_back.back_color as u16);
        let line_color = self.cram_color(self.line_back.line_color);
        let row_base = out_row as usize * MAX_RES_H;

        for x in 0..width {
            // Find the top two layers by priority. The back screen is always at the bottom.
            let mut top = PixelSource::back(back_color);
            let mut second = PixelSource::back(back_color);

            // Lowest precedence first: NBG3 up to NBG0/RBG1, then RBG0, then sprites
            for bg in [3usize, 2, 1, 0, LAYER_RBG0] {
                let line = &self.bg_lines[bg];
                if line.transparent[x] || line.priority[x] == 0 {
                    continue;
                }
                let candidate = PixelSource {
                    color: line.color[x],
                    priority: line.priority[x],
                    layer: bg,
                    color_calc: line.color_calc[x],
                    cc_ratio: self.regs.bg_cc_ratio(bg.min(4)),
                };
                (top, second) = insert_pixel(top, second, candidate);
            }

            let sprite = &self.sprite_line;
            let mut sprite_shadow = false;
            if !sprite.transparent[x] {
                if sprite.normal_shadow[x] {
                    sprite_shadow = true;
                } else {
                    let candidate = PixelSource {
                        color: sprite.color[x],
                        priority: sprite.priority[x],
                        layer: LAYER_SPRITE,
                        color_calc: sprite.color_calc[x],
                        cc_ratio: sprite.cc_ratio[x],
                    };
                    (top, second) = insert_pixel(top, second, candidate);
                    sprite_shadow = sprite.shadow[x] && self.regs.shadow_enabled(top.layer.min(7));
                }
            }

            let mut color = if top.color_calc {
                // Line color insertion puts the line screen between the top layer and whatever
                // is beneath it
                let under = if self.regs.line_color_enabled(top.layer.min(5)) {
                    line_color
                } else {
                    second.color
                };

                if self.regs.cc_additive() {
                    add_colors(top.color, under)
                } else {
                    let ratio = if self.regs.cc_ratio_from_second() && second.layer != LAYER_BACK {
                        second.cc_ratio
                    } else {
                        top.cc_ratio
                    };
                    blend_ratio(top.color, under, ratio)
                }
            } else {
                top.color
            };

            // Sprite shadow darkens the output
            if sprite_shadow {
                color = half_color(color);
            }

            // Color offset
            let offset_layer = top.layer.min(6);
            if self.regs.color_offset_enabled(offset_layer) {
                let (r, g, b) = self.regs.color_offset(self.regs.color_offset_b(offset_layer));
                color = offset_color(color, r, g, b);
            }

            self.framebuffer[row_base + x] = color;
        }
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
struct PixelSource {
    color: Color,
    priority: u8,
    layer: usize,
    color_calc: bool,
    cc_ratio: u8,
}

impl PixelSource {
    fn back(color: Color) -> Self {
        Self { color, priority: 0, layer: LAYER_BACK, color_calc: false, cc_ratio: 0 }
    }
}

/// Insert a candidate into the running top-two selection. Candidates arrive in increasing
/// precedence order, so ties go to the newcomer.
fn insert_pixel(
    top: PixelSource,
    second: PixelSource,
    candidate: PixelSource,
) -> (PixelSource, PixelSource) {
    if candidate.priority >= top.priority {
        (candidate, top)
    } else if candidate.priority >= second.priority {
        (top, candidate)
    } else {
        (top, second)
    }
}

fn sprite_cc_condition_met(condition: u8, number: u8, priority: u8) -> bool {
    match condition {
        0 => priority <= number,
        1 => priority == number,
        2 => priority >= number,
        // Condition 3 uses the color data MSB, which the type decode folded away; treat as
        // always enabled
        _ => true,
    }
}

fn special_cc_gated(regs: &Vdp2Registers, bg: usize) -> bool {
    // SFCCMD: 2 bits per background; mode 1 gates color calc on the per-character flag
    (regs.raw[0xEE >> 1] >> (2 * bg as u32)) & 3 == 1
}

fn cfg_supports_vcell(bg: usize) -> bool {
    bg < 2
}

fn plane_dimensions(plane_size: u8) -> (u32, u32) {
    match plane_size {
        0 => (1, 1),
        1 => (2, 1),
        _ => (2, 2),
    }
}

fn bitmap_dimensions(size: u8) -> (u32, u32) {
    match size {
        0 => (512, 256),
        1 => (512, 512),
        2 => (1024, 256),
        _ => (1024, 512),
    }
}

fn rotation_bitmap_dimensions(size: u8) -> (u32, u32) {
    match size & 1 {
        0 => (512, 256),
        _ => (512, 512),
    }
}

fn decode_two_word_character(entry: u32) -> Character {
    Character {
        char_num: (entry & 0x7FFF) as u16,
        palette_num: ((entry >> 16) & 0x7F) as u16,
        flip_h: entry.bit(30),
        flip_v: entry.bit(31),
        special_priority: entry.bit(29),
        special_color_calc: entry.bit(28),
    }
}

fn decode_one_word_character(entry: u16, cfg: &NbgConfig) -> Character {
    let supp = cfg.supp_char_num;
    let palette_low = (entry >> 12) & 0xF;

    let (char_num, flip_h, flip_v) = if cfg.supp_flags_in_char {
        // 10-bit character number; flips come from the data
        let base = entry & 0x3FF;
        let char_num = if cfg.char_2x2 {
            (base << 2) | (supp & 3) | ((supp & 0x1C) << 10)
        } else {
            base | ((supp & 0x1F) << 10)
        };
        (char_num, entry.bit(10), entry.bit(11))
    } else {
        // 12-bit character number; no flips
        let base = entry & 0xFFF;
        let char_num = if cfg.char_2x2 {
            (base << 2) | (supp & 3) | ((supp & 0x10) << 10)
        } else {
            base | ((supp & 0x1C) << 10)
        };
        (char_num, false, false)
    };

    Character {
        char_num,
        palette_num: palette_low | (cfg.supp_palette << 4),
        flip_h,
        flip_v,
        special_priority: false,
        special_color_calc: false,
    }
}

fn rgb555_color(value: u16) -> Color {
    Color::rgb(
        RGB_5_TO_8[(value & 0x1F) as usize],
        RGB_5_TO_8[((value >> 5) & 0x1F) as usize],
        RGB_5_TO_8[((value >> 10) & 0x1F) as usize],
    )
}

const RGB_5_TO_8: &[u8; 32] = &[
    0, 8, 16, 25, 33, 41, 49, 58, 66, 74, 82, 90, 99, 107, 115, 123, 132, 140, 148, 156, 165, 173,
    181, 189, 197, 206, 214, 222, 230, 239, 247, 255,
];

fn blend_ratio(first: Color, second: Color, ratio: u8) -> Color {
    let ratio = u16::from(ratio & 0x1F);
    let inv = 32 - ratio;
    Color::rgb(
        ((u16::from(first.r) * inv + u16::from(second.r) * ratio) / 32) as u8,
        ((u16::from(first.g) * inv + u16::from(second.g) * ratio) / 32) as u8,
        ((u16::from(first.b) * inv + u16::from(second.b) * ratio) / 32) as u8,
    )
}

fn add_colors(first: Color, second: Color) -> Color {
    Color::rgb(
        first.r.saturating_add(second.r),
        first.g.saturating_add(second.g),
        first.b.saturating_add(second.b),
    )
}

fn average_color(first: Color, second: Color) -> Color {
    Color::rgb(
        ((u16::from(first.r) + u16::from(second.r)) / 2) as u8,
        ((u16::from(first.g) + u16::from(second.g)) / 2) as u8,
        ((u16::from(first.b) + u16::from(second.b)) / 2) as u8,
    )
}

fn half_color(color: Color) -> Color {
    Color::rgb(color.r / 2, color.g / 2, color.b / 2)
}

fn offset_color(color: Color, r: i16, g: i16, b: i16) -> Color {
    Color::rgb(
        (i16::from(color.r) + r).clamp(0, 255) as u8,
        (i16::from(color.g) + g).clamp(0, 255) as u8,
        (i16::from(color.b) + b).clamp(0, 255) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_back_color(rgb555: u16) -> RenderState {
        let mut state = RenderState::new();
        // Back screen table at VRAM 0 with a single color
        state.write_vram_word(0, rgb555);
        state.begin_frame(FrameParams::default());
        state.update_enabled_bgs();
        state
    }

    #[test]
    fn back_screen_fills_disabled_display() {
        let mut state = state_with_back_color(0x7FFF);
        state.draw_line(0);

        let white = rgb555_color(0x7FFF);
        assert_eq!(state.framebuffer[0], white);
        assert_eq!(state.framebuffer[319], white);
    }

    #[test]
    fn nbg_cell_layer_renders_through_the_palette() {
        let mut state = RenderState::new();

        // CRAM color 1 = pure red (RGB555 mode 0)
        state.write_cram_word(2, 0x001F);

        // NBG0: enabled, 16-color 1x1 cells, 1-word patterns, priority 7
        state.write_reg(0x20, 0x0001);
        state.write_reg(0x30, 0x8000);
        state.write_reg(0xF8, 0x0007);

        // Pattern name table at plane 0, character 1; cell 1 data: all pixels = color 1
        state.write_vram_word(0, 0x0001);
        for row in 0..8u32 {
            state.write_vram_word(0x20 + row * 4, 0x1111);
            state.write_vram_word(0x20 + row * 4 + 2, 0x1111);
        }

        state.begin_frame(FrameParams::default());
        state.update_enabled_bgs();
        state.draw_line(0);

        assert_eq!(state.framebuffer[0], rgb555_color(0x001F));
    }

    #[test]
    fn higher_priority_layer_wins_composition() {
        let mut state = RenderState::new();

        // Two bitmap layers: NBG0 (green, priority 3) and NBG1 (blue, priority 5)
        state.write_cram_word(2, 0x03E0);

        // NBG0 bitmap mode, 256-color would complicate things; use priority only via sprite
        // instead: draw sprite pixels into the display framebuffer
        state.write_reg(0x20, 0x0000);
        // Sprite type 0, palette mode
        state.write_reg(0xE0, 0x0000);
        // Sprite priority registers: register 0 = 5
        state.write_reg(0xF0, 0x0005);

        // Back screen: dark red
        state.write_vram_word(0, 0x000F);

        // Framebuffer pixel 0: color index 1, priority bits 0
        state.display_fb[0] = 0x00;
        state.display_fb[1] = 0x01;

        state.begin_frame(FrameParams::default());
        state.update_enabled_bgs();
        state.draw_line(0);

        // Sprite pixel (CRAM color 1 = green) beats the back screen
        assert_eq!(state.framebuffer[0], rgb555_color(0x03E0));
        // Pixel 1 has no sprite data; back screen shows
        assert_eq!(state.framebuffer[1], rgb555_color(0x000F));
    }

    #[test]
    fn window_hides_a_layer_inside_its_rectangle() {
        let mut state = RenderState::new();

        state.write_cram_word(2, 0x001F);

        // NBG0 16-color cells as in the palette test; the first three cells all show
        // character 1
        state.write_reg(0x20, 0x0001);
        state.write_reg(0x30, 0x8000);
        state.write_reg(0xF8, 0x0007);
        state.write_vram_word(0, 0x0001);
        state.write_vram_word(2, 0x0001);
        state.write_vram_word(4, 0x0001);
        for row in 0..8u32 {
            state.write_vram_word(0x20 + row * 4, 0x1111);
            state.write_vram_word(0x20 + row * 4 + 2, 0x1111);
        }

        // Window 0 covers x 8..=15 on every line; NBG0 hidden inside it
        state.write_reg(0xC0, 8 << 1);
        state.write_reg(0xC2, 0);
        state.write_reg(0xC4, 15 << 1);
        state.write_reg(0xC6, 511);
        state.write_reg(0xD0, 0x0002);

        state.begin_frame(FrameParams::default());
        state.update_enabled_bgs();
        state.draw_line(0);

        let red = rgb555_color(0x001F);
        assert_eq!(state.framebuffer[7], red);
        assert_ne!(state.framebuffer[8], red);
        assert_ne!(state.framebuffer[15], red);
        assert_eq!(state.framebuffer[16], red);
    }

    #[test]
    fn color_calculation_blends_top_two_layers() {
        let mut state = RenderState::new();

        // Sprite layer color 1 = white, back = black; sprite cc enabled at ratio 16 (~50%).
        // The cc condition is "priority >= 0" so it always passes.
        state.write_cram_word(2, 0x7FFF);
        state.write_reg(0xE0, 0x2000);
        state.write_reg(0xF0, 0x0005);
        // CCCTL: sprite color calc enable
        state.write_reg(0xEC, 0x0040);
        // CCRSA register 0 ratio = 16
        state.write_reg(0x100, 0x0010);

        state.display_fb[0] = 0x00;
        state.display_fb[1] = 0x01;

        state.begin_frame(FrameParams::default());
        state.update_enabled_bgs();
        state.draw_line(0);

        let output = state.framebuffer[0];
        let white = rgb555_color(0x7FFF);
        assert!(output.r < white.r && output.r > 100, "expected a blend, got {output:?}");
    }

    #[test]
    fn deinterlaced_double_density_outputs_two_rows_per_line() {
        let mut state = state_with_back_color(0x7FFF);
        state.deinterlace = true;
        state.begin_frame(FrameParams {
            interlace: InterlaceMode::DoubleDensity,
            ..FrameParams::default()
        });
        state.update_enabled_bgs();
        state.draw_line(0);

        let white = rgb555_color(0x7FFF);
        assert_eq!(state.framebuffer[0], white);
        assert_eq!(state.framebuffer[MAX_RES_H], white);
        assert_eq!(state.frame_size(), (320, 448));
    }
}
