//! VDP2 register file
//!
//! VDP2 carries roughly 150 word-sized registers. They are stored as one raw array (which also
//! gives the debugger and the save-state serializer a complete snapshot for free) with typed
//! accessors over the fields the renderer consumes. TVSTAT, HCNT, and VCNT are synthesized from
//! the live timing state and never hit this array.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

pub const REGS_LEN: usize = 0x100;

/// One normal background's static configuration, gathered from across the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NbgConfig {
    pub enabled: bool,
    pub transparency_disabled: bool,
    /// 2x2-cell characters instead of 1x1
    pub char_2x2: bool,
    pub bitmap: bool,
    pub bitmap_size: u8,
    pub color_format: ColorFormat,
    /// Pattern name data is one word instead of two
    pub one_word_chars: bool,
    /// Supplement bits for 1-word pattern names
    pub supp_char_num: u16,
    pub supp_palette: u16,
    pub supp_flags_in_char: bool,
    pub plane_size: u8,
    pub map_offset: u32,
    pub map_planes: [u8; 4],
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Palette16,
    Palette256,
    Palette2048,
    Rgb555,
    Rgb888,
}

impl ColorFormat {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 7 {
            0 => Self::Palette16,
            1 => Self::Palette256,
            2 => Self::Palette2048,
            3 => Self::Rgb555,
            _ => Self::Rgb888,
        }
    }

    /// Bytes per 8x1 row of one cell
    pub fn cell_row_bytes(self) -> u32 {
        match self {
            Self::Palette16 => 4,
            Self::Palette256 => 8,
            Self::Palette2048 | Self::Rgb555 => 16,
            Self::Rgb888 => 32,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp2Registers {
    pub raw: [u16; REGS_LEN],
}

impl Vdp2Registers {
    pub fn new() -> Self {
        Self { raw: [0; REGS_LEN] }
    }

    #[inline]
    fn reg(&self, address: u32) -> u16 {
        self.raw[((address & 0x1FF) >> 1) as usize]
    }

    /// Raw write. Returns true when the write lands on TVMD, whose decode feeds the timing
    /// machinery.
    pub fn write(&mut self, address: u32, value: u16) -> bool {
        let index = ((address & 0x1FF) >> 1) as usize;
        self.raw[index] = value;
        index == 0
    }

    pub fn read(&self, address: u32) -> u16 {
        self.reg(address)
    }

    // ($00 TVMD) TV screen mode
    pub fn tvmd(&self) -> u16 {
        self.reg(0x00)
    }

    // ($0E RAMCTL) RAM control: CRAM mode in bits 12-13, coefficient-table-in-CRAM in bit 15
    pub fn cram_mode(&self) -> u8 {
        (self.reg(0x0E) >> 12) as u8 & 3
    }

    pub fn coeff_table_in_cram(&self) -> bool {
        self.reg(0x0E).bit(15)
    }

    // ($20 BGON) screen display enable
    pub fn bg_enabled(&self, bg: usize) -> bool {
        self.reg(0x20).bit(bg as u8)
    }

    pub fn bg_transparency_disabled(&self, bg: usize) -> bool {
        self.reg(0x20).bit(8 + bg as u8)
    }

    // ($22 MZCTL) mosaic control
    pub fn mosaic_enabled(&self, bg: usize) -> bool {
        bg < 4 && self.reg(0x22).bit(bg as u8)
    }

    pub fn mosaic_h(&self) -> u16 {
        ((self.reg(0x22) >> 8) & 0xF) + 1
    }

    pub fn mosaic_v(&self) -> u16 {
        ((self.reg(0x22) >> 12) & 0xF) + 1
    }

    // ($28 CHCTLA / $2A CHCTLB) character control
    fn chctl_bits(&self, bg: usize) -> u16 {
        match bg {
            0 => self.reg(0x28),
            1 => self.reg(0x28) >> 8,
            2 => self.reg(0x2A),
            3 => self.reg(0x2A) >> 4,
            // RBG0 occupies the high byte of CHCTLB
            _ => self.reg(0x2A) >> 8,
        }
    }

    pub fn bg_char_2x2(&self, bg: usize) -> bool {
        self.chctl_bits(bg).bit(0)
    }

    pub fn bg_bitmap(&self, bg: usize) -> bool {
        // Only NBG0, NBG1, and RBG0 support bitmap mode
        matches!(bg, 0 | 1 | 4) && self.chctl_bits(bg).bit(1)
    }

    pub fn bg_bitmap_size(&self, bg: usize) -> u8 {
        (self.chctl_bits(bg) >> 2) as u8 & 3
    }

    pub fn bg_color_format(&self, bg: usize) -> ColorFormat {
        let bits = match bg {
            0 => self.chctl_bits(0) >> 4,
            1 => (self.chctl_bits(1) >> 4) & 3,
            2 => (self.chctl_bits(2) >> 1) & 1,
            3 => (self.chctl_bits(3) >> 1) & 1,
            _ => (self.chctl_bits(4) >> 4) & 7,
        };
        ColorFormat::from_bits(bits)
    }

    // ($2C BMPNA / $2E BMPNB) bitmap palette numbers
    pub fn bg_bitmap_palette(&self, bg: usize) -> u16 {
        let bits = match bg {
            0 => self.reg(0x2C),
            1 => self.reg(0x2C) >> 8,
            _ => self.reg(0x2E),
        };
        bits & 7
    }

    // ($30-$36 PNCN0-PNCN3, $38 PNCR) pattern name control
    fn pncn(&self, bg: usize) -> u16 {
        match bg {
            0 => self.reg(0x30),
            1 => self.reg(0x32),
            2 => self.reg(0x34),
            3 => self.reg(0x36),
            _ => self.reg(0x38),
        }
    }

    pub fn bg_one_word_chars(&self, bg: usize) -> bool {
        self.pncn(bg).bit(15)
    }

    pub fn bg_supp_char_num(&self, bg: usize) -> u16 {
        self.pncn(bg) & 0x1F
    }

    pub fn bg_supp_palette(&self, bg: usize) -> u16 {
        (self.pncn(bg) >> 5) & 7
    }

    /// Character number supplement mode: 12-bit character numbers with no flip bits
    pub fn bg_char_num_12bit(&self, bg: usize) -> bool {
        self.pncn(bg).bit(14)
    }

    // ($3A PLSZ) plane size, 2 bits per background
    pub fn bg_plane_size(&self, bg: usize) -> u8 {
        (self.reg(0x3A) >> (2 * bg)) as u8 & 3
    }

    pub fn rbg_plane_size(&self, param: usize) -> u8 {
        (self.reg(0x3A) >> (8 + 4 * param)) as u8 & 3
    }

    // ($3C MPOFN / $3E MPOFR) map offsets, 3 bits per background
    pub fn bg_map_offset(&self, bg: usize) -> u32 {
        u32::from((self.reg(0x3C) >> (4 * bg)) & 7)
    }

    pub fn rbg_map_offset(&self, param: usize) -> u32 {
        u32::from((self.reg(0x3E) >> (4 * param)) & 7)
    }

    // ($40-$5E MPABN0-MPOPRB) map plane numbers, 6 bits per plane
    pub fn bg_map_planes(&self, bg: usize) -> [u8; 4] {
        let ab = self.reg(0x40 + 4 * bg as u32);
        let cd = self.reg(0x42 + 4 * bg as u32);
        [ab as u8 & 0x3F, (ab >> 8) as u8 & 0x3F, cd as u8 & 0x3F, (cd >> 8) as u8 & 0x3F]
    }

    /// The 16 map planes of a rotation parameter set
    pub fn rbg_map_planes(&self, param: usize) -> [u8; 16] {
        let base = 0x50 + 0x10 * param as u32;
        let mut planes = [0; 16];
        for (i, pair) in planes.chunks_exact_mut(2).enumerate() {
            let word = self.reg(base + 2 * i as u32);
            pair[0] = word as u8 & 0x3F;
            pair[1] = (word >> 8) as u8 & 0x3F;
        }
        planes
    }

    // ($70-$8E SCXIN0-ZMYDN1, $90-$96 SCXN2/3) scroll and zoom
    pub fn bg_scroll_x(&self, bg: usize) -> u32 {
        match bg {
            0 => (u32::from(self.reg(0x70) & 0x7FF) << 8) | u32::from(self.reg(0x72) >> 8),
            1 => (u32::from(self.reg(0x80) & 0x7FF) << 8) | u32::from(self.reg(0x82) >> 8),
            2 => u32::from(self.reg(0x90) & 0x7FF) << 8,
            _ => u32::from(self.reg(0x94) & 0x7FF) << 8,
        }
    }

    pub fn bg_scroll_y(&self, bg: usize) -> u32 {
        match bg {
            0 => (u32::from(self.reg(0x74) & 0x7FF) << 8) | u32::from(self.reg(0x76) >> 8),
            1 => (u32::from(self.reg(0x84) & 0x7FF) << 8) | u32::from(self.reg(0x86) >> 8),
            2 => u32::from(self.reg(0x92) & 0x7FF) << 8,
            _ => u32::from(self.reg(0x96) & 0x7FF) << 8,
        }
    }

    /// Zoom as an 8.8 fixed-point step per pixel; NBG0 and NBG1 only
    pub fn bg_zoom_x(&self, bg: usize) -> u32 {
        let (int, frac) = match bg {
            0 => (self.reg(0x78), self.reg(0x7A)),
            _ => (self.reg(0x88), self.reg(0x8A)),
        };
        zoom_step(int, frac)
    }

    pub fn bg_zoom_y(&self, bg: usize) -> u32 {
        let (int, frac) = match bg {
            0 => (self.reg(0x7C), self.reg(0x7E)),
            _ => (self.reg(0x8C), self.reg(0x8E)),
        };
        zoom_step(int, frac)
    }

    // ($9A SCRCTL) line/cell scroll control; NBG0 in the low byte, NBG1 in the high byte
    fn scrctl_bits(&self, bg: usize) -> u16 {
        self.reg(0x9A) >> (8 * bg as u32)
    }

    pub fn bg_vertical_cell_scroll(&self, bg: usize) -> bool {
        bg < 2 && self.scrctl_bits(bg).bit(0)
    }

    pub fn bg_line_scroll_x(&self, bg: usize) -> bool {
        bg < 2 && self.scrctl_bits(bg).bit(1)
    }

    pub fn bg_line_scroll_y(&self, bg: usize) -> bool {
        bg < 2 && self.scrctl_bits(bg).bit(2)
    }

    pub fn bg_line_zoom_x(&self, bg: usize) -> bool {
        bg < 2 && self.scrctl_bits(bg).bit(3)
    }

    /// Line scroll table entries per applied line: 1, 2, 4, or 8
    pub fn bg_line_scroll_interval(&self, bg: usize) -> u16 {
        1 << ((self.scrctl_bits(bg) >> 4) & 3)
    }

    // ($9C/$9E VCSTA) vertical cell scroll table address
    pub fn vertical_cell_scroll_table(&self) -> u32 {
        ((u32::from(self.reg(0x9C) & 7) << 16) | u32::from(self.reg(0x9E))) & !1
    }

    // ($A0-$A6 LSTA0/LSTA1) line scroll table addresses
    pub fn bg_line_scroll_table(&self, bg: usize) -> u32 {
        let base = 0xA0 + 4 * bg as u32;
        ((u32::from(self.reg(base) & 7) << 16) | u32::from(self.reg(base + 2))) & !1
    }

    // ($A8/$AA LCTA) line color screen table address
    pub fn line_color_table(&self) -> u32 {
        (u32::from(self.reg(0xA8) & 7) << 16) | u32::from(self.reg(0xAA))
    }

    pub fn line_color_per_line(&self) -> bool {
        self.reg(0xA8).bit(15)
    }

    // ($AC/$AE BKTA) back screen table address
    pub fn back_color_table(&self) -> u32 {
        (u32::from(self.reg(0xAC) & 7) << 16) | u32::from(self.reg(0xAE))
    }

    pub fn back_color_per_line(&self) -> bool {
        self.reg(0xAC).bit(15)
    }

    // ($B0 RPMD) rotation parameter mode
    pub fn rotation_parameter_mode(&self) -> u8 {
        self.reg(0xB0) as u8 & 3
    }

    // ($B4 KTCTL) coefficient table control, parameter A in the low byte
    pub fn coeff_enabled(&self, param: usize) -> bool {
        (self.reg(0xB4) >> (8 * param as u32)).bit(0)
    }

    pub fn coeff_word_size(&self, param: usize) -> bool {
        (self.reg(0xB4) >> (8 * param as u32)).bit(1)
    }

    pub fn coeff_mode(&self, param: usize) -> u8 {
        ((self.reg(0xB4) >> (8 * param as u32)) >> 2) as u8 & 3
    }

    // ($B6 KTAOF) coefficient table address offset
    pub fn coeff_table_offset(&self, param: usize) -> u32 {
        u32::from((self.reg(0xB6) >> (8 * param as u32)) & 7)
    }

    // ($B8/$BA OVPNRA/OVPNRB) screen-over pattern names
    pub fn rbg_over_pattern(&self, param: usize) -> u16 {
        self.reg(0xB8 + 2 * param as u32)
    }

    // ($BC/$BE RPTA) rotation parameter table address
    pub fn rotation_table_address(&self) -> u32 {
        ((u32::from(self.reg(0xBC) & 7) << 16) | u32::from(self.reg(0xBE))) & !1
    }

    // ($C0-$CC WPSX0-WPEY1) window positions
    pub fn window_rect(&self, window: usize) -> (u16, u16, u16, u16) {
        let base = 0xC0 + 8 * window as u32;
        let sx = (self.reg(base) >> 1) & 0x1FF;
        let sy = self.reg(base + 2) & 0x1FF;
        let ex = (self.reg(base + 4) >> 1) & 0x1FF;
        let ey = self.reg(base + 6) & 0x1FF;
        (sx, sy, ex, ey)
    }

    // ($D0-$D6 WCTLA-WCTLD) window control
    //
    // Each background gets one byte: bit 1 = window 0 enable, bit 0 = window 0 inside/outside,
    // bits 3-2 = window 1, bit 5 = sprite window enable, bit 7 = AND combination
    pub fn window_control(&self, layer: usize) -> u16 {
        let word = self.reg(0xD0 + 2 * (layer as u32 / 2));
        word >> (8 * (layer as u32 & 1))
    }

    // ($D8-$DE LWTA0/LWTA1) line window table addresses
    pub fn line_window_table(&self, window: usize) -> Option<u32> {
        let base = 0xD8 + 4 * window as u32;
        let high = self.reg(base);
        high.bit(15)
            .then(|| ((u32::from(high & 7) << 16) | u32::from(self.reg(base + 2))) & !1)
    }

    // ($E0 SPCTL) sprite control
    pub fn sprite_type(&self) -> u8 {
        self.reg(0xE0) as u8 & 0xF
    }

    pub fn sprite_color_mode(&self) -> bool {
        self.reg(0xE0).bit(5)
    }

    pub fn sprite_window_enabled(&self) -> bool {
        self.reg(0xE0).bit(4)
    }

    pub fn sprite_cc_condition(&self) -> u8 {
        (self.reg(0xE0) >> 12) as u8 & 3
    }

    pub fn sprite_cc_number(&self) -> u8 {
        (self.reg(0xE0) >> 8) as u8 & 7
    }

    // ($E2 SDCTL) shadow control
    pub fn shadow_enabled(&self, layer: usize) -> bool {
        self.reg(0xE2).bit(layer as u8)
    }

    pub fn transparent_shadow(&self) -> bool {
        self.reg(0xE2).bit(8)
    }

    // ($E4 CRAOFA / $E6 CRAOFB) color RAM address offsets, 3 bits per layer; NBG0-3 in CRAOFA,
    // RBG0 and the sprite layer in CRAOFB
    pub fn bg_cram_offset(&self, bg: usize) -> u32 {
        let bits = if bg < 4 { self.reg(0xE4) >> (4 * bg as u32) } else { self.reg(0xE6) };
        u32::from(bits & 7) << 8
    }

    pub fn sprite_cram_offset(&self) -> u32 {
        u32::from((self.reg(0xE6) >> 4) & 7) << 8
    }

    // ($E8 LNCLEN) line color screen enable per layer
    pub fn line_color_enabled(&self, layer: usize) -> bool {
        self.reg(0xE8).bit(layer as u8)
    }

    // ($EC CCCTL) color calculation control
    pub fn cc_enabled(&self, layer: usize) -> bool {
        self.reg(0xEC).bit(layer as u8)
    }

    pub fn sprite_cc_enabled(&self) -> bool {
        self.reg(0xEC).bit(6)
    }

    pub fn cc_additive(&self) -> bool {
        self.reg(0xEC).bit(8)
    }

    pub fn cc_ratio_from_second(&self) -> bool {
        self.reg(0xEC).bit(9)
    }

    pub fn cc_extended(&self) -> bool {
        self.reg(0xEC).bit(10)
    }

    // ($F0-$F6 PRISA-PRISD) sprite register priorities
    pub fn sprite_priority(&self, register: usize) -> u8 {
        (self.reg(0xF0 + 2 * (register as u32 / 2)) >> (8 * (register as u32 & 1))) as u8 & 7
    }

    // ($F8 PRINA / $FA PRINB / $FC PRIR) background priorities
    pub fn bg_priority(&self, bg: usize) -> u8 {
        let word = match bg {
            0 | 1 => self.reg(0xF8),
            2 | 3 => self.reg(0xFA),
            _ => self.reg(0xFC),
        };
        (word >> (8 * (bg as u32 & 1))) as u8 & 7
    }

    // ($100-$106 CCRSA-CCRSD) sprite color calculation ratios
    pub fn sprite_cc_ratio(&self, register: usize) -> u8 {
        (self.reg(0x100 + 2 * (register as u32 / 2)) >> (8 * (register as u32 & 1))) as u8 & 0x1F
    }

    // ($108 CCRNA / $10A CCRNB / $10C CCRR) background color calculation ratios
    pub fn bg_cc_ratio(&self, bg: usize) -> u8 {
        let word = match bg {
            0 | 1 => self.reg(0x108),
            2 | 3 => self.reg(0x10A),
            _ => self.reg(0x10C),
        };
        (word >> (8 * (bg as u32 & 1))) as u8 & 0x1F
    }

    // ($10E CCRLB) line color / back screen ratios
    pub fn line_color_cc_ratio(&self) -> u8 {
        self.reg(0x10E) as u8 & 0x1F
    }

    pub fn back_cc_ratio(&self) -> u8 {
        (self.reg(0x10E) >> 8) as u8 & 0x1F
    }

    // ($110 CLOFEN / $112 CLOFSL) color offset enable and select
    pub fn color_offset_enabled(&self, layer: usize) -> bool {
        self.reg(0x110).bit(layer as u8)
    }

    pub fn color_offset_b(&self, layer: usize) -> bool {
        self.reg(0x112).bit(layer as u8)
    }

    // ($114-$11E COAR-COBB) color offset values, 9-bit signed
    pub fn color_offset(&self, use_b: bool) -> (i16, i16, i16) {
        let base = if use_b { 0x11A } else { 0x114 };
        (
            sign_extend_9(self.reg(base)),
            sign_extend_9(self.reg(base + 2)),
            sign_extend_9(self.reg(base + 4)),
        )
    }

    /// Gather the full configuration of one normal background
    pub fn nbg_config(&self, bg: usize) -> NbgConfig {
        NbgConfig {
            enabled: self.bg_enabled(bg),
            transparency_disabled: self.bg_transparency_disabled(bg),
            char_2x2: self.bg_char_2x2(bg),
            bitmap: self.bg_bitmap(bg),
            bitmap_size: self.bg_bitmap_size(bg),
            color_format: self.bg_color_format(bg),
            one_word_chars: self.bg_one_word_chars(bg),
            supp_char_num: self.bg_supp_char_num(bg),
            supp_palette: self.bg_supp_palette(bg),
            supp_flags_in_char: !self.bg_char_num_12bit(bg),
            plane_size: self.bg_plane_size(bg),
            map_offset: self.bg_map_offset(bg),
            map_planes: self.bg_map_planes(bg),
            priority: self.bg_priority(bg),
        }
    }
}

impl Default for Vdp2Registers {
    fn default() -> Self {
        Self::new()
    }
}

fn zoom_step(int: u16, frac: u16) -> u32 {
    // 8.8 fixed point; zero is treated as 1.0 to avoid a stuck layer
    let step = ((u32::from(int & 7) << 8) | u32::from(frac >> 8)) & 0x7FF;
    if step == 0 { 0x100 } else { step }
}

fn sign_extend_9(value: u16) -> i16 {
    ((value as i16) << 7) >> 7
}
