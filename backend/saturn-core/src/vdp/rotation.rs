//! Rotation background parameter evaluation
//!
//! RBG0/RBG1 sample their source with an affine transform whose inputs live in a parameter
//! table in VRAM: screen start coordinates and their per-line/per-pixel deltas, the 2x3 rotation
//! matrix, the view/center points, and scale coefficients. The scale (and optionally more) can
//! be replaced per pixel from a coefficient table in VRAM or CRAM.
//!
//! All arithmetic is 16.16 fixed point; table fields are converted on read.

use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

/// One rotation parameter set, converted to 16.16 fixed point
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationParams {
    pub xst: i64,
    pub yst: i64,
    pub zst: i64,
    pub dxst: i64,
    pub dyst: i64,
    pub dx: i64,
    pub dy: i64,
    /// Rotation matrix A-F
    pub a: i64,
    pub b: i64,
    pub c: i64,
    pub d: i64,
    pub e: i64,
    pub f: i64,
    pub px: i64,
    pub py: i64,
    pub pz: i64,
    pub cx: i64,
    pub cy: i64,
    pub cz: i64,
    pub mx: i64,
    pub my: i64,
    pub kx: i64,
    pub ky: i64,
    /// Coefficient table start address, 16.10 fixed in units of the entry size
    pub kast: u32,
    pub dkast: i32,
    pub dkax: i32,
}

/// Per-frame accumulator state for one parameter set, retained across lines and serialized in
/// save states
#[derive(Debug, Clone, Encode, Decode)]
pub struct RotationParamState {
    pub page_base_addresses: [u32; 16],
    pub xst: i64,
    pub yst: i64,
    pub ka: u32,
}

impl RotationParamState {
    pub fn new() -> Self {
        Self { page_base_addresses: [0; 16], xst: 0, yst: 0, ka: 0 }
    }
}

impl Default for RotationParamState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenOverMode {
    /// Outside coordinates wrap back into the map
    Repeat,
    /// Outside coordinates render the over pattern name
    OverPattern,
    /// Transparent outside the 512-cell plane area
    Transparent,
    /// Transparent outside a fixed 512x512 pixel area
    Fixed512,
}

impl ScreenOverMode {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Repeat,
            1 => Self::OverPattern,
            2 => Self::Transparent,
            _ => Self::Fixed512,
        }
    }
}

/// Result of a per-pixel coefficient table fetch
#[derive(Debug, Clone, Copy)]
pub struct Coefficient {
    pub value: i64,
    pub transparent: bool,
    pub line_color: u8,
}

fn read_s32(data: &[u8], address: u32) -> i32 {
    let address = (address as usize) & (data.len() - 1) & !3;
    i32::from_be_bytes(data[address..address + 4].try_into().unwrap())
}

fn read_u16(data: &[u8], address: u32) -> u16 {
    let address = (address as usize) & (data.len() - 1) & !1;
    u16::from_be_bytes(data[address..address + 2].try_into().unwrap())
}

// Sign-extend a fixed-point table field and rescale it to 16.16
fn fixed(raw: i32, int_bits: u32, frac_bits: u32) -> i64 {
    let total = int_bits + frac_bits;
    let shifted = (raw << (32 - total)) >> (32 - total);
    i64::from(shifted) << (16 - frac_bits)
}

/// Read one rotation parameter table (0x80 bytes per set) from VDP2 VRAM
pub fn read_rotation_params(vram: &[u8], table_address: u32, param: usize) -> RotationParams {
    let base = table_address + 0x80 * param as u32;

    RotationParams {
        // Screen start coordinates: signed 13.10
        xst: fixed(read_s32(vram, base), 13, 10),
        yst: fixed(read_s32(vram, base + 0x04), 13, 10),
        zst: fixed(read_s32(vram, base + 0x08), 13, 10),
        // Per-line deltas: signed 3.10
        dxst: fixed(read_s32(vram, base + 0x0C), 3, 10),
        dyst: fixed(read_s32(vram, base + 0x10), 3, 10),
        // Per-pixel deltas: signed 3.10
        dx: fixed(read_s32(vram, base + 0x14), 3, 10),
        dy: fixed(read_s32(vram, base + 0x18), 3, 10),
        // Matrix parameters: signed 4.10
        a: fixed(read_s32(vram, base + 0x1C), 4, 10),
        b: fixed(read_s32(vram, base + 0x20), 4, 10),
        c: fixed(read_s32(vram, base + 0x24), 4, 10),
        d: fixed(read_s32(vram, base + 0x28), 4, 10),
        e: fixed(read_s32(vram, base + 0x2C), 4, 10),
        f: fixed(read_s32(vram, base + 0x30), 4, 10),
        // View point: signed 14-bit integers
        px: i64::from((read_u16(vram, base + 0x34) as i16) << 2 >> 2) << 16,
        py: i64::from((read_u16(vram, base + 0x36) as i16) << 2 >> 2) << 16,
        pz: i64::from((read_u16(vram, base + 0x38) as i16) << 2 >> 2) << 16,
        // Center point
        cx: i64::from((read_u16(vram, base + 0x3C) as i16) << 2 >> 2) << 16,
        cy: i64::from((read_u16(vram, base + 0x3E) as i16) << 2 >> 2) << 16,
        cz: i64::from((read_u16(vram, base + 0x40) as i16) << 2 >> 2) << 16,
        // Parallel movement: signed 14.10
        mx: fixed(read_s32(vram, base + 0x44), 14, 10),
        my: fixed(read_s32(vram, base + 0x48), 14, 10),
        // Scale coefficients: signed 8.16
        kx: i64::from(read_s32(vram, base + 0x4C) << 8 >> 8),
        ky: i64::from(read_s32(vram, base + 0x50) << 8 >> 8),
        // Coefficient table start and deltas: 16.10
        kast: read_s32(vram, base + 0x54) as u32,
        dkast: read_s32(vram, base + 0x58),
        dkax: read_s32(vram, base + 0x5C),
    }
}

impl RotationParams {
    /// Constant screen-space part of the transform
    pub fn view_offset(&self) -> (i64, i64) {
        let xp = mul_fixed(self.a, self.px - self.cx)
            + mul_fixed(self.b, self.py - self.cy)
            + mul_fixed(self.c, self.pz - self.cz)
            + self.cx
            + self.mx;
        let yp = mul_fixed(self.d, self.px - self.cx)
            + mul_fixed(self.e, self.py - self.cy)
            + mul_fixed(self.f, self.pz - self.cz)
            + self.cy
            + self.my;
        (xp, yp)
    }

    /// Rotated coordinate before scaling for a screen-start coordinate pair
    pub fn rotate(&self, xs: i64, ys: i64) -> (i64, i64) {
        let xsp = mul_fixed(self.a, xs - self.px)
            + mul_fixed(self.b, ys - self.py)
            + mul_fixed(self.c, self.zst - self.pz);
        let ysp = mul_fixed(self.d, xs - self.px)
            + mul_fixed(self.e, ys - self.py)
            + mul_fixed(self.f, self.zst - self.pz);
        (xsp, ysp)
    }
}

#[inline]
pub fn mul_fixed(a: i64, b: i64) -> i64 {
    (a * b) >> 16
}

/// Fetch one coefficient table entry.
///
/// `word_size` selects 2-byte entries (1.5.10 coefficient) over 4-byte entries (sign + 7-bit
/// line color + 8.16 coefficient). `ka` is the 16.10 fixed entry index.
pub fn read_coefficient(data: &[u8], base: u32, ka: u32, word_size: bool) -> Coefficient {
    let index = ka >> 10;
    if word_size {
        let raw = read_u16(data, base + 2 * index);
        let value = i64::from((raw as i16) << 1 >> 1) << 6;
        Coefficient { value, transparent: raw.bit(15), line_color: 0 }
    } else {
        let raw = read_s32(data, base + 4 * index);
        let value = i64::from(raw << 8 >> 8);
        Coefficient {
            value,
            transparent: raw.bit(31),
            line_color: ((raw >> 24) & 0x7F) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matrix_maps_screen_to_source() {
        let mut vram = vec![0u8; 0x1000];

        // A = E = 1.0 (4.10 fixed), kx = ky = 1.0 (8.16)
        let one_410: i32 = 1 << 10;
        let one_816: i32 = 1 << 16;
        vram[0x1C..0x20].copy_from_slice(&one_410.to_be_bytes());
        vram[0x2C..0x30].copy_from_slice(&one_410.to_be_bytes());
        vram[0x4C..0x50].copy_from_slice(&one_816.to_be_bytes());
        vram[0x50..0x54].copy_from_slice(&one_816.to_be_bytes());

        // Xst = 64.0, Yst = 32.0 (13.10 fixed)
        vram[0x00..0x04].copy_from_slice(&(64i32 << 10).to_be_bytes());
        vram[0x04..0x08].copy_from_slice(&(32i32 << 10).to_be_bytes());
        // Per-pixel delta dX = 1.0
        vram[0x14..0x18].copy_from_slice(&(1i32 << 10).to_be_bytes());

        let params = read_rotation_params(&vram, 0, 0);
        assert_eq!(params.a, 1 << 16);
        assert_eq!(params.e, 1 << 16);
        assert_eq!(params.xst, 64 << 16);

        let (xp, yp) = params.view_offset();
        assert_eq!((xp, yp), (0, 0));

        // Pixel 10 on line 0 lands at source (74, 32)
        let (xsp, ysp) = params.rotate(params.xst + 10 * params.dx, params.yst);
        let x = mul_fixed(params.kx, xsp) + xp;
        let y = mul_fixed(params.ky, ysp) + yp;
        assert_eq!(x >> 16, 74);
        assert_eq!(y >> 16, 32);
    }

    #[test]
    fn coefficient_entries_decode_both_sizes() {
        let mut data = vec![0u8; 0x100];

        // 4-byte entry 1: transparent bit + coefficient 2.0
        let entry: u32 = (1 << 31) | (2 << 16);
        data[4..8].copy_from_slice(&entry.to_be_bytes());
        let coeff = read_coefficient(&data, 0, 1 << 10, false);
        assert!(coeff.transparent);
        assert_eq!(coeff.value, 2 << 16);

        // 2-byte entry 2: coefficient -1.0 in 5.10
        let raw: u16 = (-(1 << 10i16)) as u16 & 0x7FFF;
        data[4..6].copy_from_slice(&raw.to_be_bytes());
        let coeff = read_coefficient(&data, 0, 2 << 10, true);
        assert!(!coeff.transparent);
        assert_eq!(coeff.value, -(1 << 16));
    }
}
