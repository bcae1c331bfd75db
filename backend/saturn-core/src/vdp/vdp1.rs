//! VDP1 command processor
//!
//! VDP1 walks a table of 32-byte commands in its VRAM, rasterizing sprites, polygons, and lines
//! into the current draw framebuffer. Processing is budgeted: each scheduler slice grants a
//! number of cycles, commands bill their overhead and every plotted pixel against it, and the
//! walk suspends mid-table when the budget runs out.

use crate::vdp::{Vdp, VDP1_FB_LEN};
use bincode::{Decode, Encode};
use jsaturn_common::num::GetBit;

// Rough per-command overhead in cycles; texture and pixel costs are billed separately
const COMMAND_OVERHEAD_CYCLES: u64 = 70;

// Command lists are at most 512 KiB / 32 bytes long; anything deeper is a malformed loop
const MAX_COMMANDS_PER_FRAME: u32 = 0x4000;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp1RenderState {
    pub sys_clip_h: u16,
    pub sys_clip_v: u16,
    pub user_clip_x0: u16,
    pub user_clip_y0: u16,
    pub user_clip_x1: u16,
    pub user_clip_y1: u16,
    pub local_x: i32,
    pub local_y: i32,
    pub rendering: bool,
    pub start_requested: bool,
    pub command_address: u32,
    /// Return address for JumpCall/JumpReturn; `u32::MAX` when no call is outstanding
    pub return_address: u32,
    pub cycles_spent: u64,
    pub frame_ended: bool,
    pub display_erase_active: bool,
    pub erase_value: u16,
    pub erase_rect: (u16, u16, u16, u16),
    /// Commands processed this frame, as a runaway-list guard
    commands_processed: u32,
}

impl Vdp1RenderState {
    pub fn new() -> Self {
        Self {
            sys_clip_h: 320,
            sys_clip_v: 224,
            user_clip_x0: 0,
            user_clip_y0: 0,
            user_clip_x1: 0,
            user_clip_y1: 0,
            local_x: 0,
            local_y: 0,
            rendering: false,
            start_requested: false,
            command_address: 0,
            return_address: u32::MAX,
            cycles_spent: 0,
            frame_ended: false,
            display_erase_active: false,
            erase_value: 0,
            erase_rect: (0, 0, 511, 255),
            commands_processed: 0,
        }
    }
}

impl Default for Vdp1RenderState {
    fn default() -> Self {
        Self::new()
    }
}

struct CommandWords {
    ctrl: u16,
    link: u16,
    pmod: u16,
    colr: u16,
    srca: u16,
    size: u16,
    vertices: [(i32, i32); 4],
    grda: u16,
}

#[derive(Clone, Copy)]
struct DrawParams {
    color_mode: u16,
    draw_mode: u16,
    mesh: bool,
    end_code_disabled: bool,
    transparent_pixel_disabled: bool,
    high_speed_shrink: bool,
    color_bank: u16,
    texture_address: u32,
    texture_w: u32,
    texture_h: u32,
    gouraud_table: u32,
    gouraud: bool,
}

impl Vdp {
    /// Process commands until the table ends or `budget` cycles are spent. Returns true when
    /// the list terminated (End command or runaway guard).
    pub(crate) fn process_vdp1_commands(&mut self, budget: u64) -> bool {
        let mut used: u64 = 0;

        while used < budget {
            let address = self.vdp1.command_address & 0x7FFF8;
            let words = self.read_command(address);

            // END bit terminates processing for the frame
            if words.ctrl.bit(15) {
                self.regs1.lopr = (address >> 3) as u16;
                self.regs1.copr = (address >> 3) as u16;
                self.vdp1.commands_processed = 0;
                self.vdp1.cycles_spent += used;
                log::trace!("VDP1 command list ended at {address:05X}");
                return true;
            }

            self.vdp1.commands_processed += 1;
            if self.vdp1.commands_processed >= MAX_COMMANDS_PER_FRAME {
                log::debug!("VDP1 command list runaway; terminating frame");
                self.vdp1.commands_processed = 0;
                self.vdp1.cycles_spent += used;
                return true;
            }

            self.regs1.copr = (address >> 3) as u16;

            let jump_mode = (words.ctrl >> 12) & 7;
            let skip = jump_mode >= 4;

            if !skip {
                used += COMMAND_OVERHEAD_CYCLES;
                used += self.execute_draw_command(&words);
            }

            // Advance per the jump mode: next, assign, call, return
            self.vdp1.command_address = match jump_mode & 3 {
                0 => address.wrapping_add(0x20),
                1 => u32::from(words.link) << 3,
                2 => {
                    self.vdp1.return_address = address.wrapping_add(0x20);
                    u32::from(words.link) << 3
                }
                _ => {
                    let ret = self.vdp1.return_address;
                    self.vdp1.return_address = u32::MAX;
                    if ret == u32::MAX { address.wrapping_add(0x20) } else { ret }
                }
            };
        }

        self.vdp1.cycles_spent += used;
        false
    }

    fn read_command(&self, address: u32) -> CommandWords {
        let word = |offset: u32| self.vdp1_read_vram_word(address + offset);
        let vertex = |offset: u32| {
            (i32::from(word(offset) as i16), i32::from(word(offset + 2) as i16))
        };

        CommandWords {
            ctrl: word(0x00),
            link: word(0x02),
            pmod: word(0x04),
            colr: word(0x06),
            srca: word(0x08),
            size: word(0x0A),
            vertices: [vertex(0x0C), vertex(0x10), vertex(0x14), vertex(0x18)],
            grda: word(0x1C),
        }
    }

    /// Execute one drawing/state command; returns the pixel cycle cost
    fn execute_draw_command(&mut self, words: &CommandWords) -> u64 {
        match words.ctrl & 0xF {
            // NormalSprite
            0x0 => {
                let (w, h) = command_texture_size(words.size);
                let (ax, ay) = words.vertices[0];
                let quad = [
                    (ax, ay),
                    (ax + w as i32 - 1, ay),
                    (ax + w as i32 - 1, ay + h as i32 - 1),
                    (ax, ay + h as i32 - 1),
                ];
                self.draw_quad(words, quad, true)
            }
            // ScaledSprite
            0x1 => {
                let quad = scaled_sprite_quad(words);
                self.draw_quad(words, quad, true)
            }
            // DistortedSprite (and its undocumented alias)
            0x2 | 0x3 => self.draw_quad(words, words.vertices, true),
            // Polygon
            0x4 => self.draw_quad(words, words.vertices, false),
            // Polylines
            0x5 => {
                let mut cost = 0;
                for i in 0..4 {
                    cost += self.draw_line_segment(
                        words,
                        words.vertices[i],
                        words.vertices[(i + 1) % 4],
                        i as u32,
                    );
                }
                cost
            }
            // Line
            0x6 => self.draw_line_segment(words, words.vertices[0], words.vertices[1], 0),
            // SetUserClipping
            0x8 => {
                self.vdp1.user_clip_x0 = words.vertices[0].0 as u16 & 0x3FF;
                self.vdp1.user_clip_y0 = words.vertices[0].1 as u16 & 0x1FF;
                self.vdp1.user_clip_x1 = words.vertices[2].0 as u16 & 0x3FF;
                self.vdp1.user_clip_y1 = words.vertices[2].1 as u16 & 0x1FF;
                0
            }
            // SetSystemClipping
            0x9 => {
                self.vdp1.sys_clip_h = words.vertices[2].0 as u16 & 0x3FF;
                self.vdp1.sys_clip_v = words.vertices[2].1 as u16 & 0x1FF;
                0
            }
            // SetLocalCoordinates
            0xA => {
                self.vdp1.local_x = words.vertices[0].0;
                self.vdp1.local_y = words.vertices[0].1;
                0
            }
            opcode => {
                // The hardware tolerates ill-formed tables; unknown opcodes are skipped
                log::debug!("Unknown VDP1 command {opcode:X}; skipped");
                0
            }
        }
    }

    fn draw_params(&self, words: &CommandWords, textured: bool) -> DrawParams {
        let (texture_w, texture_h) = command_texture_size(words.size);
        DrawParams {
            color_mode: (words.pmod >> 3) & 7,
            draw_mode: words.pmod & 7,
            mesh: words.pmod.bit(8),
            end_code_disabled: words.pmod.bit(7),
            transparent_pixel_disabled: words.pmod.bit(6),
            high_speed_shrink: words.pmod.bit(12),
            color_bank: words.colr,
            texture_address: u32::from(words.srca) << 3,
            texture_w,
            texture_h,
            gouraud_table: u32::from(words.grda) << 3,
            gouraud: textured_gouraud(words.pmod) || (!textured && words.pmod & 7 == 4),
        }
    }

    /// Draw a textured or flat quad by walking the A->D and B->C edges and rasterizing the
    /// spans between them with an integer DDA.
    fn draw_quad(&mut self, words: &CommandWords, quad: [(i32, i32); 4], textured: bool) -> u64 {
        let params = self.draw_params(words, textured);

        let offset_quad =
            quad.map(|(x, y)| (x + self.vdp1.local_x, y + self.vdp1.local_y));

        if self.quad_fully_clipped(&offset_quad) {
            return 0;
        }

        let gouraud = self.read_gouraud_table(&params);

        let [a, b, c, d] = offset_quad;
        // Flips apply by reversing texture axes
        let flip_h = words.ctrl.bit(4);
        let flip_v = words.ctrl.bit(5);

        let left_steps = (d.0 - a.0).abs().max((d.1 - a.1).abs());
        let right_steps = (c.0 - b.0).abs().max((c.1 - b.1).abs());
        let steps = left_steps.max(right_steps).max(1) as u32;

        let mut cost: u64 = 0;

        for t in 0..=steps {
            let p = lerp_point(a, d, t, steps);
            let q = lerp_point(b, c, t, steps);

            let mut v = if textured && params.texture_h > 1 {
                (t * (params.texture_h - 1)) / steps
            } else {
                0
            };
            if flip_v && textured {
                v = params.texture_h - 1 - v;
            }

            let g_left = lerp_gouraud(gouraud[0], gouraud[3], t, steps);
            let g_right = lerp_gouraud(gouraud[1], gouraud[2], t, steps);

            cost += self.draw_textured_span(&params, p, q, v, textured, flip_h, g_left, g_right);
        }

        cost
    }

    /// One edge of a polyline, reusing the texture span plotter in flat mode
    fn draw_line_segment(
        &mut self,
        words: &CommandWords,
        from: (i32, i32),
        to: (i32, i32),
        edge: u32,
    ) -> u64 {
        let params = self.draw_params(words, false);
        let gouraud = self.read_gouraud_table(&params);

        let p = (from.0 + self.vdp1.local_x, from.1 + self.vdp1.local_y);
        let q = (to.0 + self.vdp1.local_x, to.1 + self.vdp1.local_y);

        let g_from = gouraud[(edge as usize) % 4];
        let g_to = gouraud[(edge as usize + 1) % 4];

        self.draw_textured_span(&params, p, q, 0, false, false, g_from, g_to)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_textured_span(
        &mut self,
        params: &DrawParams,
        p: (i32, i32),
        q: (i32, i32),
        v: u32,
        textured: bool,
        flip_h: bool,
        g_left: (i32, i32, i32),
        g_right: (i32, i32, i32),
    ) -> u64 {
        let steps = (q.0 - p.0).abs().max((q.1 - p.1).abs()).max(1) as u32;
        let mut cost: u64 = 0;
        let mut end_codes_seen = 0u32;

        // High-speed shrink samples every other texel
        let hss_step = if params.high_speed_shrink { 2 } else { 1 };

        for s in 0..=steps {
            let (x, y) = lerp_point(p, q, s, steps);

            let mut texel = params.color_bank;
            let mut transparent = false;
            let mut end_code = false;

            if textured {
                let mut u = if params.texture_w > 1 {
                    ((s * hss_step * (params.texture_w - 1)) / steps).min(params.texture_w - 1)
                } else {
                    0
                };
                if flip_h {
                    u = params.texture_w - 1 - u;
                }
                (texel, transparent, end_code) = self.fetch_texel(params, u, v);
                cost += 1;
            }

            if end_code && !params.end_code_disabled {
                end_codes_seen += 1;
                // Two end codes terminate the row; the end code texels themselves are skipped
                if end_codes_seen >= 2 {
                    break;
                }
                continue;
            }

            if transparent && !params.transparent_pixel_disabled {
                continue;
            }

            let gouraud = if params.gouraud {
                Some(lerp_gouraud(g_left, g_right, s, steps))
            } else {
                None
            };

            if self.plot_vdp1_pixel(x, y, texel, params, gouraud) {
                cost += 1;
            }
        }

        cost
    }

    /// Fetch one texel; returns (color value, transparent, end code)
    fn fetch_texel(&self, params: &DrawParams, u: u32, v: u32) -> (u16, bool, bool) {
        match params.color_mode {
            // 16-color bank
            0 => {
                let byte = self.vdp1_read_vram_byte(params.texture_address + v * params.texture_w / 2 + u / 2);
                let nibble = if u & 1 == 0 { byte >> 4 } else { byte & 0xF };
                (
                    params.color_bank.wrapping_add(nibble.into()),
                    nibble == 0,
                    nibble == 0xF,
                )
            }
            // 16-color lookup table
            1 => {
                let byte = self.vdp1_read_vram_byte(params.texture_address + v * params.texture_w / 2 + u / 2);
                let nibble = if u & 1 == 0 { byte >> 4 } else { byte & 0xF };
                let lut_base = u32::from(params.color_bank) << 3;
                let color = self.vdp1_read_vram_word(lut_base + u32::from(nibble) * 2);
                (color, nibble == 0, nibble == 0xF)
            }
            // 64/128/256-color banks
            2 | 3 | 4 => {
                let byte = self.vdp1_read_vram_byte(params.texture_address + v * params.texture_w + u);
                let mask = match params.color_mode {
                    2 => 0x3F,
                    3 => 0x7F,
                    _ => 0xFF,
                };
                (
                    params.color_bank.wrapping_add(u16::from(byte & mask)),
                    byte == 0,
                    byte == 0xFF,
                )
            }
            // RGB555
            _ => {
                let word = self.vdp1_read_vram_word(params.texture_address + (v * params.texture_w + u) * 2);
                (word, word == 0, word == 0x7FFF)
            }
        }
    }

    fn read_gouraud_table(&self, params: &DrawParams) -> [(i32, i32, i32); 4] {
        if !params.gouraud {
            return [(0, 0, 0); 4];
        }

        let mut table = [(0, 0, 0); 4];
        for (i, entry) in table.iter_mut().enumerate() {
            let word = self.vdp1_read_vram_word(params.gouraud_table + 2 * i as u32);
            *entry = (
                i32::from(word & 0x1F),
                i32::from((word >> 5) & 0x1F),
                i32::from((word >> 10) & 0x1F),
            );
        }
        table
    }

    fn quad_fully_clipped(&self, quad: &[(i32, i32); 4]) -> bool {
        let clip_w = i32::from(self.vdp1.sys_clip_h);
        let clip_h = i32::from(self.vdp1.sys_clip_v);
        quad.iter().all(|&(x, _)| x < 0)
            || quad.iter().all(|&(x, _)| x > clip_w)
            || quad.iter().all(|&(_, y)| y < 0)
            || quad.iter().all(|&(_, y)| y > clip_h)
    }

    /// Plot one pixel into the draw framebuffer, applying the draw mode. Returns true if a
    /// write happened.
    fn plot_vdp1_pixel(
        &mut self,
        x: i32,
        y: i32,
        texel: u16,
        params: &DrawParams,
        gouraud: Option<(i32, i32, i32)>,
    ) -> bool {
        if x < 0 || y < 0 || x > i32::from(self.vdp1.sys_clip_h) || y > i32::from(self.vdp1.sys_clip_v)
        {
            return false;
        }

        let offset = ((y as usize * 512 + x as usize) * 2) & (VDP1_FB_LEN - 1);

        // Mesh mode: checkerboard on hardware, or routed to the overlay buffer when the
        // transparent-mesh enhancement is active
        if params.mesh {
            if self.config.transparent_meshes {
                let value = apply_gouraud(texel, gouraud);
                let fb = self.draw_fb();
                self.mesh_fb[fb][offset..offset + 2].copy_from_slice(&value.to_be_bytes());
                return true;
            }
            if (x + y) & 1 != 0 {
                return false;
            }
        }

        let fb = self.draw_fb();
        let dst = u16::from_be_bytes([
            self.sprite_fb[fb][offset],
            self.sprite_fb[fb][offset + 1],
        ]);

        let value = match params.draw_mode {
            // Replace
            0 => apply_gouraud(texel, gouraud),
            // Shadow: halve the destination's RGB, keep its MSB
            1 => half_rgb555(dst) | (dst & 0x8000),
            // Half-luminance
            2 => half_rgb555(apply_gouraud(texel, gouraud)) | (texel & 0x8000),
            // Half-transparency: average with an opaque destination
            3 => {
                let src = apply_gouraud(texel, gouraud);
                if dst.bit(15) { average_rgb555(src, dst) | 0x8000 } else { src }
            }
            // Gouraud and the gouraud-combined modes
            _ => apply_gouraud(texel, gouraud),
        };

        self.sprite_fb[fb][offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        true
    }
}

fn command_texture_size(size: u16) -> (u32, u32) {
    let w = (u32::from(size >> 8) & 0x3F) * 8;
    let h = u32::from(size) & 0xFF;
    (w.max(1), h.max(1))
}

fn scaled_sprite_quad(words: &CommandWords) -> [(i32, i32); 4] {
    let zoom_point = (words.ctrl >> 8) & 0xF;
    let (ax, ay) = words.vertices[0];

    if zoom_point == 0 {
        // Two-point form: A is the upper-left corner, C the lower-right
        let (cx, cy) = words.vertices[2];
        return [(ax, ay), (cx, ay), (cx, cy), (ax, cy)];
    }

    // Zoom-point form: B holds the display dimensions, the zoom point selects the anchor
    let (w, h) = (words.vertices[1].0, words.vertices[1].1);
    let x0 = match (zoom_point - 1) % 3 {
        0 => ax,
        1 => ax - w / 2,
        _ => ax - w,
    };
    let y0 = match (zoom_point - 1) / 3 {
        0 => ay,
        1 => ay - h / 2,
        _ => ay - h,
    };
    [(x0, y0), (x0 + w, y0), (x0 + w, y0 + h), (x0, y0 + h)]
}

fn textured_gouraud(pmod: u16) -> bool {
    pmod & 7 >= 4
}

fn lerp_point(a: (i32, i32), b: (i32, i32), t: u32, steps: u32) -> (i32, i32) {
    let t = t as i32;
    let steps = steps as i32;
    (a.0 + (b.0 - a.0) * t / steps, a.1 + (b.1 - a.1) * t / steps)
}

fn lerp_gouraud(a: (i32, i32, i32), b: (i32, i32, i32), t: u32, steps: u32) -> (i32, i32, i32) {
    let t = t as i32;
    let steps = steps as i32;
    (
        a.0 + (b.0 - a.0) * t / steps,
        a.1 + (b.1 - a.1) * t / steps,
        a.2 + (b.2 - a.2) * t / steps,
    )
}

/// Per-channel signed gouraud offset around the midpoint of the 5-bit range
fn apply_gouraud(texel: u16, gouraud: Option<(i32, i32, i32)>) -> u16 {
    let Some((gr, gg, gb)) = gouraud else { return texel };

    let r = (i32::from(texel & 0x1F) + gr - 0x10).clamp(0, 31) as u16;
    let g = (i32::from((texel >> 5) & 0x1F) + gg - 0x10).clamp(0, 31) as u16;
    let b = (i32::from((texel >> 10) & 0x1F) + gb - 0x10).clamp(0, 31) as u16;
    (texel & 0x8000) | (b << 10) | (g << 5) | r
}

fn half_rgb555(value: u16) -> u16 {
    (value >> 1) & 0x3DEF
}

fn average_rgb555(a: u16, b: u16) -> u16 {
    let r = ((a & 0x1F) + (b & 0x1F)) / 2;
    let g = (((a >> 5) & 0x1F) + ((b >> 5) & 0x1F)) / 2;
    let bl = (((a >> 10) & 0x1F) + ((b >> 10) & 0x1F)) / 2;
    (bl << 10) | (g << 5) | r
}
