//! Render event queue and backend
//!
//! The hardware-simulation side never touches the renderer's mirror state directly; every
//! update crosses this queue. Write events are batched in a small staging buffer and flushed
//! when it fills or when a non-write event arrives, preserving total write order relative to
//! draw commands while keeping synchronization overhead down.
//!
//! With threaded rendering disabled, events execute synchronously on the caller's thread
//! against the same state type.

use crate::vdp::registers2::Vdp2Registers;
use crate::vdp::rotation::RotationParamState;
use crate::vdp::vdp2::{
    FrameParams, LineBackState, NbgLayerState, RenderState, VramFetcher, MAX_RES_H,
};
use crate::vdp::{VdpConfig, VDP1_FB_LEN, VDP2_CRAM_LEN, VDP2_VRAM_LEN};
use bincode::{Decode, Encode};
use jsaturn_common::boxedarray::BoxedByteArray;
use jsaturn_common::frontend::{Color, InterlaceMode};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Producer-side staging buffer size for write events
const WRITE_BATCH_LEN: usize = 64;

#[derive(Debug)]
pub enum RenderEvent {
    Reset,
    OddField(bool),
    Vdp1EraseFramebuffer {
        value: u16,
        rect: (u16, u16, u16, u16),
    },
    Vdp1SwapFramebuffer {
        display_fb: Box<[u8; VDP1_FB_LEN]>,
        mesh_fb: Option<Box<[u8; VDP1_FB_LEN]>>,
    },
    Vdp1BeginFrame,
    Vdp2BeginFrame(FrameParams),
    Vdp2UpdateEnabledBGs,
    Vdp2DrawLine(u16),
    Vdp2EndFrame,
    Vdp2VramWriteByte { address: u32, value: u8 },
    Vdp2VramWriteWord { address: u32, value: u16 },
    Vdp2CramWriteByte { address: u32, value: u8 },
    Vdp2CramWriteWord { address: u32, value: u16 },
    Vdp2RegWrite { address: u32, value: u16 },
    Vdp1StateSync {
        display_fb: Box<[u8; VDP1_FB_LEN]>,
    },
    PreSaveStateSync,
    PostLoadStateSync(Box<RendererSync>),
    UpdateEffectiveRenderingFlags {
        deinterlace: bool,
        transparent_meshes: bool,
    },
    Shutdown,
}

impl RenderEvent {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Vdp2VramWriteByte { .. }
                | Self::Vdp2VramWriteWord { .. }
                | Self::Vdp2CramWriteByte { .. }
                | Self::Vdp2CramWriteWord { .. }
                | Self::Vdp2RegWrite { .. }
        )
    }
}

/// Renderer-side state that participates in save states, exchanged through the sync events
#[derive(Debug, Clone, Encode, Decode)]
pub struct RendererSync {
    pub vram: BoxedByteArray<VDP2_VRAM_LEN>,
    pub cram: BoxedByteArray<VDP2_CRAM_LEN>,
    pub regs: Vdp2Registers,
    pub display_fb: BoxedByteArray<VDP1_FB_LEN>,
    pub mesh_fb: BoxedByteArray<VDP1_FB_LEN>,
    pub frame: FrameParams,
    pub nbg_state: [NbgLayerState; 4],
    pub rot_state: [RotationParamState; 2],
    pub fetchers: [VramFetcher; 6],
    pub line_back: LineBackState,
}

impl Default for RendererSync {
    fn default() -> Self {
        Self {
            vram: BoxedByteArray::new(),
            cram: BoxedByteArray::new(),
            regs: Vdp2Registers::new(),
            display_fb: BoxedByteArray::new(),
            mesh_fb: BoxedByteArray::new(),
            frame: FrameParams::default(),
            nbg_state: Default::default(),
            rot_state: Default::default(),
            fetchers: Default::default(),
            line_back: LineBackState::default(),
        }
    }
}

/// A finished frame handed back to the frontend between frames
#[derive(Debug, Clone)]
pub struct CompletedFrame {
    pub pixels: Vec<Color>,
    pub width: u32,
    pub height: u32,
    pub interlace: InterlaceMode,
}

impl RenderState {
    fn snapshot(&self) -> Box<RendererSync> {
        let mut sync = Box::<RendererSync>::default();
        sync.vram.copy_from_slice(&self.vram[..]);
        sync.cram.copy_from_slice(&self.cram[..]);
        sync.regs = self.regs.clone();
        sync.display_fb.copy_from_slice(&self.display_fb[..]);
        sync.mesh_fb.copy_from_slice(&self.mesh_fb[..]);
        sync.frame = self.frame;
        sync.nbg_state = self.nbg_state.clone();
        sync.rot_state = self.rot_state.clone();
        sync.fetchers = self.fetchers.clone();
        sync.line_back = self.line_back;
        sync
    }

    fn restore(&mut self, sync: &RendererSync) {
        self.vram.copy_from_slice(&sync.vram[..]);
        self.cram.copy_from_slice(&sync.cram[..]);
        self.regs = sync.regs.clone();
        self.display_fb.copy_from_slice(&sync.display_fb[..]);
        self.mesh_fb.copy_from_slice(&sync.mesh_fb[..]);
        self.frame = sync.frame;
        self.nbg_state = sync.nbg_state.clone();
        self.rot_state = sync.rot_state.clone();
        self.fetchers = sync.fetchers.clone();
        self.line_back = sync.line_back;

        // CRAM contents changed wholesale; rebuild the decoded cache and the layer enables
        self.write_reg(0x0E, sync.regs.read(0x0E));
        for address in (0..VDP2_CRAM_LEN as u32).step_by(2) {
            let value = u16::from_be_bytes([
                self.cram[address as usize],
                self.cram[address as usize + 1],
            ]);
            self.write_cram_word(address, value);
        }
        self.update_enabled_bgs();
    }

    fn completed_frame(&self) -> CompletedFrame {
        let (width, height) = self.frame_size();
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for row in 0..height as usize {
            let start = row * MAX_RES_H;
            pixels.extend_from_slice(&self.framebuffer[start..start + width as usize]);
        }
        CompletedFrame { pixels, width, height, interlace: self.frame.interlace }
    }
}

/// Apply one event to the renderer state. Returns a completed frame on `Vdp2EndFrame`.
fn apply_event(state: &mut RenderState, event: RenderEvent) -> Option<CompletedFrame> {
    match event {
        RenderEvent::Reset => state.reset(),
        RenderEvent::OddField(odd) => state.frame.odd_field = odd,
        RenderEvent::Vdp1EraseFramebuffer { value, rect } => {
            let (x1, y1, x3, y3) = rect;
            let bytes = value.to_be_bytes();
            for y in y1..=y3 {
                for x in x1..=x3 {
                    let offset = ((usize::from(y) * 512 + usize::from(x)) * 2) & (VDP1_FB_LEN - 1);
                    state.display_fb[offset] = bytes[0];
                    state.display_fb[offset + 1] = bytes[1];
                }
            }
        }
        RenderEvent::Vdp1SwapFramebuffer { display_fb, mesh_fb } => {
            state.display_fb = display_fb;
            match mesh_fb {
                Some(mesh_fb) => state.mesh_fb = mesh_fb,
                None => state.mesh_fb.fill(0),
            }
        }
        RenderEvent::Vdp1BeginFrame => {}
        RenderEvent::Vdp2BeginFrame(params) => state.begin_frame(params),
        RenderEvent::Vdp2UpdateEnabledBGs => state.update_enabled_bgs(),
        RenderEvent::Vdp2DrawLine(y) => state.draw_line(y),
        RenderEvent::Vdp2EndFrame => return Some(state.completed_frame()),
        RenderEvent::Vdp2VramWriteByte { address, value } => state.write_vram_byte(address, value),
        RenderEvent::Vdp2VramWriteWord { address, value } => state.write_vram_word(address, value),
        RenderEvent::Vdp2CramWriteByte { address, value } => state.write_cram_byte(address, value),
        RenderEvent::Vdp2CramWriteWord { address, value } => state.write_cram_word(address, value),
        RenderEvent::Vdp2RegWrite { address, value } => state.write_reg(address, value),
        RenderEvent::Vdp1StateSync { display_fb } => state.display_fb = display_fb,
        RenderEvent::PostLoadStateSync(sync) => state.restore(&sync),
        RenderEvent::UpdateEffectiveRenderingFlags { deinterlace, transparent_meshes } => {
            state.deinterlace = deinterlace;
            state.transparent_meshes = transparent_meshes;
        }
        RenderEvent::PreSaveStateSync | RenderEvent::Shutdown => {
            unreachable!("sync/shutdown events are handled by the backend, not the state")
        }
    }
    None
}

pub enum RenderBackend {
    Sync { state: Box<RenderState>, frame: Option<CompletedFrame> },
    Threaded(RenderThread),
}

pub struct RenderThread {
    batch: Vec<RenderEvent>,
    tx: Sender<Vec<RenderEvent>>,
    sync_rx: Receiver<Box<RendererSync>>,
    frame: Arc<Mutex<Option<CompletedFrame>>>,
    handle: Option<JoinHandle<()>>,
}

impl RenderBackend {
    pub fn new(config: &VdpConfig) -> Self {
        let mut state = Box::new(RenderState::new());
        state.deinterlace = config.deinterlace;
        state.transparent_meshes = config.transparent_meshes;

        if !config.threaded_rendering {
            return Self::Sync { state, frame: None };
        }

        let (tx, rx) = mpsc::channel::<Vec<RenderEvent>>();
        let (sync_tx, sync_rx) = mpsc::channel();
        let frame = Arc::new(Mutex::new(None));
        let frame_out = Arc::clone(&frame);

        let handle = thread::Builder::new()
            .name("vdp-render".into())
            .spawn(move || render_thread_main(state, &rx, &sync_tx, &frame_out))
            .expect("failed to spawn VDP render thread");

        Self::Threaded(RenderThread { batch: Vec::with_capacity(WRITE_BATCH_LEN), tx, sync_rx, frame, handle: Some(handle) })
    }

    /// Send a non-write event; flushes any batched writes first to preserve ordering
    pub fn send(&mut self, event: RenderEvent) {
        match self {
            Self::Sync { state, frame } => {
                if let Some(completed) = apply_event(state, event) {
                    *frame = Some(completed);
                }
            }
            Self::Threaded(thread) => {
                thread.flush();
                let _ = thread.tx.send(vec![event]);
            }
        }
    }

    /// Send a write-through event; these batch up to the staging buffer size
    pub fn send_write(&mut self, event: RenderEvent) {
        debug_assert!(event.is_write());
        match self {
            Self::Sync { state, .. } => {
                apply_event(state, event);
            }
            Self::Threaded(thread) => {
                thread.batch.push(event);
                if thread.batch.len() >= WRITE_BATCH_LEN {
                    thread.flush();
                }
            }
        }
    }

    pub fn take_completed_frame(&mut self) -> Option<CompletedFrame> {
        match self {
            Self::Sync { frame, .. } => frame.take(),
            Self::Threaded(thread) => thread.frame.lock().unwrap().take(),
        }
    }

    /// Drain the renderer and snapshot its save-state mirror. Blocks until the renderer has
    /// caught up with everything enqueued before the call.
    pub fn pre_save_sync(&mut self) -> Box<RendererSync> {
        match self {
            Self::Sync { state, .. } => state.snapshot(),
            Self::Threaded(thread) => {
                thread.flush();
                let _ = thread.tx.send(vec![RenderEvent::PreSaveStateSync]);
                thread.sync_rx.recv().unwrap_or_else(|_| {
                    // The channel only disconnects if the render thread shut down; don't leave
                    // the caller blocked
                    log::warn!("Render thread gone during save-state sync");
                    Box::default()
                })
            }
        }
    }

    pub fn post_load_sync(&mut self, sync: Box<RendererSync>) {
        match self {
            Self::Sync { state, .. } => state.restore(&sync),
            Self::Threaded(thread) => {
                thread.flush();
                let _ = thread.tx.send(vec![RenderEvent::PostLoadStateSync(sync)]);
            }
        }
    }
}

impl RenderThread {
    fn flush(&mut self) {
        if !self.batch.is_empty() {
            let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(WRITE_BATCH_LEN));
            let _ = self.tx.send(batch);
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.flush();
        let _ = self.tx.send(vec![RenderEvent::Shutdown]);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn render_thread_main(
    mut state: Box<RenderState>,
    rx: &Receiver<Vec<RenderEvent>>,
    sync_tx: &Sender<Box<RendererSync>>,
    frame_out: &Mutex<Option<CompletedFrame>>,
) {
    // Blocks on an empty queue until a producer posts or a Shutdown event arrives
    while let Ok(batch) = rx.recv() {
        for event in batch {
            match event {
                RenderEvent::Shutdown => {
                    log::debug!("VDP render thread shutting down");
                    return;
                }
                RenderEvent::PreSaveStateSync => {
                    let _ = sync_tx.send(state.snapshot());
                }
                event => {
                    if let Some(frame) = apply_event(&mut state, event) {
                        *frame_out.lock().unwrap() = Some(frame);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsaturn_common::frontend::TimingMode;

    fn test_config(threaded: bool) -> VdpConfig {
        VdpConfig { threaded_rendering: threaded, timing_mode: TimingMode::Ntsc, ..VdpConfig::default() }
    }

    fn render_one_frame(backend: &mut RenderBackend) -> CompletedFrame {
        backend.send(RenderEvent::Vdp2BeginFrame(FrameParams::default()));
        backend.send(RenderEvent::Vdp2UpdateEnabledBGs);
        for y in 0..224 {
            backend.send(RenderEvent::Vdp2DrawLine(y));
        }
        backend.send(RenderEvent::Vdp2EndFrame);

        // The threaded backend is asynchronous; wait for the frame to land
        for _ in 0..5000 {
            if let Some(frame) = backend.take_completed_frame() {
                return frame;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("renderer did not produce a frame");
    }

    #[test]
    fn sync_and_threaded_backends_produce_identical_frames() {
        let mut sync_backend = RenderBackend::new(&test_config(false));
        let mut threaded_backend = RenderBackend::new(&test_config(true));

        for backend in [&mut sync_backend, &mut threaded_backend] {
            // Back screen color at VRAM 0
            backend.send_write(RenderEvent::Vdp2VramWriteWord { address: 0, value: 0x7C1F });
        }

        let sync_frame = render_one_frame(&mut sync_backend);
        let threaded_frame = render_one_frame(&mut threaded_backend);

        assert_eq!(sync_frame.width, threaded_frame.width);
        assert_eq!(sync_frame.height, threaded_frame.height);
        assert_eq!(sync_frame.pixels, threaded_frame.pixels);
    }

    #[test]
    fn batched_writes_flush_before_draw_events() {
        let mut backend = RenderBackend::new(&test_config(true));

        // Fewer writes than the batch size; the BeginFrame event must still observe them
        backend.send_write(RenderEvent::Vdp2VramWriteWord { address: 0, value: 0x001F });
        let frame = render_one_frame(&mut backend);

        assert_eq!(frame.pixels[0].r, 255);
    }

    #[test]
    fn save_sync_round_trips_renderer_state() {
        let mut backend = RenderBackend::new(&test_config(true));

        backend.send_write(RenderEvent::Vdp2VramWriteWord { address: 0x100, value: 0xABCD });
        let snapshot = backend.pre_save_sync();
        assert_eq!(snapshot.vram[0x100], 0xAB);
        assert_eq!(snapshot.vram[0x101], 0xCD);

        let mut restored = RenderBackend::new(&test_config(false));
        restored.post_load_sync(snapshot);
        let snapshot2 = restored.pre_save_sync();
        assert_eq!(snapshot2.vram[0x100], 0xAB);
    }
}
