use crate::device::{DeviceManager, Direction};
use crate::scheduler::{BufferId, OutputClock, PlaybackSink};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;
use voxlive_core::{AudioError, DecodedAudioBuffer};

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

// ── Renderer ──────────────────────────────────────────────────

struct Voice {
    id: BufferId,
    buffer: Arc<DecodedAudioBuffer>,
    start_frame: u64,
    end_frame: u64,
}

impl Voice {
    /// Linearly interpolated sample for device frame `frame`.
    fn sample_at(&self, frame: u64, device_rate: u32) -> f32 {
        if frame < self.start_frame || frame >= self.end_frame {
            return 0.0;
        }
        let pos =
            (frame - self.start_frame) as f64 * self.buffer.sample_rate as f64 / device_rate as f64;
        let i = pos as usize;
        let len = self.buffer.frames();
        if i >= len {
            return 0.0;
        }
        let frac = (pos - i as f64) as f32;
        let a = self.buffer.mono_sample(i);
        let b = if i + 1 < len {
            self.buffer.mono_sample(i + 1)
        } else {
            a
        };
        a + (b - a) * frac
    }
}

/// Sample-accurate mixer for scheduled buffers, driven by the device callback.
///
/// Buffer start times are converted to device frames on arrival; the device
/// frame counter doubles as the output clock.
pub struct Renderer {
    voices: Vec<Voice>,
    device_rate: u32,
    channels: usize,
    frames_rendered: u64,
}

impl Renderer {
    pub fn new(device_rate: u32, channels: u16) -> Self {
        Self {
            voices: Vec::new(),
            device_rate: device_rate.max(1),
            channels: channels.max(1) as usize,
            frames_rendered: 0,
        }
    }

    pub fn schedule(&mut self, id: BufferId, buffer: Arc<DecodedAudioBuffer>, start: f64) {
        if buffer.sample_rate == 0 || buffer.frames() == 0 {
            tracing::debug!(id, "skipping empty playback buffer");
            return;
        }
        // Both edges come from absolute times so neighbours share a boundary frame.
        let rate = self.device_rate as f64;
        let start = start.max(0.0);
        let start_frame = (start * rate).round() as u64;
        let end_frame = ((start + buffer.duration()) * rate).round() as u64;
        self.voices.push(Voice {
            id,
            buffer,
            start_frame,
            end_frame,
        });
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.voices.len();
        self.voices.clear();
        cancelled
    }

    /// Fill an interleaved device buffer; every channel carries the mono mix.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / self.channels;
        for (offset, frame) in out.chunks_exact_mut(self.channels).enumerate() {
            let position = self.frames_rendered + offset as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .map(|v| v.sample_at(position, self.device_rate))
                .sum();
            frame.fill(mixed.clamp(-1.0, 1.0));
        }
        self.frames_rendered += frames as u64;

        let now = self.frames_rendered;
        self.voices.retain(|v| {
            let done = v.end_frame <= now;
            if done {
                tracing::trace!(id = v.id, "playback buffer finished");
            }
            !done
        });
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn clock(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

// ── OutputHandle ──────────────────────────────────────────────

/// Shared handle to a running output stream; acts as both the playback sink
/// and the output clock of the scheduler.
#[derive(Clone)]
pub struct OutputHandle {
    renderer: Arc<Mutex<Renderer>>,
    frames: Arc<AtomicU64>,
    device_rate: u32,
    status: Arc<AtomicU8>,
}

impl OutputHandle {
    pub fn is_healthy(&self) -> bool {
        self.status.load(Ordering::Relaxed) == STATUS_OK
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl OutputClock for OutputHandle {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }
}

impl PlaybackSink for OutputHandle {
    fn schedule(&self, id: BufferId, buffer: Arc<DecodedAudioBuffer>, start: f64) {
        self.renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .schedule(id, buffer, start);
    }

    fn cancel_all(&self) {
        let cancelled = self
            .renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_all();
        tracing::debug!(cancelled, "output voices cancelled");
    }
}

// ── OutputNode ────────────────────────────────────────────────

/// Owns the output device. The cpal stream lives on its own thread because
/// it cannot be moved across threads on every host.
pub struct OutputNode {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OutputNode {
    pub fn start(device_name: &str) -> Result<(Self, OutputHandle), AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let name = device_name.to_string();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("playback".into())
            .spawn(move || run_output(&name, flag, ready_tx))
            .map_err(|e| AudioError::StreamBuild(format!("failed to spawn playback thread: {e}")))?;

        let node = Self {
            running,
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(handle)) => Ok((node, handle)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamBuild(
                "playback thread exited during start".into(),
            )),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }
}

impl Drop for OutputNode {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_output(
    device_name: &str,
    running: Arc<AtomicBool>,
    ready_tx: std_mpsc::Sender<Result<OutputHandle, AudioError>>,
) {
    let (stream, handle) = match build_output(device_name) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamBuild(e.to_string())));
        return;
    }
    tracing::info!(
        device = device_name,
        rate = handle.device_rate,
        "playback stream started"
    );
    let _ = ready_tx.send(Ok(handle));

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
    tracing::debug!("playback device released");
}

fn build_output(device_name: &str) -> Result<(Stream, OutputHandle), AudioError> {
    let device = DeviceManager::new().find(Direction::Output, device_name)?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::StreamBuild(format!("no default output config: {e}")))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let device_rate = config.sample_rate.0;

    let renderer = Arc::new(Mutex::new(Renderer::new(device_rate, config.channels)));
    let frames = Arc::new(AtomicU64::new(0));
    let status = Arc::new(AtomicU8::new(STATUS_OK));
    let handle = OutputHandle {
        renderer: Arc::clone(&renderer),
        frames: Arc::clone(&frames),
        device_rate,
        status: Arc::clone(&status),
    };

    let err_callback = move |err: cpal::StreamError| {
        tracing::error!("output stream error: {}", err);
        status.store(STATUS_ERROR, Ordering::Relaxed);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_into(&renderer, &frames, data);
            },
            err_callback,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    render_into(&renderer, &frames, &mut scratch);
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = crate::codec::to_pcm16(*s);
                    }
                },
                err_callback,
                None,
            )
        }
        other => {
            return Err(AudioError::StreamBuild(format!(
                "unsupported output sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    Ok((stream, handle))
}

fn render_into(renderer: &Mutex<Renderer>, frames: &AtomicU64, data: &mut [f32]) {
    match renderer.lock() {
        Ok(mut r) => {
            r.render(data);
            frames.store(r.frames_rendered(), Ordering::Release);
        }
        Err(_) => data.fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f32, frames: usize, rate: u32) -> Arc<DecodedAudioBuffer> {
        Arc::new(DecodedAudioBuffer {
            channels: vec![vec![value; frames]],
            sample_rate: rate,
        })
    }

    #[test]
    fn test_renderer_silence_without_voices() {
        let mut r = Renderer::new(100, 1);
        let mut out = vec![1.0f32; 10];
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(r.frames_rendered(), 10);
        assert!((r.clock() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_renderer_places_voice_at_start_time() {
        let mut r = Renderer::new(100, 1);
        r.schedule(0, constant(0.5, 5, 100), 0.03);
        let mut out = vec![0.0f32; 10];
        r.render(&mut out);
        assert_eq!(&out[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&out[3..8], &[0.5; 5]);
        assert_eq!(&out[8..], &[0.0, 0.0]);
    }

    #[test]
    fn test_renderer_back_to_back_voices_have_no_gap() {
        let mut r = Renderer::new(100, 1);
        r.schedule(0, constant(0.25, 4, 100), 0.0);
        r.schedule(1, constant(0.75, 4, 100), 0.04);
        let mut out = vec![0.0f32; 8];
        r.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.75]);
    }

    #[test]
    fn test_renderer_drops_finished_voices() {
        let mut r = Renderer::new(100, 1);
        r.schedule(0, constant(0.5, 4, 100), 0.0);
        let mut out = vec![0.0f32; 2];
        r.render(&mut out);
        assert_eq!(r.active_voices(), 1);
        r.render(&mut out);
        assert_eq!(r.active_voices(), 0);
    }

    #[test]
    fn test_renderer_cancel_all_silences_immediately() {
        let mut r = Renderer::new(100, 1);
        r.schedule(0, constant(0.5, 100, 100), 0.0);
        r.schedule(1, constant(0.5, 100, 100), 1.0);
        let mut out = vec![0.0f32; 4];
        r.render(&mut out);
        assert_eq!(out[0], 0.5);

        assert_eq!(r.cancel_all(), 2);
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_renderer_duplicates_mono_across_channels() {
        let mut r = Renderer::new(100, 2);
        r.schedule(0, constant(0.5, 2, 100), 0.0);
        let mut out = vec![0.0f32; 4];
        r.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5]);
        assert_eq!(r.frames_rendered(), 2);
    }

    #[test]
    fn test_renderer_converts_buffer_rate() {
        // 50 Hz buffer on a 100 Hz device: each source sample spans two frames.
        let mut r = Renderer::new(100, 1);
        r.schedule(
            0,
            Arc::new(DecodedAudioBuffer {
                channels: vec![vec![0.0, 1.0]],
                sample_rate: 50,
            }),
            0.0,
        );
        let mut out = vec![0.0f32; 4];
        r.render(&mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_renderer_ignores_zero_rate_buffer() {
        let mut r = Renderer::new(48000, 1);
        r.schedule(0, constant(0.5, 4, 0), 0.0);
        assert_eq!(r.active_voices(), 0);
        let mut out = vec![0.0f32; 480];
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_renderer_uneven_rates_share_boundaries() {
        // 24 kHz buffers on a 44.1 kHz device: 70 frames span 128.625 device frames.
        let mut r = Renderer::new(44100, 1);
        let duration = 70.0 / 24000.0;
        for i in 0..3u64 {
            r.schedule(i, constant(0.25, 70, 24000), i as f64 * duration);
        }
        for pair in r.voices.windows(2) {
            assert_eq!(pair[0].end_frame, pair[1].start_frame);
        }
        assert_eq!(r.voices[2].end_frame, 386);
        let mut out = vec![0.0f32; 386];
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.25), "gap or overlap in {:?}", out);
    }

    #[test]
    fn test_renderer_clamps_overlapping_sum() {
        let mut r = Renderer::new(100, 1);
        r.schedule(0, constant(0.8, 4, 100), 0.0);
        r.schedule(1, constant(0.8, 4, 100), 0.0);
        let mut out = vec![0.0f32; 4];
        r.render(&mut out);
        assert!(out.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn test_output_handle_clock_and_sink() {
        let renderer = Arc::new(Mutex::new(Renderer::new(100, 1)));
        let frames = Arc::new(AtomicU64::new(0));
        let handle = OutputHandle {
            renderer: Arc::clone(&renderer),
            frames: Arc::clone(&frames),
            device_rate: 100,
            status: Arc::new(AtomicU8::new(STATUS_OK)),
        };
        assert!(handle.is_healthy());
        assert_eq!(handle.now(), 0.0);

        handle.schedule(7, constant(0.5, 10, 100), 0.0);
        let mut out = vec![0.0f32; 5];
        render_into(&renderer, &frames, &mut out);
        assert!((handle.now() - 0.05).abs() < 1e-9);
        assert_eq!(out, vec![0.5; 5]);

        handle.cancel_all();
        assert_eq!(renderer.lock().unwrap().active_voices(), 0);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_output_node_start_stop() {
        let (mut node, handle) = OutputNode::start("default").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(handle.now() > 0.0);
        node.stop();
    }
}
