use crate::device::{DeviceManager, Direction};
use crate::resample::{downmix_into, LinearResampler};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::{HeapCons, HeapProd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use voxlive_core::{AudioError, AudioFrame};

const DRAIN_INTERVAL: Duration = Duration::from_millis(5);
const RING_BLOCKS: usize = 16;

/// Produces fixed-size mono frames at the session input rate.
///
/// `start` acquires the underlying device; `stop` releases it. The returned
/// channel closes when the source stops for any reason.
pub trait FrameSource: Send {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>, AudioError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

// ── FrameAssembler ────────────────────────────────────────────

/// Cuts the capture ring into `block_len` frames.
pub struct FrameAssembler {
    consumer: HeapCons<f32>,
    block_len: usize,
    sample_rate: u32,
}

impl FrameAssembler {
    pub fn new(consumer: HeapCons<f32>, block_len: usize, sample_rate: u32) -> Self {
        Self {
            consumer,
            block_len: block_len.max(1),
            sample_rate,
        }
    }

    /// Emit every complete frame currently buffered. Partial frames stay queued.
    pub fn drain(&mut self, mut emit: impl FnMut(AudioFrame)) -> usize {
        let mut emitted = 0;
        while self.consumer.occupied_len() >= self.block_len {
            let mut samples = vec![0.0f32; self.block_len];
            self.consumer.pop_slice(&mut samples);
            emit(AudioFrame {
                samples,
                sample_rate: self.sample_rate,
            });
            emitted += 1;
        }
        emitted
    }

    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }
}

// ── CaptureWorker ─────────────────────────────────────────────

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

// ── CpalFrameSource ───────────────────────────────────────────

/// Microphone capture through cpal.
///
/// Opens a mono stream at the configured rate when the device supports it,
/// otherwise falls back to the device's native format and converts.
pub struct CpalFrameSource {
    device_name: String,
    sample_rate: u32,
    block_len: usize,
    worker: Option<CaptureWorker>,
}

impl CpalFrameSource {
    pub fn new(device_name: &str, sample_rate: u32, block_len: usize) -> Self {
        Self {
            device_name: device_name.to_string(),
            sample_rate,
            block_len,
            worker: None,
        }
    }
}

impl FrameSource for CpalFrameSource {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>, AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::CaptureUnavailable(
                "capture already running".into(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let device_name = self.device_name.clone();
        let rate = self.sample_rate;
        let block_len = self.block_len;

        let thread = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || run_capture(&device_name, rate, block_len, frame_tx, stop_flag, ready_tx))
            .map_err(|e| AudioError::CaptureUnavailable(format!("failed to spawn capture thread: {e}")))?;
        let worker = CaptureWorker {
            stop,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                worker.shutdown();
                Err(e)
            }
            Err(_) => {
                worker.shutdown();
                Err(AudioError::CaptureUnavailable(
                    "capture thread exited during start".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
            tracing::info!(device = %self.device_name, "capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(CaptureWorker::is_alive)
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture(
    device_name: &str,
    sample_rate: u32,
    block_len: usize,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    stop: Arc<AtomicBool>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
) {
    let (producer, consumer) = crate::create_ring_buffer(block_len.max(1) * RING_BLOCKS);
    let producer = Arc::new(Mutex::new(producer));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = match open_input(device_name, sample_rate, &producer, &failed) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::CaptureUnavailable(e.to_string())));
        return;
    }
    tracing::info!(device = device_name, rate = sample_rate, block_len, "capture started");
    let _ = ready_tx.send(Ok(()));

    let mut assembler = FrameAssembler::new(consumer, block_len, sample_rate);
    while !stop.load(Ordering::Relaxed) {
        assembler.drain(|frame| {
            let _ = frame_tx.send(frame);
        });
        if frame_tx.is_closed() {
            tracing::debug!("frame receiver dropped, ending capture");
            break;
        }
        if failed.load(Ordering::Relaxed) {
            tracing::warn!(device = device_name, "capture stream failed");
            break;
        }
        std::thread::sleep(DRAIN_INTERVAL);
    }
    drop(stream);
}

fn open_input(
    device_name: &str,
    sample_rate: u32,
    producer: &Arc<Mutex<HeapProd<f32>>>,
    failed: &Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let device = DeviceManager::new().find(Direction::Input, device_name)?;

    match build_direct(&device, sample_rate, producer, failed) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::debug!(
                "mono {} Hz capture unsupported ({}), using native config",
                sample_rate,
                e
            );
            build_converting(&device, sample_rate, producer, failed)
        }
    }
}

fn error_callback(failed: &Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let failed = Arc::clone(failed);
    move |err| {
        tracing::error!("capture stream error: {}", err);
        failed.store(true, Ordering::Relaxed);
    }
}

fn build_direct(
    device: &Device,
    sample_rate: u32,
    producer: &Arc<Mutex<HeapProd<f32>>>,
    failed: &Arc<AtomicBool>,
) -> Result<Stream, cpal::BuildStreamError> {
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let producer = Arc::clone(producer);
    device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Ok(mut prod) = producer.lock() {
                // Overflow is dropped; the drain thread keeps up in practice.
                prod.push_slice(data);
            }
        },
        error_callback(failed),
        None,
    )
}

fn build_converting(
    device: &Device,
    sample_rate: u32,
    producer: &Arc<Mutex<HeapProd<f32>>>,
    failed: &Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::CaptureUnavailable(format!("no default input config: {e}")))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    tracing::info!(
        native_rate = config.sample_rate.0,
        channels,
        format = ?sample_format,
        "capturing in native format"
    );

    let mut converter = Converter::new(channels, config.sample_rate.0, sample_rate);
    let producer = Arc::clone(producer);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                converter.push(data, &producer);
            },
            error_callback(failed),
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|s| *s as f32 / 32768.0));
                    converter.push(&scratch, &producer);
                },
                error_callback(failed),
                None,
            )
        }
        other => {
            return Err(AudioError::CaptureUnavailable(format!(
                "unsupported input sample format: {other:?}"
            )))
        }
    };
    stream.map_err(|e| AudioError::CaptureUnavailable(e.to_string()))
}

/// Downmix + resample state owned by a capture callback.
struct Converter {
    channels: usize,
    resampler: LinearResampler,
    mono: Vec<f32>,
    out: Vec<f32>,
}

impl Converter {
    fn new(channels: usize, from_rate: u32, to_rate: u32) -> Self {
        Self {
            channels,
            resampler: LinearResampler::new(from_rate, to_rate),
            mono: Vec::new(),
            out: Vec::new(),
        }
    }

    fn push(&mut self, interleaved: &[f32], producer: &Mutex<HeapProd<f32>>) {
        self.mono.clear();
        self.out.clear();
        downmix_into(interleaved, self.channels, &mut self.mono);
        self.resampler.process(&self.mono, &mut self.out);
        if let Ok(mut prod) = producer.lock() {
            prod.push_slice(&self.out);
        }
    }
}

// ── SyntheticFrameSource ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticSignal {
    Silence,
    Tone { frequency: f32, amplitude: f32 },
}

/// Real-time paced generator standing in for a microphone.
pub struct SyntheticFrameSource {
    sample_rate: u32,
    block_len: usize,
    signal: SyntheticSignal,
    frame_limit: Option<usize>,
    worker: Option<CaptureWorker>,
}

impl SyntheticFrameSource {
    pub fn new(sample_rate: u32, block_len: usize, signal: SyntheticSignal) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            block_len: block_len.max(1),
            signal,
            frame_limit: None,
            worker: None,
        }
    }

    /// Stop on its own after `frames` frames; the channel then closes.
    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frame_limit = Some(frames);
        self
    }
}

fn synthesize(signal: SyntheticSignal, sample_rate: u32, offset: u64, len: usize) -> Vec<f32> {
    match signal {
        SyntheticSignal::Silence => vec![0.0; len],
        SyntheticSignal::Tone {
            frequency,
            amplitude,
        } => (0..len as u64)
            .map(|n| {
                let t = (offset + n) as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * frequency as f64 * t).sin() as f32
            })
            .collect(),
    }
}

impl FrameSource for SyntheticFrameSource {
    fn start(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>, AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::CaptureUnavailable(
                "capture already running".into(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (rate, block_len, signal, limit) =
            (self.sample_rate, self.block_len, self.signal, self.frame_limit);
        let period = Duration::from_secs_f64(block_len as f64 / rate as f64);

        let thread = std::thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                let mut offset = 0u64;
                let mut sent = 0usize;
                'frames: while limit.map_or(true, |l| sent < l) {
                    // Sleep in short slices so stop() returns promptly.
                    let mut remaining = period;
                    while !remaining.is_zero() {
                        if stop_flag.load(Ordering::Relaxed) {
                            break 'frames;
                        }
                        let slice = remaining.min(Duration::from_millis(10));
                        std::thread::sleep(slice);
                        remaining -= slice;
                    }
                    let frame = AudioFrame {
                        samples: synthesize(signal, rate, offset, block_len),
                        sample_rate: rate,
                    };
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                    offset += block_len as u64;
                    sent += 1;
                }
            })
            .map_err(|e| AudioError::CaptureUnavailable(format!("failed to spawn capture thread: {e}")))?;

        tracing::info!(rate, block_len, signal = ?self.signal, "synthetic capture started");
        self.worker = Some(CaptureWorker {
            stop,
            thread: Some(thread),
        });
        Ok(frame_rx)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
            tracing::info!("synthetic capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(CaptureWorker::is_alive)
    }
}

impl Drop for SyntheticFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
