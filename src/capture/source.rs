//! CPAL-backed microphone source
//!
//! The CPAL stream is not `Send`, so it lives on a dedicated capture thread
//! for its whole life. The thread builds the stream, reports readiness, then
//! parks until told to stop; dropping the stream on exit is what releases
//! the exclusive OS device handle. Audio callbacks convert samples to PCM16,
//! accumulate one chunk interval of audio, and hand finished chunks to the
//! session over a tokio channel with `try_send` - capture never blocks on a
//! slow consumer, it drops instead.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::{AudioChunk, AudioConstraints, DeviceError};

/// Opens the default input device for one recording session.
pub struct MicSource;

impl MicSource {
    /// Acquire the microphone and start emitting chunks on `chunk_tx`.
    ///
    /// Blocks until the capture thread reports the stream as started or
    /// failed. The returned handle is the only way to release the device.
    pub fn open(
        constraints: AudioConstraints,
        chunk_duration_ms: u32,
        chunk_tx: mpsc::Sender<AudioChunk>,
    ) -> Result<CaptureHandle, DeviceError> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("voiceform-capture".to_string())
            .spawn(move || {
                capture_thread(constraints, chunk_duration_ms, chunk_tx, ready_tx, stop_rx)
            })
            .map_err(|e| DeviceError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CaptureHandle {
                stop_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::StreamCreationFailed(
                "capture thread exited during startup".to_string(),
            )),
        }
    }
}

/// Handle to an active capture. Stopping (or dropping) releases the device.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capture, flush the trailing partial chunk, and release the
    /// device. Waits for the capture thread to exit.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::info!("Microphone released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Signal the thread even on implicit drop so the device never leaks
        let _ = self.stop_tx.send(());
    }
}

fn capture_thread(
    constraints: AudioConstraints,
    chunk_duration_ms: u32,
    chunk_tx: mpsc::Sender<AudioChunk>,
    ready_tx: std_mpsc::SyncSender<Result<(), DeviceError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    match open_stream(constraints, chunk_duration_ms, chunk_tx.clone()) {
        Ok((stream, chunker)) => {
            let _ = ready_tx.send(Ok(()));

            // Park until stop() is called or the handle is dropped
            let _ = stop_rx.recv();

            // Dropping the stream releases the device before the final flush
            drop(stream);

            let trailing = chunker.lock().unwrap().flush();
            if let Some(chunk) = trailing {
                if chunk_tx.try_send(chunk).is_err() {
                    log::debug!("Dropping trailing audio chunk: consumer gone");
                }
            }
            log::debug!("Capture thread exiting");
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

fn open_stream(
    constraints: AudioConstraints,
    chunk_duration_ms: u32,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<(Stream, Arc<Mutex<Chunker>>), DeviceError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(DeviceError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|_| DeviceError::NoSupportedConfig)?;
    let sample_format = supported.sample_format();

    let config = StreamConfig {
        channels: constraints.channels,
        sample_rate: SampleRate(constraints.sample_rate),
        buffer_size: BufferSize::Default,
    };

    log::info!(
        "Capture config: {} Hz, {} channel(s), {:?}, {}ms chunks",
        constraints.sample_rate,
        constraints.channels,
        sample_format,
        chunk_duration_ms
    );

    let chunker = Arc::new(Mutex::new(Chunker::new(
        constraints.sample_rate,
        chunk_duration_ms,
    )));

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, chunker.clone(), chunk_tx),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, chunker.clone(), chunk_tx),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, chunker.clone(), chunk_tx),
        _ => return Err(DeviceError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| DeviceError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, chunker))
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    chunker: Arc<Mutex<Chunker>>,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<Stream, DeviceError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                let chunks = chunker.lock().unwrap().push(&samples);
                for chunk in chunks {
                    if chunk_tx.try_send(chunk).is_err() {
                        log::debug!("Dropping audio chunk: consumer not keeping up");
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Accumulates samples and cuts them into fixed-interval chunks.
struct Chunker {
    buffer: Vec<i16>,
    samples_per_chunk: usize,
    next_sequence: u64,
}

impl Chunker {
    fn new(sample_rate: u32, chunk_duration_ms: u32) -> Self {
        let samples_per_chunk = (sample_rate as u64 * chunk_duration_ms as u64 / 1000) as usize;
        Self {
            buffer: Vec::with_capacity(samples_per_chunk * 2),
            samples_per_chunk,
            next_sequence: 0,
        }
    }

    /// Add samples; returns every complete chunk now available.
    fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.buffer.extend_from_slice(samples);
        let mut chunks = Vec::new();
        let target = self.samples_per_chunk;
        while self.buffer.len() >= target {
            chunks.push(self.cut(target));
        }
        chunks
    }

    /// Emit whatever remains as a final partial chunk.
    fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            None
        } else {
            let len = self.buffer.len();
            Some(self.cut(len))
        }
    }

    fn cut(&mut self, len: usize) -> AudioChunk {
        let samples: Vec<i16> = self.buffer.drain(..len).collect();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        AudioChunk {
            bytes: pack_pcm16(&samples),
            captured_at: Utc::now(),
            sequence,
        }
    }
}

/// PCM16 little-endian packaging for the wire.
fn pack_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert any supported sample type to i16.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
