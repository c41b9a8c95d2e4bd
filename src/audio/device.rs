//! Audio devices via cpal
//!
//! Input is downmixed to mono and, when the device cannot open at the capture
//! rate, resampled with rubato before being cut into fixed-size blocks.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use serde::Serialize;

use super::{
    AudioBackend, AudioBlock, AudioClip, BlockRead, BlockSink, BlockSource, DeviceFormat,
    DeviceSelector, downmix_to_mono,
};
use crate::{Error, Result};

/// Frames fed to the input resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Extra wait allowed beyond a chunk's duration before output counts as stalled
const STALL_GRACE: Duration = Duration::from_millis(500);

/// Poll interval while waiting on the output queue
const OUTPUT_POLL: Duration = Duration::from_millis(5);

/// A device as seen by `parley devices`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: Option<u32>,
}

/// Enumerate all devices on the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let devices = host.devices().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let max_input_channels = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            let max_output_channels = device
                .supported_output_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            let default_sample_rate = device
                .default_output_config()
                .or_else(|_| device.default_input_config())
                .ok()
                .map(|c| c.sample_rate().0);

            DeviceInfo {
                index,
                name: device.name().unwrap_or_default(),
                max_input_channels,
                max_output_channels,
                default_sample_rate,
            }
        })
        .collect())
}

/// Names of the host's default input and output devices
#[must_use]
pub fn default_device_names() -> (Option<String>, Option<String>) {
    let host = cpal::default_host();
    (
        host.default_input_device().and_then(|d| d.name().ok()),
        host.default_output_device().and_then(|d| d.name().ok()),
    )
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    const fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    fn supports(self, device: &Device) -> bool {
        match self {
            Self::Input => device
                .supported_input_configs()
                .is_ok_and(|mut c| c.next().is_some()),
            Self::Output => device
                .supported_output_configs()
                .is_ok_and(|mut c| c.next().is_some()),
        }
    }
}

/// Resolve a selector to a device on the default host
fn resolve_device(selector: &DeviceSelector, direction: Direction) -> Result<Device> {
    let host = cpal::default_host();

    let device = match selector {
        DeviceSelector::Default => match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        },
        DeviceSelector::Index(index) => host
            .devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .nth(*index)
            .filter(|d| direction.supports(d)),
        DeviceSelector::Name(name) => {
            let needle = name.to_lowercase();
            host.devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| {
                    direction.supports(d)
                        && d.name()
                            .is_ok_and(|n| n.to_lowercase().contains(&needle))
                })
        }
    };

    device.ok_or_else(|| {
        Error::Audio(format!(
            "no {} device matching \"{selector}\"",
            direction.label()
        ))
    })
}

/// Audio devices on the default cpal host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn input_name(&self, device: &DeviceSelector) -> Result<String> {
        let device = resolve_device(device, Direction::Input)?;
        Ok(device.name().unwrap_or_default())
    }

    fn open_input(
        &self,
        device: &DeviceSelector,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn BlockSource>> {
        Ok(Box::new(CpalInput::open(device, sample_rate, block_size)?))
    }

    fn output_format(&self, device: &DeviceSelector) -> Result<DeviceFormat> {
        let device = resolve_device(device, Direction::Output)?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        Ok(DeviceFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn open_output(
        &self,
        device: &DeviceSelector,
        format: DeviceFormat,
    ) -> Result<Box<dyn BlockSink>> {
        Ok(Box::new(CpalOutput::open(device, format)?))
    }

    fn play_simple(&self, clip: &AudioClip) -> Result<()> {
        play_on_default_device(clip)
    }
}

/// Streams rubato output in fixed input chunks
struct InputResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl InputResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
                .map_err(|e| Error::Resample(format!("resampler init failed: {e}")))?;
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    fn process(&mut self, mono: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(mono);
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Resample(format!("resample failed: {e}")))?;
            out.extend_from_slice(&result[0]);
        }
    }
}

/// Microphone stream cut into fixed-size mono blocks
struct CpalInput {
    _stream: Stream,
    rx: Receiver<Vec<f32>>,
    channels: u16,
    resampler: Option<InputResampler>,
    pending: Vec<f32>,
    block_size: usize,
    opened_at: Instant,
}

impl CpalInput {
    fn open(selector: &DeviceSelector, sample_rate: u32, block_size: usize) -> Result<Self> {
        let device = resolve_device(selector, Direction::Input)?;

        // Prefer a config that runs at the capture rate natively, with the fewest channels
        let native = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels);

        let (config, resampler) = if let Some(range) = native {
            (range.with_sample_rate(SampleRate(sample_rate)).config(), None)
        } else {
            let default = device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?;
            let from_rate = default.sample_rate().0;
            (
                default.config(),
                Some(InputResampler::new(from_rate, sample_rate)?),
            )
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            capture_rate = sample_rate,
            channels = config.channels,
            resampled = resampler.is_some(),
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::channel();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Receiver gone means the capture is over
                    let _ = tx.send(data.to_vec());
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            _stream: stream,
            rx,
            channels: config.channels,
            resampler,
            pending: Vec::with_capacity(block_size * 2),
            block_size: block_size.max(1),
            opened_at: Instant::now(),
        })
    }

    fn take_block(&mut self) -> Option<AudioBlock> {
        if self.pending.len() < self.block_size {
            return None;
        }
        let samples: Vec<f32> = self.pending.drain(..self.block_size).collect();
        Some(AudioBlock::new(samples, self.opened_at.elapsed()))
    }
}

impl BlockSource for CpalInput {
    fn next_block(&mut self, timeout: Duration) -> Result<BlockRead> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(block) = self.take_block() {
                return Ok(BlockRead::Block(block));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(data) => {
                    let mono = downmix_to_mono(&data, self.channels);
                    match self.resampler.as_mut() {
                        Some(resampler) => resampler.process(&mono, &mut self.pending)?,
                        None => self.pending.extend_from_slice(&mono),
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(BlockRead::Pending),
                Err(RecvTimeoutError::Disconnected) => return Ok(BlockRead::Closed),
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        tracing::debug!("audio capture stopped");
    }
}

/// Output stream fed from a shared queue
struct CpalOutput {
    _stream: Stream,
    queue: Arc<Mutex<VecDeque<f32>>>,
    format: DeviceFormat,
}

impl CpalOutput {
    fn open(selector: &DeviceSelector, format: DeviceFormat) -> Result<Self> {
        let device = resolve_device(selector, Direction::Output)?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let queue_clone = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = queue_clone.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for out in data.iter_mut() {
                        *out = queue.pop_front().unwrap_or(0.0);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "audio playback initialized"
        );

        Ok(Self {
            _stream: stream,
            queue,
            format,
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Wait until at most `limit` samples remain queued
    fn wait_until_queued(&self, limit: usize, budget: Duration) -> Result<()> {
        let start = Instant::now();
        while self.queued() > limit {
            if start.elapsed() > budget {
                return Err(Error::Audio("output device stalled".to_string()));
            }
            std::thread::sleep(OUTPUT_POLL);
        }
        Ok(())
    }

    fn duration_of(&self, samples: usize) -> Duration {
        let per_second = u64::from(self.format.sample_rate) * u64::from(self.format.channels);
        Duration::from_millis((samples as u64 * 1000) / per_second.max(1))
    }
}

impl BlockSink for CpalOutput {
    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        self.queue
            .lock()
            .map_err(|_| Error::Audio("output queue poisoned".to_string()))?
            .extend(interleaved.iter().copied());

        // Accepted once the device has consumed everything before this chunk
        let budget = self.duration_of(interleaved.len()) * 2 + STALL_GRACE;
        self.wait_until_queued(interleaved.len(), budget)
    }

    fn drain(&mut self) -> Result<()> {
        let budget = self.duration_of(self.queued()) + STALL_GRACE;
        self.wait_until_queued(0, budget)?;

        // Small delay so the device flushes its own buffer
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    }
}

/// Play a clip on the default output device, waiting for completion
fn play_on_default_device(clip: &AudioClip) -> Result<()> {
    if clip.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(clip.sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };
    let supported_config = supports(clip.channels)
        .or_else(|| supports(1))
        .or_else(|| supports(2))
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config.with_sample_rate(rate).config();
    let out_channels = usize::from(config.channels);

    // One mono value per frame, replicated across the device's channels
    let mono = if config.channels == clip.channels {
        None
    } else {
        Some(downmix_to_mono(&clip.samples, clip.channels))
    };
    let frames: Arc<Vec<f32>> = Arc::new(mono.unwrap_or_else(|| clip.samples.clone()));
    let frame_width = if config.channels == clip.channels {
        out_channels
    } else {
        1
    };

    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));
    let frames_clone = Arc::clone(&frames);
    let position_clone = Arc::clone(&position);
    let finished_clone = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut pos) = position_clone.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(out_channels) {
                    if *pos + frame_width > frames_clone.len() {
                        frame.fill(0.0);
                        if let Ok(mut done) = finished_clone.lock() {
                            *done = true;
                        }
                        continue;
                    }
                    if frame_width == 1 {
                        frame.fill(frames_clone[*pos]);
                    } else {
                        frame.copy_from_slice(&frames_clone[*pos..*pos + frame_width]);
                    }
                    *pos += frame_width;
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = clip.duration() + STALL_GRACE;
    while !finished.lock().map(|f| *f).unwrap_or(true) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(frames = clip.frames(), "simple playback complete");

    Ok(())
}
