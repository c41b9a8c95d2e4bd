//! Audio I/O adapter
//!
//! Input arrives as fixed-size mono blocks and output is written in chunks
//! that the device must accept before the next one is handed over. Both sides
//! sit behind [`AudioBackend`] so the turn-taking engine runs unchanged over
//! real devices ([`device::CpalBackend`]) and scripted audio
//! ([`memory::MemoryBackend`]).
//!
//! Streams are owned by the box returned from `open_*` and close when it is
//! dropped, so every exit path of the operation that opened them releases
//! the device.

pub mod device;
pub mod memory;
mod wav;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use wav::{read_wav, samples_to_wav};

/// One scheduling tick of captured mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Mono float samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Monotonic offset from the moment the stream was opened
    pub captured_at: Duration,
}

impl AudioBlock {
    /// Create a block captured at the given stream offset
    #[must_use]
    pub const fn new(samples: Vec<f32>, captured_at: Duration) -> Self {
        Self {
            samples,
            captured_at,
        }
    }
}

/// Synthesized or decoded audio, interleaved when `channels > 1`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    /// Wrap mono samples
    #[must_use]
    pub const fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback duration at the clip's own rate
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Native format of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Which device to open
///
/// Parsed from CLI/config strings: digits select by enumeration index,
/// anything else matches a case-insensitive substring of the device name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    Name(String),
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        Ok(trimmed
            .parse::<usize>()
            .map_or_else(|_| Self::Name(trimmed.to_string()), Self::Index))
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(value: DeviceSelector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Result of waiting for the next input block
#[derive(Debug, Clone, PartialEq)]
pub enum BlockRead {
    /// A full block is available
    Block(AudioBlock),
    /// Nothing arrived within the wait budget
    Pending,
    /// The stream ended and will produce no more blocks
    Closed,
}

/// An open input stream producing fixed-size blocks
pub trait BlockSource {
    /// Wait at most `timeout` for the next block
    ///
    /// # Errors
    ///
    /// Returns error if the stream failed
    fn next_block(&mut self, timeout: Duration) -> Result<BlockRead>;

    /// Monotonic time since the stream was opened
    fn elapsed(&self) -> Duration;
}

/// An open output stream accepting interleaved chunks
pub trait BlockSink {
    /// Hand a chunk to the device, blocking until it has been accepted
    ///
    /// # Errors
    ///
    /// Returns error if the device stalls or the stream failed
    fn write(&mut self, interleaved: &[f32]) -> Result<()>;

    /// Block until everything written so far has been played
    ///
    /// # Errors
    ///
    /// Returns error if the device stalls
    fn drain(&mut self) -> Result<()>;
}

/// Opens scoped audio streams
///
/// Implementations are shared across threads; the streams they open are not,
/// and must be used and dropped on the thread that opened them.
pub trait AudioBackend: Send + Sync {
    /// Human-readable name of the input device the selector resolves to
    ///
    /// # Errors
    ///
    /// Returns error if no matching input device exists
    fn input_name(&self, device: &DeviceSelector) -> Result<String>;

    /// Open a mono input stream delivering `block_size` samples per block
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open_input(
        &self,
        device: &DeviceSelector,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn BlockSource>>;

    /// Native rate and channel count of an output device
    ///
    /// # Errors
    ///
    /// Returns error if no matching output device exists
    fn output_format(&self, device: &DeviceSelector) -> Result<DeviceFormat>;

    /// Open an output stream in the given format
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened in that format
    fn open_output(
        &self,
        device: &DeviceSelector,
        format: DeviceFormat,
    ) -> Result<Box<dyn BlockSink>>;

    /// Play a clip to completion on the default output path
    ///
    /// Not interruptible and not routed through a selected device.
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    fn play_simple(&self, clip: &AudioClip) -> Result<()>;
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Map RMS energy to a `0.0..=1.0` meter level for UI display
#[must_use]
pub fn mic_level(rms: f32) -> f32 {
    (rms * 8.0).clamp(0.0, 1.0)
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
