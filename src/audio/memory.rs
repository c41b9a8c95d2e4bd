//! In-memory audio backend
//!
//! Plays back scripted input blocks and records output writes. Used by
//! `parley replay` to run captured WAV files through the capture engine and
//! by tests that need deterministic audio without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    AudioBackend, AudioBlock, AudioClip, BlockRead, BlockSink, BlockSource, DeviceFormat,
    DeviceSelector,
};
use crate::{Error, Result};

/// What the next `open_input` call receives
#[derive(Debug, Clone)]
pub enum ScriptedInput {
    /// Deliver these blocks in order, then report the stream closed
    Blocks(Vec<Vec<f32>>),
    /// Fail to open with this message
    Fail(String),
}

/// Scripted audio backend
#[derive(Debug)]
pub struct MemoryBackend {
    inputs: Mutex<VecDeque<ScriptedInput>>,
    has_input_device: bool,
    output_format: Option<DeviceFormat>,
    output_open_error: Option<String>,
    simple_error: Option<String>,
    pace: Option<Duration>,
    written: Arc<Mutex<Vec<Vec<f32>>>>,
    simple_clips: Mutex<Vec<AudioClip>>,
    open_streams: Arc<AtomicUsize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Backend with an input device, no scripted audio, and a mono 16 kHz output
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: Mutex::new(VecDeque::new()),
            has_input_device: true,
            output_format: Some(DeviceFormat {
                sample_rate: 16_000,
                channels: 1,
            }),
            output_open_error: None,
            simple_error: None,
            pace: None,
            written: Arc::new(Mutex::new(Vec::new())),
            simple_clips: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue blocks for the next input stream that gets opened
    #[must_use]
    pub fn with_input(self, blocks: Vec<Vec<f32>>) -> Self {
        self.push_input(ScriptedInput::Blocks(blocks));
        self
    }

    /// Make the next input stream fail to open
    #[must_use]
    pub fn with_failing_input(self, message: &str) -> Self {
        self.push_input(ScriptedInput::Fail(message.to_string()));
        self
    }

    /// Report no input device at all
    #[must_use]
    pub const fn without_input_device(mut self) -> Self {
        self.has_input_device = false;
        self
    }

    /// Native format reported for the output device
    #[must_use]
    pub const fn with_output_format(mut self, format: DeviceFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Report no output device at all
    #[must_use]
    pub const fn without_output_device(mut self) -> Self {
        self.output_format = None;
        self
    }

    /// Make routed output streams fail to open
    #[must_use]
    pub fn with_failing_output(mut self, message: &str) -> Self {
        self.output_open_error = Some(message.to_string());
        self
    }

    /// Make simple playback fail
    #[must_use]
    pub fn with_failing_simple_playback(mut self, message: &str) -> Self {
        self.simple_error = Some(message.to_string());
        self
    }

    /// Sleep this long per delivered block and per written chunk
    #[must_use]
    pub const fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Queue another scripted input stream
    pub fn push_input(&self, input: ScriptedInput) {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push_back(input);
        }
    }

    /// Chunks written to routed output streams, in order
    #[must_use]
    pub fn written_chunks(&self) -> Vec<Vec<f32>> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// All samples written to routed output streams
    #[must_use]
    pub fn written_samples(&self) -> Vec<f32> {
        self.written_chunks().concat()
    }

    /// Clips handed to simple playback
    #[must_use]
    pub fn simple_clips(&self) -> Vec<AudioClip> {
        self.simple_clips
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Number of streams currently open
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn guard(&self) -> StreamGuard {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        StreamGuard(Arc::clone(&self.open_streams))
    }
}

impl AudioBackend for MemoryBackend {
    fn input_name(&self, _device: &DeviceSelector) -> Result<String> {
        if self.has_input_device {
            Ok("memory input".to_string())
        } else {
            Err(Error::Audio("no input device available".to_string()))
        }
    }

    fn open_input(
        &self,
        device: &DeviceSelector,
        sample_rate: u32,
        _block_size: usize,
    ) -> Result<Box<dyn BlockSource>> {
        self.input_name(device)?;

        let next = self
            .inputs
            .lock()
            .map_err(|_| Error::Audio("input script poisoned".to_string()))?
            .pop_front();

        match next {
            Some(ScriptedInput::Blocks(blocks)) => Ok(Box::new(MemorySource {
                blocks: blocks.into(),
                sample_rate,
                elapsed: Duration::ZERO,
                pace: self.pace,
                _guard: self.guard(),
            })),
            Some(ScriptedInput::Fail(message)) => Err(Error::Audio(message)),
            None => Err(Error::Audio("no scripted input left".to_string())),
        }
    }

    fn output_format(&self, _device: &DeviceSelector) -> Result<DeviceFormat> {
        self.output_format
            .ok_or_else(|| Error::Audio("no output device available".to_string()))
    }

    fn open_output(
        &self,
        device: &DeviceSelector,
        _format: DeviceFormat,
    ) -> Result<Box<dyn BlockSink>> {
        self.output_format(device)?;
        if let Some(message) = &self.output_open_error {
            return Err(Error::Audio(message.clone()));
        }
        Ok(Box::new(MemorySink {
            written: Arc::clone(&self.written),
            pace: self.pace,
            _guard: self.guard(),
        }))
    }

    fn play_simple(&self, clip: &AudioClip) -> Result<()> {
        if let Some(message) = &self.simple_error {
            return Err(Error::Audio(message.clone()));
        }
        if let Ok(mut clips) = self.simple_clips.lock() {
            clips.push(clip.clone());
        }
        Ok(())
    }
}

/// Decrements the open-stream count when a stream is dropped
#[derive(Debug)]
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemorySource {
    blocks: VecDeque<Vec<f32>>,
    sample_rate: u32,
    elapsed: Duration,
    pace: Option<Duration>,
    _guard: StreamGuard,
}

impl BlockSource for MemorySource {
    fn next_block(&mut self, _timeout: Duration) -> Result<BlockRead> {
        let Some(samples) = self.blocks.pop_front() else {
            return Ok(BlockRead::Closed);
        };
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        // The clock advances by the audio actually delivered
        #[allow(clippy::cast_precision_loss)]
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / f64::from(self.sample_rate.max(1)));
        self.elapsed += duration;

        Ok(BlockRead::Block(AudioBlock::new(samples, self.elapsed)))
    }

    fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

struct MemorySink {
    written: Arc<Mutex<Vec<Vec<f32>>>>,
    pace: Option<Duration>,
    _guard: StreamGuard,
}

impl BlockSink for MemorySink {
    fn write(&mut self, interleaved: &[f32]) -> Result<()> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        self.written
            .lock()
            .map_err(|_| Error::Audio("output recorder poisoned".to_string()))?
            .push(interleaved.to_vec());
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}
