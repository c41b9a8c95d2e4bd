//! Reply playback
//!
//! A clip is first routed to the selected output device: resampled to the
//! device's native rate and downmixed if it has more channels than the device.
//! It is then written in 100 ms chunks, with the interruption and stop
//! signals checked before every chunk. If routed playback fails, simpler
//! strategies are tried in order.

use std::fmt;

use crate::audio::{AudioBackend, AudioClip, DeviceFormat, DeviceSelector, downmix_to_mono};
use crate::signal::Signal;
use crate::{Error, Result};

/// Which path ended up playing the clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackRoute {
    /// Interruptible playback on the selected device
    Routed,
    /// A later strategy played the clip after earlier ones failed
    Fallback {
        strategy: &'static str,
        reason: String,
    },
}

/// Result of a completed or interrupted playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackOutcome {
    /// Playback was cut short by the interruption signal
    pub interrupted: bool,
    pub route: PlaybackRoute,
}

/// One way of getting a clip out of the speakers
pub trait PlaybackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Play the clip; returns `true` if playback stopped early on a signal
    ///
    /// # Errors
    ///
    /// Returns error if this strategy cannot play the clip
    fn play(
        &self,
        backend: &dyn AudioBackend,
        clip: &AudioClip,
        device: &DeviceSelector,
        interrupted: &Signal,
        stop: &Signal,
    ) -> Result<bool>;
}

/// Resample interleaved audio by linear interpolation, per channel
///
/// The output has `max(1, round(frames * to / from))` frames. Output frame `j`
/// sits at relative position `j / new_frames` and is interpolated from the
/// input frames at positions `i / frames`, holding the last frame at the end.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn resample_linear(
    interleaved: &[f32],
    channels: u16,
    from_rate: u32,
    to_rate: u32,
) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    let frames = interleaved.len() / channels;
    if frames == 0 || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return interleaved.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let new_frames = ((frames as f64 * ratio).round() as usize).max(1);
    let mut out = vec![0.0_f32; new_frames * channels];

    for j in 0..new_frames {
        let pos = j as f64 * frames as f64 / new_frames as f64;
        let i0 = pos.floor() as usize;
        let frac = (pos - i0 as f64) as f32;
        for c in 0..channels {
            out[j * channels + c] = if i0 + 1 >= frames {
                interleaved[(frames - 1) * channels + c]
            } else {
                let a = interleaved[i0 * channels + c];
                let b = interleaved[(i0 + 1) * channels + c];
                a + (b - a) * frac
            };
        }
    }

    out
}

/// Adapt a clip to an output device's native format
///
/// # Errors
///
/// Returns error if the device reports no output channels or the clip has none
pub fn route_clip(clip: &AudioClip, device: DeviceFormat) -> Result<AudioClip> {
    if device.channels == 0 {
        return Err(Error::Audio(
            "selected output device has no output channels".to_string(),
        ));
    }
    if clip.channels == 0 {
        return Err(Error::Audio("clip has no channels".to_string()));
    }

    let mut routed = clip.clone();

    if device.sample_rate > 0 && device.sample_rate != clip.sample_rate {
        routed.samples = resample_linear(
            &clip.samples,
            clip.channels,
            clip.sample_rate,
            device.sample_rate,
        );
        routed.sample_rate = device.sample_rate;
    }

    if routed.channels > device.channels {
        let mono = downmix_to_mono(&routed.samples, routed.channels);
        let width = usize::from(device.channels);
        routed.samples = mono
            .iter()
            .flat_map(|&s| std::iter::repeat_n(s, width))
            .collect();
        routed.channels = device.channels;
    }

    Ok(routed)
}

/// Interruptible playback on the selected device, routed to its native format
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutedPlayback;

impl PlaybackStrategy for RoutedPlayback {
    fn name(&self) -> &'static str {
        "routed"
    }

    fn play(
        &self,
        backend: &dyn AudioBackend,
        clip: &AudioClip,
        device: &DeviceSelector,
        interrupted: &Signal,
        stop: &Signal,
    ) -> Result<bool> {
        let native = backend.output_format(device)?;
        let routed = route_clip(clip, native)?;

        let format = DeviceFormat {
            sample_rate: routed.sample_rate,
            channels: routed.channels,
        };
        let mut sink = backend.open_output(device, format)?;

        tracing::debug!(
            device = %device,
            sample_rate = format.sample_rate,
            channels = format.channels,
            frames = routed.frames(),
            "routed playback started"
        );

        // 100 ms of audio per write
        let chunk_frames = (routed.sample_rate / 10).max(1) as usize;
        let chunk_len = chunk_frames * usize::from(routed.channels);

        for chunk in routed.samples.chunks(chunk_len) {
            if interrupted.is_set() || stop.is_set() {
                tracing::debug!("playback cut short");
                return Ok(true);
            }
            sink.write(chunk)?;
        }

        sink.drain()?;
        Ok(false)
    }
}

/// Plain playback on the backend's default output path, not interruptible
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePlayback;

impl PlaybackStrategy for SimplePlayback {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn play(
        &self,
        backend: &dyn AudioBackend,
        clip: &AudioClip,
        _device: &DeviceSelector,
        _interrupted: &Signal,
        stop: &Signal,
    ) -> Result<bool> {
        if stop.is_set() {
            return Ok(true);
        }
        backend.play_simple(clip)?;
        Ok(false)
    }
}

/// Ordered list of playback strategies
pub struct PlaybackEngine {
    strategies: Vec<Box<dyn PlaybackStrategy>>,
}

impl fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new(vec![Box::new(RoutedPlayback), Box::new(SimplePlayback)])
    }
}

impl PlaybackEngine {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn PlaybackStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies, in the order they are tried
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Play a clip with the first strategy that succeeds
    ///
    /// # Errors
    ///
    /// Returns the last strategy's error if every strategy fails
    pub fn play(
        &self,
        backend: &dyn AudioBackend,
        clip: &AudioClip,
        device: &DeviceSelector,
        interrupted: &Signal,
        stop: &Signal,
    ) -> Result<PlaybackOutcome> {
        let mut first_failure: Option<String> = None;
        let mut last_error = Error::Audio("no playback strategy configured".to_string());

        for (index, strategy) in self.strategies.iter().enumerate() {
            match strategy.play(backend, clip, device, interrupted, stop) {
                Ok(stopped_early) => {
                    let route = if index == 0 {
                        PlaybackRoute::Routed
                    } else {
                        PlaybackRoute::Fallback {
                            strategy: strategy.name(),
                            reason: first_failure.unwrap_or_default(),
                        }
                    };
                    return Ok(PlaybackOutcome {
                        interrupted: stopped_early && interrupted.is_set(),
                        route,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "playback strategy failed"
                    );
                    first_failure.get_or_insert_with(|| format!("{}: {e}", strategy.name()));
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
