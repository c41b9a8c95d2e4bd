//! Barge-in monitoring
//!
//! While a reply plays, a dedicated thread listens on its own input stream and
//! raises the interruption signal on the first speech block. The playback
//! engine polls that signal between chunks.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioBackend, BlockRead, mic_level};
use crate::config::CaptureConfig;
use crate::events::{EventSink, TurnEvent};
use crate::signal::Signal;

use super::capture::BLOCK_WAIT;
use super::vad::VoiceActivityClassifier;

/// How long `finish` waits for the monitor thread to exit
pub const JOIN_BUDGET: Duration = Duration::from_millis(500);

/// Handle to a running barge-in monitor thread
#[derive(Debug)]
pub struct BargeInMonitor {
    interrupted: Signal,
    handle: Option<JoinHandle<()>>,
    done: mpsc::Receiver<bool>,
}

impl BargeInMonitor {
    /// Spawn the monitor thread
    ///
    /// If the input stream cannot be opened the thread emits
    /// `BargeInUnavailable` and exits without touching `interrupted`; playback
    /// then runs to completion.
    #[must_use]
    pub fn start(
        backend: Arc<dyn AudioBackend>,
        classifier: Arc<VoiceActivityClassifier>,
        config: &CaptureConfig,
        interrupted: Signal,
        stop: Signal,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (done_tx, done) = mpsc::channel();
        let device = config.input_device.clone();
        let sample_rate = config.sample_rate;
        let block_size = config.block_size();
        let flag = interrupted.clone();

        let spawned = std::thread::Builder::new()
            .name("parley-barge-in".to_string())
            .spawn(move || {
                let triggered = monitor(
                    backend.as_ref(),
                    &classifier,
                    &device,
                    sample_rate,
                    block_size,
                    &flag,
                    &stop,
                    sink.as_ref(),
                );
                // Receiver gone means finish() already gave up waiting
                let _ = done_tx.send(triggered);
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn barge-in monitor");
                None
            }
        };

        Self {
            interrupted,
            handle,
            done,
        }
    }

    /// Stop the monitor and wait for it to exit
    ///
    /// Sets the interruption signal if the monitor is still listening, then
    /// waits up to [`JOIN_BUDGET`]. Returns `true` if the monitor itself
    /// heard speech and raised the signal.
    pub fn finish(mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        if !handle.is_finished() {
            self.interrupted.set();
        }

        match self.done.recv_timeout(JOIN_BUDGET) {
            Ok(triggered) => {
                if handle.join().is_err() {
                    tracing::warn!("barge-in monitor panicked");
                }
                triggered
            }
            Err(_) => {
                tracing::warn!(
                    budget_ms = JOIN_BUDGET.as_millis(),
                    "barge-in monitor did not exit in time, detaching"
                );
                false
            }
        }
    }
}

/// Monitor loop; returns `true` if it raised the interruption
#[allow(clippy::too_many_arguments)]
fn monitor(
    backend: &dyn AudioBackend,
    classifier: &VoiceActivityClassifier,
    device: &crate::audio::DeviceSelector,
    sample_rate: u32,
    block_size: usize,
    interrupted: &Signal,
    stop: &Signal,
    sink: &dyn EventSink,
) -> bool {
    let mut source = match backend.open_input(device, sample_rate, block_size) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(error = %e, "barge-in unavailable");
            sink.emit(TurnEvent::BargeInUnavailable {
                error: e.to_string(),
            });
            return false;
        }
    };

    tracing::debug!(device = %device, "barge-in monitor listening");

    while !interrupted.is_set() && !stop.is_set() {
        let block = match source.next_block(BLOCK_WAIT) {
            Ok(BlockRead::Block(block)) => block,
            Ok(BlockRead::Pending) => continue,
            Ok(BlockRead::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "barge-in input failed");
                break;
            }
        };

        let decision = classifier.assess(&block.samples);
        sink.emit(TurnEvent::MicLevel {
            level: mic_level(decision.rms),
        });

        if decision.speech {
            let won = interrupted.set();
            tracing::debug!(rms = decision.rms, by_model = decision.by_model, "barge-in");
            return won;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemoryBackend;
    use crate::events::NullSink;
    use std::sync::Mutex;

    fn start(backend: MemoryBackend, interrupted: &Signal) -> BargeInMonitor {
        BargeInMonitor::start(
            Arc::new(backend),
            Arc::new(VoiceActivityClassifier::energy_only(0.1)),
            &CaptureConfig::default(),
            interrupted.clone(),
            Signal::new(),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn speech_raises_the_signal() {
        let backend = MemoryBackend::new().with_input(vec![vec![0.0; 512], vec![0.5; 512]]);
        let interrupted = Signal::new();
        let monitor = start(backend, &interrupted);

        std::thread::sleep(Duration::from_millis(50));
        assert!(interrupted.is_set());
        assert!(monitor.finish());
    }

    #[test]
    fn silence_leaves_signal_to_finish() {
        let backend = MemoryBackend::new()
            .with_input(vec![vec![0.0; 512]; 200])
            .with_pace(Duration::from_millis(5));
        let interrupted = Signal::new();
        let monitor = start(backend, &interrupted);

        std::thread::sleep(Duration::from_millis(30));
        assert!(!interrupted.is_set());
        assert!(!monitor.finish());
        assert!(interrupted.is_set());
    }

    #[test]
    fn open_failure_reports_unavailable() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&events);
        let sink = move |event: TurnEvent| recorded.lock().unwrap().push(event);

        let interrupted = Signal::new();
        let monitor = BargeInMonitor::start(
            Arc::new(MemoryBackend::new().with_failing_input("device busy")),
            Arc::new(VoiceActivityClassifier::energy_only(0.1)),
            &CaptureConfig::default(),
            interrupted.clone(),
            Signal::new(),
            Arc::new(sink),
        );
        assert!(!monitor.finish());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TurnEvent::BargeInUnavailable { error } if error.contains("device busy")
        ));
    }
}
