//! One-pass environment diagnostics for `parley doctor`

use serde::Serialize;

use crate::Config;
use crate::audio::device::{self, DeviceInfo};
use crate::voice::EarshotModel;

/// Snapshot of what a voice session would find on this machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsReport {
    pub input_devices: usize,
    pub output_devices: usize,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
    /// Device enumeration failure, if any
    pub device_error: Option<String>,
    pub vad_loaded: bool,
    /// Why the voice-activity model could not be loaded
    pub vad_error: Option<String>,
    pub llm_key_present: bool,
    pub stt_key_present: bool,
    pub tts_key_present: bool,
}

impl DiagnosticsReport {
    /// Build a report from already-enumerated devices
    #[must_use]
    pub fn collect(
        devices: &[DeviceInfo],
        defaults: (Option<String>, Option<String>),
        config: &Config,
    ) -> Self {
        let vad = EarshotModel::new(config.session.capture.sample_rate);
        let has_key = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.is_empty());

        Self {
            input_devices: devices.iter().filter(|d| d.max_input_channels > 0).count(),
            output_devices: devices.iter().filter(|d| d.max_output_channels > 0).count(),
            default_input: defaults.0,
            default_output: defaults.1,
            device_error: None,
            vad_loaded: vad.is_ok(),
            vad_error: vad.err().map(|e| e.to_string()),
            llm_key_present: has_key(&config.llm.api_key),
            stt_key_present: has_key(&config.stt.api_key),
            tts_key_present: has_key(&config.tts.api_key),
        }
    }

    /// Whether a voice chat could start
    #[must_use]
    pub const fn ready(&self) -> bool {
        self.input_devices > 0 && self.vad_loaded && self.stt_key_present
    }
}

/// Enumerate the default host's devices and check the configured collaborators
#[must_use]
pub fn run(config: &Config) -> DiagnosticsReport {
    match device::list_devices() {
        Ok(devices) => {
            DiagnosticsReport::collect(&devices, device::default_device_names(), config)
        }
        Err(e) => {
            tracing::warn!(error = %e, "device enumeration failed");
            let mut report = DiagnosticsReport::collect(&[], (None, None), config);
            report.device_error = Some(e.to_string());
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::ParleyConfigFile;

    fn device(name: &str, inputs: u16, outputs: u16) -> DeviceInfo {
        DeviceInfo {
            index: 0,
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_sample_rate: Some(48_000),
        }
    }

    #[test]
    fn counts_devices_by_direction() {
        let config = Config::resolve(ParleyConfigFile::default(), |key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        let devices = [device("mic", 1, 0), device("speakers", 0, 2), device("headset", 1, 2)];

        let report = DiagnosticsReport::collect(
            &devices,
            (Some("mic".to_string()), Some("speakers".to_string())),
            &config,
        );

        assert_eq!(report.input_devices, 2);
        assert_eq!(report.output_devices, 2);
        assert!(report.vad_loaded);
        assert!(report.stt_key_present);
        assert!(report.ready());
    }

    #[test]
    fn unsupported_rate_reports_vad_error() {
        let mut config = Config::resolve(ParleyConfigFile::default(), |_| None).unwrap();
        config.session.capture.sample_rate = 48_000;

        let report = DiagnosticsReport::collect(&[], (None, None), &config);
        assert!(!report.vad_loaded);
        assert!(report.vad_error.is_some());
        assert!(!report.llm_key_present);
        assert!(!report.ready());
    }
}
