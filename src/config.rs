use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::{CaptureConfig, MicrophoneSource, INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE};
use crate::session::{LearnerProfile, SessionSettings};
use crate::transport::NatsTransportConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub learner: LearnerProfile,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    pub nats_url: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub frame_size: usize,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_duration_ms: u64,
    pub microphone: MicrophoneKind,
    /// WAV file fed as microphone input when `microphone = "file"`
    pub input_file: Option<PathBuf>,
    /// Write the model's speech to `<dir>/<session>-model.wav`
    pub record_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneKind {
    Silence,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub subject: String,
    pub fallback_dir: Option<PathBuf>,
}

fn default_subject_prefix() -> String {
    "realtime".to_string()
}

fn default_outbound_queue() -> usize {
    32
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            frame_size: capture.frame_size,
            input_sample_rate: OUTBOUND_SAMPLE_RATE,
            output_sample_rate: INBOUND_SAMPLE_RATE,
            block_duration_ms: capture.block_duration_ms,
            microphone: MicrophoneKind::Silence,
            input_file: None,
            record_dir: None,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subject: "feedback.evaluate".to_string(),
            fallback_dir: None,
        }
    }
}

impl Config {
    /// Load `path` (extension optional), then apply `DEUTSCHBOOST__*`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("DEUTSCHBOOST").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn transport(&self) -> NatsTransportConfig {
        NatsTransportConfig {
            url: self.realtime.nats_url.clone(),
            subject_prefix: self.realtime.subject_prefix.clone(),
            outbound_queue: self.realtime.outbound_queue,
            ..NatsTransportConfig::default()
        }
    }

    pub fn microphone(&self) -> Result<MicrophoneSource> {
        match self.audio.microphone {
            MicrophoneKind::Silence => Ok(MicrophoneSource::Silence),
            MicrophoneKind::File => match &self.audio.input_file {
                Some(path) => Ok(MicrophoneSource::File(path.clone())),
                None => anyhow::bail!("audio.microphone = \"file\" requires audio.input_file"),
            },
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            learner: self.learner.clone(),
            capture: CaptureConfig {
                sample_rate: self.audio.input_sample_rate,
                frame_size: self.audio.frame_size,
                block_duration_ms: self.audio.block_duration_ms,
                ..defaults.capture
            },
            output_sample_rate: self.audio.output_sample_rate,
            feedback_fallback_dir: self.feedback.fallback_dir.clone(),
            ..defaults
        }
    }
}
