use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::codec::OUTBOUND_SAMPLE_RATE;
use crate::error::CaptureError;

/// One block of raw microphone samples, or the reason the device went away.
pub type MicBlock = Result<Vec<f32>, CaptureError>;

/// Configuration for microphone acquisition
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate (the realtime endpoint expects 16kHz)
    pub sample_rate: u32,
    /// Samples per outbound frame
    pub frame_size: usize,
    /// Duration of each raw device block in milliseconds
    pub block_duration_ms: u64,
    /// Capacity of the device -> lane block channel
    pub block_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTBOUND_SAMPLE_RATE,
            frame_size: 4096,
            block_duration_ms: 20,
            block_queue: 64,
        }
    }
}

impl CaptureConfig {
    pub fn samples_per_block(&self) -> usize {
        ((self.sample_rate as u64 * self.block_duration_ms) / 1000).max(1) as usize
    }
}

/// A live input track. Stopping it ends the device stream.
pub trait MediaTrack: Send {
    fn stop(&mut self);
}

/// Owns the tracks of an acquired stream and releases them at most once.
pub struct TrackGuard {
    tracks: Vec<Box<dyn MediaTrack>>,
    released: bool,
}

impl TrackGuard {
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self {
            tracks,
            released: false,
        }
    }

    /// Stop every track. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        for track in &mut self.tracks {
            track.stop();
        }
        debug!("Released {} media track(s)", self.tracks.len());
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// An acquired microphone: the block stream plus the tracks backing it.
pub struct MicStream {
    blocks: mpsc::Receiver<MicBlock>,
    tracks: TrackGuard,
}

impl MicStream {
    pub fn new(blocks: mpsc::Receiver<MicBlock>, tracks: TrackGuard) -> Self {
        Self { blocks, tracks }
    }

    pub fn release(&mut self) -> bool {
        self.tracks.release()
    }

    /// Throw away every block already queued and return how many samples
    /// they held. A queued device error is returned instead.
    pub fn discard_backlog(&mut self) -> Result<usize, CaptureError> {
        let mut samples = 0;
        while let Ok(block) = self.blocks.try_recv() {
            samples += block?.len();
        }
        Ok(samples)
    }

    pub fn into_parts(self) -> (mpsc::Receiver<MicBlock>, TrackGuard) {
        (self.blocks, self.tracks)
    }
}

/// Microphone acquisition
///
/// Implementations:
/// - `SilenceMicrophone`: paced zero blocks (headless sessions)
/// - `WavMicrophone`: a 16kHz WAV file paced in real time
#[async_trait::async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the input device and start delivering blocks
    async fn acquire(&self, config: &CaptureConfig) -> Result<MicStream, CaptureError>;

    /// Get microphone name for logging
    fn name(&self) -> &str;
}

/// Microphone source type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneSource {
    /// Digital silence
    Silence,
    /// WAV file input (demos, soak tests)
    File(PathBuf),
}

/// Microphone factory
pub struct MicrophoneFactory;

impl MicrophoneFactory {
    pub fn create(source: MicrophoneSource) -> Arc<dyn Microphone> {
        info!("Using microphone source: {:?}", source);
        match source {
            MicrophoneSource::Silence => Arc::new(super::file::SilenceMicrophone::new()),
            MicrophoneSource::File(path) => Arc::new(super::file::WavMicrophone::new(path)),
        }
    }
}

/// Track backed by the task that paces blocks into the stream
pub(crate) struct TaskTrack {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TaskTrack {
    pub(crate) fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl MediaTrack for TaskTrack {
    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
