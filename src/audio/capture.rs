//! Microphone -> transport bridge
//!
//! The lane taps an acquired `MicStream`, re-slices its raw blocks into
//! fixed-size frames, encodes each frame and hands it to the realtime
//! session. Frames the session cannot take right now (not open yet, or its
//! outbound queue is full) are dropped and counted rather than queued, so a
//! stalled network can never build an unbounded backlog.
//!
//! Counters live in a `watch` channel so the controller can republish its
//! snapshot as frames flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{MicBlock, MicStream, TrackGuard};
use super::codec::encode_outbound;
use crate::error::{CaptureError, TransportError};
use crate::transport::RealtimeSession;

/// A capture failure tagged with the session generation it belongs to.
#[derive(Debug, Clone)]
pub struct CaptureFault {
    pub generation: u64,
    pub error: CaptureError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

pub struct CaptureLane {
    frame_size: usize,
    tap: Option<JoinHandle<()>>,
    tracks: Option<TrackGuard>,
    detaching: Arc<AtomicBool>,
    stats: Arc<watch::Sender<CaptureStats>>,
}

impl CaptureLane {
    pub fn new(frame_size: usize) -> Self {
        let (stats, _) = watch::channel(CaptureStats::default());
        Self {
            frame_size: frame_size.max(1),
            tap: None,
            tracks: None,
            detaching: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(stats),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn is_attached(&self) -> bool {
        self.tap.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        *self.stats.borrow()
    }

    /// Receiver that is marked changed every time a counter moves
    pub fn watch_stats(&self) -> watch::Receiver<CaptureStats> {
        self.stats.subscribe()
    }

    /// Count `samples` of microphone audio that was never framed or sent.
    ///
    /// Partial frames round up.
    pub fn record_discarded(&self, samples: usize) {
        if samples == 0 {
            return;
        }
        let frames = samples.div_ceil(self.frame_size) as u64;
        self.stats.send_modify(|s| s.frames_dropped += frames);
        debug!("Discarded {} samples ({} frames) of stale capture", samples, frames);
    }

    /// Start streaming `stream` into `session`.
    ///
    /// Must be called from within a tokio runtime. If the lane is already
    /// attached the extra stream is released and the current tap kept.
    pub fn attach(
        &mut self,
        stream: MicStream,
        session: Arc<dyn RealtimeSession>,
        faults: mpsc::UnboundedSender<CaptureFault>,
        generation: u64,
    ) {
        if self.is_attached() {
            warn!("Capture lane already attached, releasing extra stream");
            let (_, mut tracks) = stream.into_parts();
            tracks.release();
            return;
        }

        let (blocks, tracks) = stream.into_parts();
        self.detaching.store(false, Ordering::SeqCst);

        let tap = Tap {
            frame_size: self.frame_size,
            session,
            stats: Arc::clone(&self.stats),
            detaching: Arc::clone(&self.detaching),
            faults,
            generation,
        };

        info!("Capture lane attached ({} samples/frame)", self.frame_size);

        self.tracks = Some(tracks);
        self.tap = Some(tokio::spawn(tap.run(blocks)));
    }

    /// Release the microphone tracks and disconnect the tap.
    ///
    /// Idempotent: detaching a detached lane does nothing.
    pub async fn detach(&mut self) {
        self.detaching.store(true, Ordering::SeqCst);

        if let Some(mut tracks) = self.tracks.take() {
            tracks.release();
        }

        if let Some(tap) = self.tap.take() {
            tap.abort();
            if let Err(e) = tap.await {
                if !e.is_cancelled() {
                    warn!("Capture tap panicked: {}", e);
                }
            }
            let stats = self.stats();
            info!(
                "Capture lane detached ({} frames sent, {} dropped)",
                stats.frames_sent, stats.frames_dropped
            );
        }
    }
}

impl Drop for CaptureLane {
    fn drop(&mut self) {
        self.detaching.store(true, Ordering::SeqCst);
        if let Some(mut tracks) = self.tracks.take() {
            tracks.release();
        }
        if let Some(tap) = self.tap.take() {
            tap.abort();
        }
    }
}

struct Tap {
    frame_size: usize,
    session: Arc<dyn RealtimeSession>,
    stats: Arc<watch::Sender<CaptureStats>>,
    detaching: Arc<AtomicBool>,
    faults: mpsc::UnboundedSender<CaptureFault>,
    generation: u64,
}

impl Tap {
    async fn run(self, mut blocks: mpsc::Receiver<MicBlock>) {
        let mut pending: Vec<f32> = Vec::with_capacity(self.frame_size * 2);

        while let Some(block) = blocks.recv().await {
            match block {
                Ok(samples) => {
                    pending.extend_from_slice(&samples);
                    while pending.len() >= self.frame_size {
                        let frame: Vec<f32> = pending.drain(..self.frame_size).collect();
                        self.send(&frame);
                    }
                }
                Err(error) => {
                    warn!("Microphone failed: {}", error);
                    self.fault(error);
                    return;
                }
            }
        }

        if !self.detaching.load(Ordering::SeqCst) {
            self.fault(CaptureError::StreamEnded);
        }
    }

    fn send(&self, frame: &[f32]) {
        let payload = encode_outbound(frame);
        match self.session.send_audio_frame(payload) {
            Ok(()) => {
                self.stats.send_modify(|s| s.frames_sent += 1);
            }
            Err(e) if e.is_frame_drop() => {
                self.stats.send_modify(|s| s.frames_dropped += 1);
                debug!(
                    "Dropped outbound frame ({}), {} total",
                    e,
                    self.stats.borrow().frames_dropped
                );
            }
            Err(TransportError::Closed(reason)) => {
                self.stats.send_modify(|s| s.frames_dropped += 1);
                debug!("Dropped outbound frame, transport closed: {}", reason);
            }
            Err(e) => {
                self.stats.send_modify(|s| s.frames_dropped += 1);
                warn!("Failed to send outbound frame: {}", e);
            }
        }
    }

    fn fault(&self, error: CaptureError) {
        let _ = self.faults.send(CaptureFault {
            generation: self.generation,
            error,
        });
    }
}
