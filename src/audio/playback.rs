//! Gapless scheduling of model speech with barge-in support
//!
//! Every chunk starts at `max(next_start_time, now)`, so chunks never overlap
//! and never start in the past. `interrupt` stops everything in flight and
//! rewinds the cursor so the next chunk plays relative to "now".
//!
//! Outputs do not report when a source finishes on its own. Sources whose
//! end time has passed are reaped on the next `schedule` or `interrupt`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::codec::AudioBuffer;
use super::output::{AudioOutput, SourceId};
use crate::error::PlaybackError;

/// Where and for how long a chunk was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    pub chunks_scheduled: u64,
    pub chunks_stopped: u64,
    pub interruptions: u64,
    pub decode_failures: u64,
}

pub struct PlaybackLane {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    active: BTreeMap<SourceId, ScheduledChunk>,
    next_id: u64,
    stats: PlaybackStats,
}

impl PlaybackLane {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
            stats: PlaybackStats::default(),
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ScheduledChunk> {
        self.active.values()
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn record_decode_failure(&mut self) {
        self.stats.decode_failures += 1;
    }

    /// Schedule `buffer` immediately after everything already scheduled.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Result<ScheduledChunk, PlaybackError> {
        let now = self.output.current_time();
        self.reap_finished(now);

        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration();
        let id = SourceId(self.next_id);

        self.output.start(id, Arc::new(buffer), start_at)?;

        self.next_id += 1;
        let chunk = ScheduledChunk {
            id,
            start_at,
            duration,
        };
        self.active.insert(id, chunk);
        self.next_start_time = start_at + duration;
        self.stats.chunks_scheduled += 1;

        debug!(
            "Scheduled chunk {:?} at {:.3}s for {:.3}s ({} active)",
            id,
            start_at,
            duration,
            self.active.len()
        );

        Ok(chunk)
    }

    /// Stop every in-flight source and rewind the cursor. Returns how many
    /// sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let now = self.output.current_time();
        self.reap_finished(now);

        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
        self.stats.interruptions += 1;
        self.stats.chunks_stopped += stopped as u64;

        if stopped > 0 {
            info!("Playback interrupted, {} source(s) stopped", stopped);
        }
        stopped
    }

    /// Teardown variant of `interrupt`; also closes the output.
    pub fn stop_all(&mut self) {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
        self.stats.chunks_stopped += stopped as u64;
        self.output.close();
        debug!("Playback stopped ({} source(s) cut)", stopped);
    }

    fn reap_finished(&mut self, now: f64) {
        self.active.retain(|_, chunk| chunk.end_at() > now);
    }
}
