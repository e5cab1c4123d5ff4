use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, warn};

use super::codec::{float_to_pcm16, AudioBuffer};
use crate::error::PlaybackError;

/// Handle for one scheduled playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

/// Audio output with its own playback clock (seconds).
pub trait AudioOutput: Send {
    fn current_time(&self) -> f64;

    /// Start `buffer` at absolute clock time `at`.
    fn start(&mut self, id: SourceId, buffer: Arc<AudioBuffer>, at: f64)
        -> Result<(), PlaybackError>;

    /// Stop a source immediately. Unknown or finished ids are ignored.
    fn stop(&mut self, id: SourceId);

    /// Release the output. Further calls are no-ops.
    fn close(&mut self) {}
}

/// Opens one output per session
pub trait OutputFactory: Send + Sync {
    fn open(
        &self,
        session_id: &str,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError>;
}

/// Output driven by the wall clock, optionally rendering to a WAV file.
pub struct WallClockOutput {
    origin: Instant,
    recorder: Option<TimelineRecorder>,
}

impl WallClockOutput {
    pub fn new(recorder: Option<TimelineRecorder>) -> Self {
        Self {
            origin: Instant::now(),
            recorder,
        }
    }
}

impl AudioOutput for WallClockOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(
        &mut self,
        id: SourceId,
        buffer: Arc<AudioBuffer>,
        at: f64,
    ) -> Result<(), PlaybackError> {
        if let Some(recorder) = &mut self.recorder {
            recorder.place(id, buffer, at);
        }
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        let now = self.current_time();
        if let Some(recorder) = &mut self.recorder {
            recorder.cut(id, now);
        }
    }

    fn close(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish() {
                warn!("Failed to write playback recording: {}", e);
            }
        }
    }
}

impl Drop for WallClockOutput {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct WallClockOutputFactory {
    record_dir: Option<PathBuf>,
}

impl WallClockOutputFactory {
    pub fn new(record_dir: Option<PathBuf>) -> Self {
        Self { record_dir }
    }
}

impl OutputFactory for WallClockOutputFactory {
    fn open(
        &self,
        session_id: &str,
        sample_rate: u32,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        let recorder = match &self.record_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;
                Some(TimelineRecorder::new(
                    dir.join(format!("{}-model.wav", session_id)),
                    sample_rate,
                ))
            }
            None => None,
        };
        Ok(Box::new(WallClockOutput::new(recorder)))
    }
}

struct Placed {
    id: SourceId,
    start_at: f64,
    cut_at: Option<f64>,
    buffer: Arc<AudioBuffer>,
}

/// Renders scheduled sources onto a timeline and writes it as 16-bit WAV.
///
/// Stopped sources are truncated at the stop time, so the file is what the
/// learner actually heard.
pub struct TimelineRecorder {
    path: PathBuf,
    sample_rate: u32,
    placed: Vec<Placed>,
}

impl TimelineRecorder {
    pub fn new(path: PathBuf, sample_rate: u32) -> Self {
        Self {
            path,
            sample_rate,
            placed: Vec::new(),
        }
    }

    fn place(&mut self, id: SourceId, buffer: Arc<AudioBuffer>, at: f64) {
        self.placed.push(Placed {
            id,
            start_at: at,
            cut_at: None,
            buffer,
        });
    }

    fn cut(&mut self, id: SourceId, at: f64) {
        if let Some(placed) = self.placed.iter_mut().find(|p| p.id == id) {
            placed.cut_at = Some(at.max(placed.start_at));
        }
    }

    /// Mix channel 0 of every source into one track.
    pub fn render(&self) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let mut track: Vec<f32> = Vec::new();

        for placed in &self.placed {
            let samples = placed.buffer.channel(0).unwrap_or(&[]);
            let offset = (placed.start_at * rate).round() as usize;
            let audible = match placed.cut_at {
                Some(cut) => (((cut - placed.start_at) * rate).round() as usize).min(samples.len()),
                None => samples.len(),
            };

            if track.len() < offset + audible {
                track.resize(offset + audible, 0.0);
            }
            for (i, &s) in samples[..audible].iter().enumerate() {
                track[offset + i] += s;
            }
        }

        track
    }

    pub fn finish(self) -> Result<PathBuf, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let track = self.render();
        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for sample in float_to_pcm16(&track) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        info!(
            "Playback recording written: {} ({:.1}s)",
            self.path.display(),
            track.len() as f64 / self.sample_rate as f64
        );

        Ok(self.path)
    }
}

/// A start request observed by a `ManualClock`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartRecord {
    pub id: SourceId,
    pub at: f64,
    pub duration: f64,
}

#[derive(Debug, Default)]
struct ManualState {
    now: f64,
    starts: Vec<StartRecord>,
    stops: Vec<SourceId>,
    closes: usize,
}

/// Externally driven clock shared by `ManualClockOutput`s.
///
/// Used for offline rendering and deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ManualState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn now(&self) -> f64 {
        self.with(|s| s.now)
    }

    pub fn set(&self, now: f64) {
        self.with(|s| s.now = now);
    }

    pub fn advance(&self, seconds: f64) {
        self.with(|s| s.now += seconds);
    }

    pub fn starts(&self) -> Vec<StartRecord> {
        self.with(|s| s.starts.clone())
    }

    pub fn stops(&self) -> Vec<SourceId> {
        self.with(|s| s.stops.clone())
    }

    pub fn closes(&self) -> usize {
        self.with(|s| s.closes)
    }
}

pub struct ManualClockOutput {
    clock: ManualClock,
    closed: bool,
}

impl ManualClockOutput {
    pub fn new() -> (Self, ManualClock) {
        let clock = ManualClock::new();
        (Self::with_clock(clock.clone()), clock)
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock,
            closed: false,
        }
    }
}

impl AudioOutput for ManualClockOutput {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn start(
        &mut self,
        id: SourceId,
        buffer: Arc<AudioBuffer>,
        at: f64,
    ) -> Result<(), PlaybackError> {
        if self.closed {
            return Err(PlaybackError::StartFailed("output closed".to_string()));
        }
        let duration = buffer.duration();
        self.clock
            .with(|s| s.starts.push(StartRecord { id, at, duration }));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.clock.with(|s| s.stops.push(id));
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.clock.with(|s| s.closes += 1);
        }
    }
}

/// Hands out `ManualClockOutput`s that all share one clock
#[derive(Debug, Clone, Default)]
pub struct ManualOutputFactory {
    clock: ManualClock,
}

impl ManualOutputFactory {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }
}

impl OutputFactory for ManualOutputFactory {
    fn open(
        &self,
        _session_id: &str,
        _sample_rate: u32,
    ) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        Ok(Box::new(ManualClockOutput::with_clock(self.clock.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_truncates_cut_sources() {
        let mut recorder = TimelineRecorder::new(PathBuf::from("unused.wav"), 10);
        recorder.place(SourceId(0), Arc::new(AudioBuffer::mono(vec![0.5; 10], 10)), 0.0);
        recorder.place(SourceId(1), Arc::new(AudioBuffer::mono(vec![0.25; 10], 10)), 1.0);
        recorder.cut(SourceId(1), 1.5);

        let track = recorder.render();

        assert_eq!(track.len(), 15);
        assert_eq!(track[9], 0.5);
        assert_eq!(track[10], 0.25);
        assert_eq!(track[14], 0.25);
    }

    #[test]
    fn test_recording_written_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WallClockOutputFactory::new(Some(dir.path().to_path_buf()));

        let mut output = factory.open("session-1", 24_000).unwrap();
        output
            .start(SourceId(0), Arc::new(AudioBuffer::mono(vec![0.1; 240], 24_000)), 0.0)
            .unwrap();
        output.close();

        let path = dir.path().join("session-1-model.wav");
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len(), 240);
    }

    #[test]
    fn test_manual_output_rejects_start_after_close() {
        let (mut output, clock) = ManualClockOutput::new();
        output.close();
        output.close();

        let result = output.start(SourceId(0), Arc::new(AudioBuffer::mono(vec![], 24_000)), 0.0);

        assert!(result.is_err());
        assert_eq!(clock.closes(), 1);
    }
}
