use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::WavReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::backend::{CaptureConfig, MicBlock, MicStream, Microphone, TaskTrack, TrackGuard};
use crate::error::CaptureError;

/// Mono f32 audio loaded from a WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .map_err(|e| CaptureError::Unavailable(format!("{}: {}", path.display(), e)))?;

        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(CaptureError::UnsupportedFormat("zero channels".to_string()));
        }

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>(),
            (hound::SampleFormat::Float, 32) => {
                reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()
            }
            (format, bits) => {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "{:?} {}-bit",
                    format, bits
                )))
            }
        }
        .map_err(|e| CaptureError::Unavailable(format!("Failed to read samples: {}", e)))?;

        // Down-mix to mono by averaging channels
        let channels = spec.channels as usize;
        let samples: Vec<f32> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels",
            duration_seconds, spec.sample_rate, spec.channels
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            samples,
        })
    }
}

/// Plays a WAV file into the session as if it were spoken into a microphone.
///
/// After the file is exhausted the stream continues with silence, like a mic
/// in a quiet room.
pub struct WavMicrophone {
    path: PathBuf,
    name: String,
}

impl WavMicrophone {
    pub fn new(path: PathBuf) -> Self {
        let name = format!("wav:{}", path.display());
        Self { path, name }
    }
}

#[async_trait::async_trait]
impl Microphone for WavMicrophone {
    async fn acquire(&self, config: &CaptureConfig) -> Result<MicStream, CaptureError> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| CaptureError::Unavailable(e.to_string()))??;

        if audio.sample_rate != config.sample_rate {
            return Err(CaptureError::UnsupportedFormat(format!(
                "expected {}Hz, got {}Hz",
                config.sample_rate, audio.sample_rate
            )));
        }

        Ok(paced_stream(audio.samples, config))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Emits zero-valued blocks at the capture rate.
pub struct SilenceMicrophone;

impl SilenceMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SilenceMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Microphone for SilenceMicrophone {
    async fn acquire(&self, config: &CaptureConfig) -> Result<MicStream, CaptureError> {
        Ok(paced_stream(Vec::new(), config))
    }

    fn name(&self) -> &str {
        "silence"
    }
}

/// Spawn a task that feeds `samples` (then silence) in real time.
fn paced_stream(samples: Vec<f32>, config: &CaptureConfig) -> MicStream {
    let (tx, rx) = mpsc::channel::<MicBlock>(config.block_queue.max(1));
    let block_len = config.samples_per_block();
    let period = Duration::from_millis(config.block_duration_ms.max(1));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut cursor = 0usize;
        let mut overruns = 0u64;

        loop {
            ticker.tick().await;

            let mut block = vec![0.0f32; block_len];
            if cursor < samples.len() {
                let end = (cursor + block_len).min(samples.len());
                block[..end - cursor].copy_from_slice(&samples[cursor..end]);
                cursor = end;
            }

            match tx.try_send(Ok(block)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    overruns += 1;
                    if overruns % 50 == 1 {
                        warn!("Microphone overrun: {} block(s) dropped", overruns);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    });

    MicStream::new(rx, TrackGuard::new(vec![Box::new(TaskTrack::new(handle))]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_audio_file_downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16000, 2, &[16384, 0, -16384, -16384]);

        let audio = AudioFile::open(&path).unwrap();

        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, vec![0.25, -0.5]);
    }

    #[tokio::test]
    async fn test_wav_microphone_rejects_wrong_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hifi.wav");
        write_wav(&path, 48000, 1, &[0; 480]);

        let mic = WavMicrophone::new(path);
        let err = mic.acquire(&CaptureConfig::default()).await.err().unwrap();

        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let mic = WavMicrophone::new(PathBuf::from("/nonexistent/voice.wav"));
        let err = mic.acquire(&CaptureConfig::default()).await.err().unwrap();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_wav_microphone_delivers_file_then_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        write_wav(&path, 16000, 1, &[16384; 400]);

        let config = CaptureConfig {
            block_duration_ms: 20,
            ..CaptureConfig::default()
        };
        let mic = WavMicrophone::new(path);
        let (mut blocks, mut tracks) = mic.acquire(&config).await.unwrap().into_parts();

        let first = blocks.recv().await.unwrap().unwrap();
        let second = blocks.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 320);
        assert!(first.iter().all(|&s| s == 0.5));
        assert_eq!(&second[..80], &[0.5; 80][..]);
        assert!(second[80..].iter().all(|&s| s == 0.0));

        assert!(tracks.release());
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while blocks.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "stream should end once the track is stopped");
    }
}
