// Integration tests for WAV input and playback recording
//
// Fixtures are generated into a temp dir so the tests carry no binary files.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use deutschboost_voice::audio::{
    decode_inbound, AudioFile, CaptureConfig, Microphone, OutputFactory, PlaybackLane,
    WallClockOutputFactory, WavMicrophone,
};
use deutschboost_voice::error::CaptureError;

fn write_float_wav(path: &Path, sample_rate: u32, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_audio_file_open_float() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("learner.wav");
    write_float_wav(&path, 16000, &vec![0.5; 8000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.path.contains("learner.wav"));

    Ok(())
}

#[test]
fn test_audio_file_missing() {
    let result = AudioFile::open("/nonexistent/learner.wav");
    assert!(matches!(result, Err(CaptureError::Unavailable(_))));
}

#[tokio::test]
async fn test_wav_microphone_streams_file_contents() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("learner.wav");
    write_float_wav(&path, 16000, &vec![0.25; 320]);

    let mic = WavMicrophone::new(path);
    let stream = mic.acquire(&CaptureConfig::default()).await?;
    let (mut blocks, mut tracks) = stream.into_parts();

    let first = tokio::time::timeout(Duration::from_secs(1), blocks.recv())
        .await?
        .expect("stream ended")?;
    assert_eq!(first.len(), 320);
    assert!(first.iter().all(|s| (*s - 0.25).abs() < 1e-6));

    tracks.release();
    Ok(())
}

#[tokio::test]
async fn test_playback_recording_is_written_on_close() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let factory = WallClockOutputFactory::new(Some(dir.path().to_path_buf()));

    let output = factory.open("session-1", 24000)?;
    let mut lane = PlaybackLane::new(output);

    // 0.1s of model speech
    let payload = {
        use base64::Engine;
        let bytes: Vec<u8> = std::iter::repeat(8192i16)
            .take(2400)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    };
    lane.schedule(decode_inbound(&payload, 24000, 1)?)?;
    // Let the chunk finish so closing does not cut it
    tokio::time::sleep(Duration::from_millis(150)).await;
    lane.stop_all();

    let path = dir.path().join("session-1-model.wav");
    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.spec().channels, 1);
    assert!(reader.len() >= 2400);

    Ok(())
}
