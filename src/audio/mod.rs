pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod output;
pub mod playback;

pub use backend::{
    CaptureConfig, MediaTrack, MicBlock, MicStream, Microphone, MicrophoneFactory,
    MicrophoneSource, TrackGuard,
};
pub use capture::{CaptureFault, CaptureLane, CaptureStats};
pub use codec::{
    decode_inbound, decode_pcm_bytes, encode_outbound, AudioBuffer, EncodedAudio,
    INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE,
};
pub use file::{AudioFile, SilenceMicrophone, WavMicrophone};
pub use output::{
    AudioOutput, ManualClock, ManualClockOutput, ManualOutputFactory, OutputFactory, SourceId,
    StartRecord, TimelineRecorder, WallClockOutput, WallClockOutputFactory,
};
pub use playback::{PlaybackLane, PlaybackStats, ScheduledChunk};
