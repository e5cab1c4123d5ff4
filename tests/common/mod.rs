// In-process fakes for the controller's collaborators

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deutschboost_voice::audio::{
    CaptureConfig, EncodedAudio, ManualClock, ManualOutputFactory, MediaTrack, MicBlock,
    MicStream, Microphone, TrackGuard,
};
use deutschboost_voice::error::{CaptureError, FeedbackError, TransportError};
use deutschboost_voice::feedback::{EvaluationRequest, Feedback, FeedbackService};
use deutschboost_voice::session::{
    SessionController, SessionDeps, SessionSettings, SessionSnapshot,
};
use deutschboost_voice::transport::{
    Connection, ConnectRequest, RealtimeSession, RealtimeTransport, TransportEvent,
};
use tokio::sync::mpsc;

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct MockSession {
    open: AtomicBool,
    closes: AtomicUsize,
    frames: Mutex<Vec<EncodedAudio>>,
}

impl MockSession {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<EncodedAudio> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RealtimeSession for MockSession {
    fn send_audio_frame(&self, payload: EncodedAudio) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        self.frames.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockTransport {
    connects: AtomicUsize,
    fail_with: Mutex<Option<TransportError>>,
    current: Mutex<Option<(Arc<MockSession>, mpsc::Sender<TransportEvent>)>>,
    requests: Mutex<Vec<ConnectRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: TransportError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn session(&self) -> Arc<MockSession> {
        let current = self.current.lock().unwrap();
        Arc::clone(&current.as_ref().expect("no connection yet").0)
    }

    /// Deliver an event on the most recent connection.
    pub async fn emit(&self, event: TransportEvent) {
        let (session, events) = {
            let current = self.current.lock().unwrap();
            let (session, events) = current.as_ref().expect("no connection yet");
            (Arc::clone(session), events.clone())
        };
        if event == TransportEvent::Open {
            session.open.store(true, Ordering::SeqCst);
        }
        // The controller may already have dropped the receiver
        let _ = events.send(event).await;
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(64);
        let session = Arc::new(MockSession::default());
        *self.current.lock().unwrap() = Some((Arc::clone(&session), tx));

        Ok(Connection {
            session,
            events: rx,
        })
    }
}

// ============================================================================
// Microphone
// ============================================================================

struct CountingTrack {
    stops: Arc<AtomicUsize>,
}

impl MediaTrack for CountingTrack {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockMicrophone {
    acquires: AtomicUsize,
    track_stops: Arc<AtomicUsize>,
    fail_with: Mutex<Option<CaptureError>>,
    blocks: Mutex<Option<mpsc::Sender<MicBlock>>>,
}

impl MockMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: CaptureError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// How many times a track was stopped across all acquisitions
    pub fn track_stops(&self) -> usize {
        self.track_stops.load(Ordering::SeqCst)
    }

    pub async fn push(&self, block: MicBlock) {
        let sender = self.blocks.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(block).await;
        }
    }

    /// End the device stream without an error
    pub fn hang_up(&self) {
        self.blocks.lock().unwrap().take();
    }
}

#[async_trait::async_trait]
impl Microphone for MockMicrophone {
    async fn acquire(&self, _config: &CaptureConfig) -> Result<MicStream, CaptureError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(64);
        *self.blocks.lock().unwrap() = Some(tx);

        let tracks = TrackGuard::new(vec![Box::new(CountingTrack {
            stops: Arc::clone(&self.track_stops),
        })]);
        Ok(MicStream::new(rx, tracks))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Feedback
// ============================================================================

pub fn sample_feedback() -> Feedback {
    Feedback {
        overall_score: 72,
        fluency: 70,
        grammar: 65,
        vocabulary: 80,
        pronunciation: 74,
        summary: "Solide Unterhaltung".to_string(),
        strengths: vec!["Wortschatz".to_string()],
        corrections: Vec::new(),
    }
}

pub struct MockFeedback {
    result: Result<Feedback, FeedbackError>,
    requests: Mutex<Vec<EvaluationRequest>>,
}

impl MockFeedback {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            result: Ok(sample_feedback()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: FeedbackError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<EvaluationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FeedbackService for MockFeedback {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<Feedback, FeedbackError> {
        self.requests.lock().unwrap().push(request);
        self.result.clone()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub transport: Arc<MockTransport>,
    pub microphone: Arc<MockMicrophone>,
    pub clock: ManualClock,
    pub feedback: Option<Arc<MockFeedback>>,
}

impl Harness {
    pub fn new(feedback: Option<Arc<MockFeedback>>) -> Self {
        Self::with_settings(feedback, SessionSettings::default())
    }

    pub fn with_settings(feedback: Option<Arc<MockFeedback>>, settings: SessionSettings) -> Self {
        let transport = MockTransport::new();
        let microphone = MockMicrophone::new();
        let clock = ManualClock::new();

        let deps = SessionDeps {
            transport: transport.clone(),
            microphone: microphone.clone(),
            outputs: Arc::new(ManualOutputFactory::new(clock.clone())),
            feedback: feedback
                .clone()
                .map(|f| f as Arc<dyn FeedbackService>),
        };

        Self {
            controller: SessionController::spawn(deps, settings),
            transport,
            microphone,
            clock,
            feedback,
        }
    }

    /// Wait until the published snapshot satisfies `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let mut rx = self.controller.watch_state();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for controller")
            .expect("controller gone")
            .clone();
        snapshot
    }
}

/// Little-endian 16-bit PCM, base64 encoded
pub fn pcm_payload(samples: &[i16]) -> String {
    use base64::Engine;
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
