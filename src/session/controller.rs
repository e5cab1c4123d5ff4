//! Realtime conversation state machine
//!
//! ```text
//! idle/error --start--> connecting --open--> connected --stop--> stopping
//!                            |                   |                  |
//!                            +----error----------+--> error         +--> evaluating --> idle
//!                                                                   +--> idle (empty transcript)
//! ```
//!
//! All state lives in one actor task. Commands from handles, transport
//! events, capture progress, capture faults and evaluation results are
//! processed one at a time, so teardown never races with itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::config::{ConversationMode, SessionSettings};
use super::stats::{
    EvaluationOutcome, SessionNotice, SessionSnapshot, SessionState, SessionSummary, StartOutcome,
    StopOutcome,
};
use crate::audio::{
    decode_inbound, CaptureFault, CaptureLane, CaptureStats, MicStream, Microphone,
    OutputFactory, PlaybackLane,
};
use crate::error::{SessionError, TransportError};
use crate::feedback::{EvaluationRequest, FeedbackService};
use crate::transcript::{Speaker, TranscriptAggregator, Turn};
use crate::transport::{
    ConnectRequest, RealtimeSession, RealtimeTransport, ServerContent, TransportEvent,
};

/// Collaborators injected into the controller
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn RealtimeTransport>,
    pub microphone: Arc<dyn Microphone>,
    pub outputs: Arc<dyn OutputFactory>,
    pub feedback: Option<Arc<dyn FeedbackService>>,
}

enum Command {
    Start {
        mode: ConversationMode,
        reply: oneshot::Sender<Result<StartOutcome, SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct EvaluationDone {
    summary: SessionSummary,
    evaluation: EvaluationOutcome,
    reply: oneshot::Sender<StopOutcome>,
}

/// Handle to the session controller
///
/// Cheap to clone. When the last handle is dropped the controller tears
/// down any active session (without evaluation) and exits.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionController {
    /// Spawn the controller task. Must be called within a tokio runtime.
    pub fn spawn(deps: SessionDeps, settings: SessionSettings) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (notice_tx, _) = broadcast::channel(settings.notice_capacity.max(1));
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (eval_tx, eval_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            deps,
            settings,
            commands: command_rx,
            faults_tx: fault_tx,
            faults_rx: fault_rx,
            evals_tx: eval_tx,
            evals_rx: eval_rx,
            snapshot: snapshot_tx,
            notices: notice_tx.clone(),
            state: SessionState::Idle,
            session: None,
            generation: 0,
            last_error: None,
            last_feedback: None,
            retained: SessionSnapshot::default(),
        };

        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            notices: notice_tx,
        }
    }

    /// Acquire the microphone and open the realtime transport.
    ///
    /// Returns `AlreadyActive` without acquiring anything if a session is in
    /// progress.
    pub async fn start(&self, mode: ConversationMode) -> Result<StartOutcome, SessionError> {
        let state = self.state();
        if state.is_busy() {
            info!("Start ignored, session already {:?}", state);
            return Ok(StartOutcome::AlreadyActive { state });
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { mode, reply })
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)?
    }

    /// End the active session and run evaluation. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<StopOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)
    }

    /// Tear down without evaluation and stop the controller (unmount).
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn transcript(&self) -> Vec<Turn> {
        self.snapshot.borrow().transcript.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Wait until the controller reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) -> Result<(), SessionError> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|s| s.state == state)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::ControllerGone)
    }
}

#[derive(Debug, Clone, Copy)]
enum ExitPath {
    ExplicitStop,
    Unmount,
    Error,
}

struct ActiveSession {
    id: String,
    generation: u64,
    mode: ConversationMode,
    started_at: DateTime<Utc>,
    transport: Option<Arc<dyn RealtimeSession>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Acquired microphone waiting for the transport to open
    pending_mic: Option<MicStream>,
    capture: CaptureLane,
    capture_stats: watch::Receiver<CaptureStats>,
    playback: PlaybackLane,
    transcript: TranscriptAggregator,
}

struct Actor {
    deps: SessionDeps,
    settings: SessionSettings,
    commands: mpsc::Receiver<Command>,
    faults_tx: mpsc::UnboundedSender<CaptureFault>,
    faults_rx: mpsc::UnboundedReceiver<CaptureFault>,
    evals_tx: mpsc::UnboundedSender<EvaluationDone>,
    evals_rx: mpsc::UnboundedReceiver<EvaluationDone>,
    snapshot: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    state: SessionState,
    session: Option<ActiveSession>,
    generation: u64,
    last_error: Option<String>,
    last_feedback: Option<crate::feedback::Feedback>,
    /// Snapshot of the last ended session, shown while idle
    retained: SessionSnapshot,
}

enum SessionInput {
    Transport(Option<TransportEvent>),
    CaptureProgress,
}

/// Next transport event or capture counter change of the active session.
async fn next_session_input(session: &mut Option<ActiveSession>) -> SessionInput {
    let Some(ActiveSession {
        events,
        capture_stats,
        ..
    }) = session.as_mut()
    else {
        return std::future::pending().await;
    };

    tokio::select! {
        event = async {
            match events.as_mut() {
                Some(events) => events.recv().await,
                None => std::future::pending().await,
            }
        } => SessionInput::Transport(event),
        Ok(()) = capture_stats.changed() => SessionInput::CaptureProgress,
    }
}

impl Actor {
    async fn run(mut self) {
        info!("Session controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start { mode, reply }) => {
                        let result = self.start(mode).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop { reply }) => self.stop(reply).await,
                    Some(Command::Shutdown { reply }) => {
                        self.teardown(ExitPath::Unmount).await;
                        self.set_state(SessionState::Idle);
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.teardown(ExitPath::Unmount).await;
                        break;
                    }
                },
                input = next_session_input(&mut self.session) => match input {
                    SessionInput::Transport(event) => self.on_transport_event(event).await,
                    SessionInput::CaptureProgress => self.publish(),
                },
                Some(fault) = self.faults_rx.recv() => self.on_capture_fault(fault).await,
                Some(done) = self.evals_rx.recv() => self.on_evaluation_done(done),
            }
        }

        info!("Session controller stopped");
    }

    async fn start(&mut self, mode: ConversationMode) -> Result<StartOutcome, SessionError> {
        if self.session.is_some() || self.state.is_busy() {
            info!("Start ignored, session already {:?}", self.state);
            return Ok(StartOutcome::AlreadyActive { state: self.state });
        }

        self.generation += 1;
        let generation = self.generation;
        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        self.last_error = None;
        self.last_feedback = None;
        self.retained = SessionSnapshot::default();

        info!("Starting conversation session {} ({})", session_id, mode);
        self.set_state(SessionState::Connecting);

        let mut mic = match self.deps.microphone.acquire(&self.settings.capture).await {
            Ok(mic) => mic,
            Err(e) => return Err(self.fail_start(e.into())),
        };
        info!("Microphone acquired: {}", self.deps.microphone.name());

        let output = match self
            .deps
            .outputs
            .open(&session_id, self.settings.output_sample_rate)
        {
            Ok(output) => output,
            Err(e) => {
                mic.release();
                return Err(self.fail_start(e.into()));
            }
        };
        let mut playback = PlaybackLane::new(output);

        let request = ConnectRequest {
            session_id: session_id.clone(),
            mode,
            learner: self.settings.learner.clone(),
            input_sample_rate: self.settings.capture.sample_rate,
            output_sample_rate: self.settings.output_sample_rate,
        };

        let connection = match self.deps.transport.connect(request).await {
            Ok(connection) => connection,
            Err(e) => {
                mic.release();
                playback.stop_all();
                return Err(self.fail_start(e.into()));
            }
        };

        let capture = CaptureLane::new(self.settings.capture.frame_size);
        let capture_stats = capture.watch_stats();

        self.session = Some(ActiveSession {
            id: session_id.clone(),
            generation,
            mode,
            started_at,
            transport: Some(connection.session),
            events: Some(connection.events),
            pending_mic: Some(mic),
            capture,
            capture_stats,
            playback,
            transcript: TranscriptAggregator::new(),
        });
        self.publish();

        info!("Session {} waiting for transport to open", session_id);
        Ok(StartOutcome::Started { session_id })
    }

    fn fail_start(&mut self, error: SessionError) -> SessionError {
        error!("Failed to start session: {}", error);
        self.last_error = Some(error.to_string());
        self.set_state(SessionState::Error);
        self.notify(SessionNotice::Error {
            message: error.to_string(),
        });
        error
    }

    async fn stop(&mut self, reply: oneshot::Sender<StopOutcome>) {
        if self.session.is_none()
            || !matches!(self.state, SessionState::Connecting | SessionState::Connected)
        {
            debug!("Stop requested with no active session ({:?})", self.state);
            let _ = reply.send(StopOutcome::NotRunning);
            return;
        }

        self.set_state(SessionState::Stopping);

        let summary = match self.teardown(ExitPath::ExplicitStop).await {
            Some(summary) => summary,
            None => {
                self.set_state(SessionState::Idle);
                let _ = reply.send(StopOutcome::NotRunning);
                return;
            }
        };

        let feedback = self
            .deps
            .feedback
            .clone()
            .filter(|_| !summary.transcript.is_empty());
        let feedback = match feedback {
            Some(feedback) => feedback,
            None => {
                info!(
                    "Session {} ended without evaluation ({} turns)",
                    summary.session_id,
                    summary.transcript.len()
                );
                self.set_state(SessionState::Idle);
                let _ = reply.send(StopOutcome::Ended {
                    summary,
                    evaluation: EvaluationOutcome::Skipped,
                });
                return;
            }
        };

        self.set_state(SessionState::Evaluating);

        let request = EvaluationRequest {
            session_id: summary.session_id.clone(),
            mode: summary.mode,
            learner: self.settings.learner.clone(),
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            transcript: summary.transcript.clone(),
        };
        let fallback_dir = self.settings.feedback_fallback_dir.clone();
        let done = self.evals_tx.clone();

        tokio::spawn(async move {
            let evaluation = match feedback.evaluate(request).await {
                Ok(feedback) => EvaluationOutcome::Completed { feedback },
                Err(e) => {
                    warn!("Feedback for session {} failed: {}", summary.session_id, e);
                    let saved_to = match fallback_dir {
                        Some(dir) => match save_transcript(&dir, &summary).await {
                            Ok(path) => {
                                info!("Transcript saved to {}", path.display());
                                Some(path.display().to_string())
                            }
                            Err(e) => {
                                error!("Failed to save transcript: {}", e);
                                None
                            }
                        },
                        None => None,
                    };
                    EvaluationOutcome::Failed {
                        error: e.to_string(),
                        saved_to,
                    }
                }
            };

            let _ = done.send(EvaluationDone {
                summary,
                evaluation,
                reply,
            });
        });
    }

    fn on_evaluation_done(&mut self, done: EvaluationDone) {
        match &done.evaluation {
            EvaluationOutcome::Completed { feedback } => {
                info!(
                    "Feedback ready for session {} (score {})",
                    done.summary.session_id, feedback.overall_score
                );
                self.last_feedback = Some(feedback.clone());
                self.notify(SessionNotice::FeedbackReady {
                    feedback: feedback.clone(),
                });
            }
            EvaluationOutcome::Failed { error, .. } => {
                self.last_error = Some(error.clone());
                self.notify(SessionNotice::FeedbackFailed {
                    message: error.clone(),
                });
            }
            EvaluationOutcome::Skipped => {}
        }

        if self.state == SessionState::Evaluating {
            self.set_state(SessionState::Idle);
        }

        let _ = done.reply.send(StopOutcome::Ended {
            summary: done.summary,
            evaluation: done.evaluation,
        });
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        let event = match event {
            Some(event) => event,
            None => {
                if let Some(session) = self.session.as_mut() {
                    session.events = None;
                }
                if matches!(self.state, SessionState::Connecting | SessionState::Connected) {
                    self.fail(TransportError::Closed("event stream ended".to_string()).into())
                        .await;
                }
                return;
            }
        };

        match event {
            TransportEvent::Open => self.on_open().await,
            TransportEvent::Message(content) => self.on_content(content),
            TransportEvent::Error(e) => self.fail(e.into()).await,
            TransportEvent::Closed { reason } => {
                if matches!(self.state, SessionState::Connecting | SessionState::Connected) {
                    let reason = reason.unwrap_or_else(|| "closed by remote".to_string());
                    self.fail(TransportError::Closed(reason).into()).await;
                } else {
                    debug!("Transport closed in state {:?}", self.state);
                }
            }
        }
    }

    async fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!("Ignoring transport open in state {:?}", self.state);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (Some(mut mic), Some(transport)) =
            (session.pending_mic.take(), session.transport.clone())
        else {
            warn!("Transport opened without a pending microphone");
            return;
        };

        // Audio captured while connecting is stale, never send it late
        match mic.discard_backlog() {
            Ok(samples) => session.capture.record_discarded(samples),
            Err(e) => {
                mic.release();
                self.fail(e.into()).await;
                return;
            }
        }

        session
            .capture
            .attach(mic, transport, self.faults_tx.clone(), session.generation);
        let session_id = session.id.clone();

        info!("Session {} connected", session_id);
        self.set_state(SessionState::Connected);
        self.notify(SessionNotice::Connected { session_id });
    }

    fn on_content(&mut self, content: ServerContent) {
        if self.state != SessionState::Connected {
            debug!("Ignoring server content in state {:?}", self.state);
            return;
        }
        let output_rate = self.settings.output_sample_rate;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(text) = content.input_transcription.as_deref() {
            session.transcript.apply_delta(Speaker::User, text);
        }
        if let Some(text) = content.output_transcription.as_deref() {
            session.transcript.apply_delta(Speaker::Model, text);
        }

        for payload in &content.audio {
            match decode_inbound(payload, output_rate, 1) {
                Ok(buffer) => {
                    if let Err(e) = session.playback.schedule(buffer) {
                        warn!("Failed to schedule model audio: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Dropping malformed audio chunk: {}", e);
                    session.playback.record_decode_failure();
                }
            }
        }

        let interrupted = if content.interrupted {
            Some(session.playback.interrupt())
        } else {
            None
        };

        if content.turn_complete {
            session.transcript.complete_turn();
        }

        self.publish();

        if let Some(stopped_sources) = interrupted {
            self.notify(SessionNotice::Interrupted { stopped_sources });
        }
    }

    async fn on_capture_fault(&mut self, fault: CaptureFault) {
        let current = self.session.as_ref().map(|s| s.generation);
        if current == Some(fault.generation) {
            self.fail(fault.error.into()).await;
        } else {
            debug!("Ignoring stale capture fault: {}", fault.error);
        }
    }

    /// Error path: release everything first, then surface the error.
    async fn fail(&mut self, error: SessionError) {
        error!("Session failed: {}", error);
        self.teardown(ExitPath::Error).await;
        self.last_error = Some(error.to_string());
        self.set_state(SessionState::Error);
        self.notify(SessionNotice::Error {
            message: error.to_string(),
        });
    }

    /// Release transport, microphone, capture tap and playback, in that order.
    ///
    /// Returns `None` when there was nothing to tear down.
    async fn teardown(&mut self, path: ExitPath) -> Option<SessionSummary> {
        let mut session = self.session.take()?;
        info!("Tearing down session {} ({:?})", session.id, path);

        // Anything still queued belongs to the old session
        session.events = None;
        if let Some(transport) = session.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Failed to close transport: {}", e);
            }
        }

        if let Some(mut mic) = session.pending_mic.take() {
            mic.release();
        }
        session.capture.detach().await;

        session.playback.stop_all();

        let ended_at = Utc::now();
        let summary = SessionSummary {
            session_id: session.id.clone(),
            mode: session.mode,
            started_at: session.started_at,
            ended_at,
            duration_secs: ended_at
                .signed_duration_since(session.started_at)
                .num_milliseconds() as f64
                / 1000.0,
            capture: session.capture.stats(),
            playback: session.playback.stats(),
            transcript: session.transcript.into_turns(),
        };

        self.retained = SessionSnapshot {
            state: self.state,
            session_id: Some(summary.session_id.clone()),
            mode: Some(summary.mode),
            started_at: Some(summary.started_at),
            transcript: summary.transcript.clone(),
            capture: summary.capture,
            playback: summary.playback,
            last_error: None,
            last_feedback: None,
        };
        self.publish();

        info!(
            "Session {} torn down ({} turns, {:.1}s)",
            summary.session_id,
            summary.transcript.len(),
            summary.duration_secs
        );

        Some(summary)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("Session state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.publish();
        self.notify(SessionNotice::StateChanged { state });
    }

    fn publish(&self) {
        let mut snapshot = match &self.session {
            Some(session) => SessionSnapshot {
                session_id: Some(session.id.clone()),
                mode: Some(session.mode),
                started_at: Some(session.started_at),
                transcript: session.transcript.turns().to_vec(),
                capture: session.capture.stats(),
                playback: session.playback.stats(),
                ..SessionSnapshot::default()
            },
            None => self.retained.clone(),
        };
        snapshot.state = self.state;
        snapshot.last_error = self.last_error.clone();
        snapshot.last_feedback = self.last_feedback.clone();

        self.snapshot.send_replace(snapshot);
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

async fn save_transcript(dir: &Path, summary: &SessionSummary) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}-transcript.json", summary.session_id));
    let json = serde_json::to_vec_pretty(summary)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}
