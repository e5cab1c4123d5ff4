use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{
    AudioFormat, AudioFrameMessage, ControlMessage, GatewayEvent, OpenReply, SessionOpenRequest,
};
use super::{ConnectRequest, Connection, RealtimeSession, RealtimeTransport, TransportEvent};
use crate::audio::EncodedAudio;
use crate::error::TransportError;

/// Settings for the NATS realtime gateway
#[derive(Debug, Clone)]
pub struct NatsTransportConfig {
    pub url: String,
    /// Subject prefix, e.g. "realtime"
    pub subject_prefix: String,
    /// Outbound audio frames buffered before frames are dropped
    pub outbound_queue: usize,
    /// Capacity of the inbound event channel
    pub event_queue: usize,
}

impl Default for NatsTransportConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "realtime".to_string(),
            outbound_queue: 32,
            event_queue: 256,
        }
    }
}

/// Connects realtime sessions through a gateway on NATS.
pub struct NatsTransport {
    config: NatsTransportConfig,
}

impl NatsTransport {
    pub fn new(config: NatsTransportConfig) -> Self {
        Self { config }
    }

    fn subject(&self, session_id: &str, leaf: &str) -> String {
        format!("{}.{}.{}", self.config.subject_prefix, session_id, leaf)
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for NatsTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        info!("Connecting to NATS at {}", self.config.url);

        let client = async_nats::connect(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        // Subscribe before asking for the session so the `open` event can't be missed
        let events_subject = self.subject(&request.session_id, "events");
        let subscriber = client
            .subscribe(events_subject.clone())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        info!("Subscribed to {}", events_subject);

        let open = SessionOpenRequest {
            session_id: request.session_id.clone(),
            mode: request.mode,
            learner: request.learner.clone(),
            input_audio: AudioFormat::pcm16_mono(request.input_sample_rate),
            output_audio: AudioFormat::pcm16_mono(request.output_sample_rate),
        };
        let payload =
            serde_json::to_vec(&open).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let reply = client
            .request(format!("{}.open", self.config.subject_prefix), payload.into())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        match serde_json::from_slice::<OpenReply>(&reply.payload) {
            Ok(OpenReply::Accepted) => {}
            Ok(OpenReply::Rejected { reason }) => return Err(TransportError::Rejected(reason)),
            Err(e) => return Err(TransportError::Protocol(format!("Bad open reply: {}", e))),
        }

        info!("Realtime session {} accepted by gateway", request.session_id);

        let ready = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue.max(1));
        let (audio_tx, audio_rx) = mpsc::channel(self.config.outbound_queue.max(1));

        let reader = tokio::spawn(read_events(subscriber, event_tx, Arc::clone(&ready)));
        let writer = tokio::spawn(write_frames(
            client.clone(),
            self.subject(&request.session_id, "audio"),
            audio_rx,
        ));

        let session = NatsSession {
            client,
            session_id: request.session_id.clone(),
            control_subject: self.subject(&request.session_id, "control"),
            audio_tx,
            ready,
            closed: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            tasks: Mutex::new(vec![reader, writer]),
        };

        Ok(Connection {
            session: Arc::new(session),
            events: event_rx,
        })
    }
}

/// One realtime session on the gateway
pub struct NatsSession {
    client: Client,
    session_id: String,
    control_subject: String,
    audio_tx: mpsc::Sender<AudioFrameMessage>,
    ready: Arc<AtomicBool>,
    closed: AtomicBool,
    sequence: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn abort_tasks(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl RealtimeSession for NatsSession {
    fn send_audio_frame(&self, payload: EncodedAudio) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("session closed".to_string()));
        }
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }

        let message = AudioFrameMessage {
            session_id: self.session_id.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            data: payload.data,
            mime_type: payload.mime_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        self.audio_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::Closed("writer stopped".to_string())
            }
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ready.store(false, Ordering::SeqCst);

        info!("Closing realtime session {}", self.session_id);

        let result = match serde_json::to_vec(&ControlMessage::Close) {
            Ok(payload) => self
                .client
                .publish(self.control_subject.clone(), payload.into())
                .await
                .map_err(|e| TransportError::Closed(e.to_string())),
            Err(e) => Err(TransportError::Protocol(e.to_string())),
        };

        if let Err(e) = self.client.flush().await {
            warn!("Failed to flush NATS connection on close: {}", e);
        }

        self.abort_tasks();
        result
    }

    fn is_open(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for NatsSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn read_events(
    mut subscriber: async_nats::Subscriber,
    events: mpsc::Sender<TransportEvent>,
    ready: Arc<AtomicBool>,
) {
    debug!("Gateway event reader started");

    while let Some(msg) = subscriber.next().await {
        let event = match serde_json::from_slice::<GatewayEvent>(&msg.payload) {
            Ok(GatewayEvent::Open) => {
                ready.store(true, Ordering::SeqCst);
                TransportEvent::Open
            }
            Ok(GatewayEvent::Content(content)) => TransportEvent::Message(content),
            Ok(GatewayEvent::Error { message }) => {
                TransportEvent::Error(TransportError::Remote(message))
            }
            Ok(GatewayEvent::Closed { reason }) => {
                ready.store(false, Ordering::SeqCst);
                TransportEvent::Closed { reason }
            }
            Err(e) => {
                warn!("Failed to parse gateway event: {}", e);
                continue;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Event receiver dropped, stopping reader");
            return;
        }
    }

    ready.store(false, Ordering::SeqCst);
    let _ = events
        .send(TransportEvent::Closed {
            reason: Some("event subscription ended".to_string()),
        })
        .await;
}

async fn write_frames(
    client: Client,
    subject: String,
    mut frames: mpsc::Receiver<AudioFrameMessage>,
) {
    while let Some(frame) = frames.recv().await {
        let payload = match serde_json::to_vec(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize audio frame {}: {}", frame.sequence, e);
                continue;
            }
        };

        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            error!("Failed to publish audio frame {}: {}", frame.sequence, e);
        }
    }
}
