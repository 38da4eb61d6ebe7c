//! Feed connection lifecycle
//!
//! `Disconnected -> Connecting -> Subscribed -> Streaming -> Faulted(n) -> Reconnecting -> Connecting ...`
//!
//! Transport faults never end the loop. After each fault the handler gets a
//! chance to flush, then the connector sleeps for an exponentially growing,
//! jittered delay and reconnects.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::feed::message::{MessageKind, SubscriptionRequest};
use crate::geofence::BoundingBox;

/// Jitter factor bounds applied to every reconnect delay
pub const JITTER_RANGE: (f64, f64) = (0.8, 1.2);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed transport error: {0}")]
    Transport(#[source] Box<tungstenite::Error>),

    #[error("Failed to encode subscription request: {0}")]
    Subscription(#[from] serde_json::Error),

    #[error("Feed closed the connection{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    #[error("Feed stream ended")]
    EndOfStream,
}

impl From<tungstenite::Error> for FeedError {
    fn from(err: tungstenite::Error) -> Self {
        FeedError::Transport(Box::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
    /// Consecutive failed sessions so far
    Faulted(u32),
    Reconnecting,
}

/// Receives every payload read from the feed, in arrival order
#[async_trait]
pub trait FeedHandler: Send {
    async fn on_message(&mut self, raw: &str);

    /// Best-effort flush after a fault, before the reconnect delay
    async fn on_disconnect(&mut self);
}

pub struct StreamConnector {
    url: String,
    api_key: String,
    bounding_box: BoundingBox,
    kinds: Vec<MessageKind>,
    min_delay: Duration,
    max_delay: Duration,
    state: ConnectionState,
    attempt: u32,
    transitions: Option<mpsc::UnboundedSender<ConnectionState>>,
}

impl StreamConnector {
    pub fn new(config: &FeedConfig, kinds: &[MessageKind]) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            bounding_box: config.bounding_box,
            kinds: kinds.to_vec(),
            min_delay: config.reconnect_min_delay,
            max_delay: config.reconnect_max_delay,
            state: ConnectionState::Disconnected,
            attempt: 0,
            transitions: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed sessions; reset once a session streams
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Receive every state transition from now on
    pub fn watch_transitions(&mut self) -> mpsc::UnboundedReceiver<ConnectionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transitions = Some(tx);
        rx
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        if let Some(tx) = &self.transitions {
            if tx.send(state).is_err() {
                self.transitions = None;
            }
        }
    }

    /// Connect, stream and reconnect forever
    pub async fn run<H: FeedHandler>(&mut self, handler: &mut H) {
        loop {
            let fault = match self.connect_once(handler).await {
                Ok(()) => FeedError::EndOfStream,
                Err(e) => e,
            };

            self.attempt = self.attempt.saturating_add(1);
            self.set_state(ConnectionState::Faulted(self.attempt));
            warn!(error = %fault, attempt = self.attempt, "Feed connection lost");

            handler.on_disconnect().await;

            self.set_state(ConnectionState::Reconnecting);
            let jitter = rand::thread_rng().gen_range(JITTER_RANGE.0..=JITTER_RANGE.1);
            let delay = reconnect_delay(self.attempt, self.min_delay, self.max_delay, jitter);
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.attempt,
                "Reconnecting to feed"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Run one session until the connection ends
    ///
    /// Returns `Ok(())` when the stream ends without a close frame or error.
    pub async fn connect_once<H: FeedHandler>(&mut self, handler: &mut H) -> Result<(), FeedError> {
        self.set_state(ConnectionState::Connecting);
        debug!(url = %self.url, "Connecting to feed");

        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let request = SubscriptionRequest::new(&self.api_key, self.bounding_box, &self.kinds);
        let payload = serde_json::to_string(&request)?;
        sink.send(Message::Text(payload.into())).await?;

        self.set_state(ConnectionState::Subscribed);
        info!(
            kinds = ?self.kinds,
            bbox = ?self.bounding_box,
            "Subscribed to feed"
        );

        while let Some(frame) = stream.next().await {
            let frame = frame?;

            if self.state != ConnectionState::Streaming
                && matches!(frame, Message::Text(_) | Message::Binary(_))
            {
                self.attempt = 0;
                self.set_state(ConnectionState::Streaming);
                info!("Feed streaming");
            }

            match frame {
                Message::Text(text) => handler.on_message(text.as_str()).await,
                Message::Binary(data) => handler.on_message(&String::from_utf8_lossy(&data)).await,
                Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    return Err(FeedError::Closed(frame.map(|f| f.reason.as_str().to_string())));
                }
            }
        }

        Ok(())
    }
}

/// `min(max, min * 2^(attempt - 1)) * jitter`
pub fn reconnect_delay(attempt: u32, min: Duration, max: Duration, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30) as i32;
    let base = (min.as_secs_f64() * 2f64.powi(exponent)).min(max.as_secs_f64());
    Duration::from_secs_f64(base * jitter)
}
