//! Helpers shared by unit tests.

use crate::reporter::CollectingReporter;
use crate::security::SignatureMiddleware;
use crate::transport::{ConnectionId, SendOutcome, Transport};
use crate::{ExchangeConfig, MessageExchange};
use async_trait::async_trait;
use ocpp_types::{decode, Action, Frame, NodeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
}

pub struct Reset;

impl Action for Reset {
    const NAME: &'static str = "Reset";
    type Request = ResetRequest;
    type Response = ResetResponse;
}

/// Records every write; answers with a fixed outcome.
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, String)>>,
    outcome: Mutex<SendOutcome>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            outcome: Mutex::new(SendOutcome::Delivered),
        })
    }

    pub fn set_outcome(&self, outcome: SendOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn sent(&self) -> Vec<(ConnectionId, Frame)> {
        self.sent
            .lock()
            .iter()
            .map(|(connection, raw)| (*connection, decode(raw).unwrap()))
            .collect()
    }

    /// Wait until `count` frames were written.
    pub async fn wait_for(&self, count: usize) -> Vec<(ConnectionId, Frame)> {
        for _ in 0..1000 {
            if self.sent.lock().len() >= count {
                return self.sent();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} frames, got {}", self.sent.lock().len());
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, connection: ConnectionId, frame: String) -> SendOutcome {
        self.sent.lock().push((connection, frame));
        *self.outcome.lock()
    }
}

pub fn node(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

pub struct Harness {
    pub exchange: Arc<MessageExchange>,
    pub transport: Arc<RecordingTransport>,
    pub reporter: Arc<CollectingReporter>,
}

/// Engine for `local` with peers connected on connections 1, 2, ...
pub fn harness(
    config: ExchangeConfig,
    middleware: SignatureMiddleware,
    peers: &[&str],
) -> Harness {
    let transport = RecordingTransport::new();
    let reporter = Arc::new(CollectingReporter::new());
    let exchange = MessageExchange::builder(config)
        .transport(transport.clone())
        .middleware(middleware)
        .reporter(reporter.clone())
        .build()
        .unwrap();
    for (index, peer) in peers.iter().enumerate() {
        exchange.connection_opened(ConnectionId::new(index as u64 + 1), node(peer));
    }
    Harness {
        exchange: Arc::new(exchange),
        transport,
        reporter,
    }
}
