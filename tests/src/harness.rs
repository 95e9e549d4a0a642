//! # Multi-node Test Harness
//!
//! Builds engines on a [`MemoryNetwork`], runs their event loops and links
//! them. Every engine collects handler faults so tests can assert on them.

use ocpp_crypto::{Ed25519KeyPair, KeyRing};
use ocpp_exchange::adapters::MemoryNetwork;
use ocpp_exchange::{
    ActionFilter, CollectingReporter, Direction, ExchangeConfig, MessageExchange, RuleMode,
    SignatureMiddleware, SignaturePolicy,
};
use ocpp_types::{Action, NodeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// ACTIONS
// =============================================================================

/// `Reset` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    /// `Immediate` or `OnIdle`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// `Reset` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    /// `Accepted`, `Rejected` or `Scheduled`.
    pub status: String,
}

/// Action used throughout the suite.
pub struct Reset;

impl Action for Reset {
    const NAME: &'static str = "Reset";
    type Request = ResetRequest;
    type Response = ResetResponse;
}

/// `Reset { type: Immediate }`.
pub fn immediate() -> ResetRequest {
    ResetRequest {
        kind: "Immediate".to_string(),
    }
}

/// Response with the given status.
pub fn status(status: &str) -> ResetResponse {
    ResetResponse {
        status: status.to_string(),
    }
}

// =============================================================================
// NODES AND NETWORK
// =============================================================================

/// Node id from a literal.
pub fn node(id: &str) -> NodeId {
    NodeId::new(id).expect("valid node id")
}

/// One running engine.
#[derive(Clone)]
pub struct TestNode {
    /// The engine.
    pub exchange: Arc<MessageExchange>,
    /// Faults reported by its pipeline.
    pub reporter: Arc<CollectingReporter>,
}

impl TestNode {
    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.exchange.local().clone()
    }
}

/// Engines linked by in-memory connections.
pub struct TestNetwork {
    network: MemoryNetwork,
    nodes: Mutex<HashMap<NodeId, Arc<MessageExchange>>>,
    shutdown: CancellationToken,
}

impl TestNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::default(),
            nodes: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Unsigned node with default settings.
    pub fn add(&self, id: &str) -> TestNode {
        self.add_with(ExchangeConfig::for_node(id), SignatureMiddleware::disabled())
    }

    /// Node with explicit configuration and middleware. Its event loop starts
    /// immediately.
    pub fn add_with(&self, config: ExchangeConfig, middleware: SignatureMiddleware) -> TestNode {
        let id = node(&config.node_id);
        let (transport, events) = self.network.endpoint(id.clone());
        let reporter = Arc::new(CollectingReporter::new());
        let exchange = Arc::new(
            MessageExchange::builder(config)
                .transport(transport)
                .middleware(middleware)
                .reporter(reporter.clone())
                .build()
                .expect("valid exchange configuration"),
        );
        self.nodes.lock().insert(id, Arc::clone(&exchange));
        tokio::spawn(Arc::clone(&exchange).run(events, self.shutdown.clone()));
        TestNode { exchange, reporter }
    }

    fn engine(&self, id: &NodeId) -> Arc<MessageExchange> {
        Arc::clone(self.nodes.lock().get(id).expect("node added to network"))
    }

    /// Link two nodes and wait until both engines know about it.
    pub async fn link(&self, a: &str, b: &str) {
        let (a, b) = (node(a), node(b));
        self.network.link(&a, &b).await.expect("link");
        let (engine_a, engine_b) = (self.engine(&a), self.engine(&b));
        eventually(
            || {
                engine_a.topology().connection_for(&b).is_some()
                    && engine_b.topology().connection_for(&a).is_some()
            },
            "link to be registered",
        )
        .await;
    }

    /// Cut a link and wait until both engines noticed.
    pub async fn unlink(&self, a: &str, b: &str) {
        let (a, b) = (node(a), node(b));
        self.network.unlink(&a, &b).await.expect("unlink");
        let (engine_a, engine_b) = (self.engine(&a), self.engine(&b));
        eventually(
            || {
                engine_a.topology().connection_for(&b).is_none()
                    && engine_b.topology().connection_for(&a).is_none()
            },
            "link to be removed",
        )
        .await;
    }

    /// Rewrite every frame `from` sends to `to`.
    pub fn tamper(&self, from: &str, to: &str, rewrite: impl Fn(String) -> String + Send + Sync + 'static) {
        self.network
            .tamper(&node(from), &node(to), Arc::new(rewrite))
            .expect("tamper");
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestNetwork {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// How long [`eventually`] keeps polling, on the tokio clock.
pub const EVENTUALLY_DEADLINE: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds or [`EVENTUALLY_DEADLINE`] passes.
pub async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + EVENTUALLY_DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(condition(), "timed out waiting for {what}");
}

// =============================================================================
// SIGNING
// =============================================================================

/// Deterministic keypair for tests.
pub fn keypair(tag: u8) -> Ed25519KeyPair {
    Ed25519KeyPair::from_seed([tag; 32])
}

/// Middleware that signs `direction` with `key_id`.
pub fn signing(key_id: &str, keypair: Ed25519KeyPair, direction: Direction) -> SignatureMiddleware {
    let mut keys = KeyRing::new();
    keys.add_ed25519(key_id, keypair);
    let policy = SignaturePolicy::disabled().with_rule(
        direction,
        ActionFilter::Any,
        RuleMode::Sign(key_id.to_string()),
    );
    SignatureMiddleware::new(Arc::new(keys), Arc::new(policy))
}

/// Middleware that requires a valid signature by `key_id` on `direction`.
pub fn requiring(key_id: &str, keypair: &Ed25519KeyPair, direction: Direction) -> SignatureMiddleware {
    let mut keys = KeyRing::new();
    keys.add_ed25519_public(key_id, keypair.public_key());
    let policy =
        SignaturePolicy::disabled().with_rule(direction, ActionFilter::Any, RuleMode::Require);
    SignatureMiddleware::new(Arc::new(keys), Arc::new(policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_eventually_waits_on_the_tokio_clock() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(8)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        eventually(move || flag.load(Ordering::SeqCst), "flag").await;
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert!(started.elapsed() < EVENTUALLY_DEADLINE);
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "timed out waiting for never")]
    async fn test_eventually_gives_up_at_the_deadline() {
        eventually(|| false, "never").await;
    }
}
