//! Node wiring.
//!
//! The configured node runs on an in-memory network next to a demo relay and
//! a demo charge point reachable only through that relay:
//!
//! ```text
//! <node> ── LC-DEMO ── CP-DEMO
//! ```
//!
//! Every `demo_interval` the node cancels a reservation at the charge point,
//! exercising routing, signing, correlation and dispatch end to end.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use ocpp_crypto::{Ed25519KeyPair, KeyRing, SharedSecret};
use ocpp_exchange::adapters::MemoryNetwork;
use ocpp_exchange::config::KeyKind;
use ocpp_exchange::{
    ActionFilter, Direction, ExchangeConfig, MessageExchange, RuleMode, SignatureMiddleware,
    SignaturePolicy,
};
use ocpp_types::{Action, NodeId, SourceRouting};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Demo relay id.
pub const DEMO_RELAY: &str = "LC-DEMO";
/// Demo charge point id.
pub const DEMO_CHARGE_POINT: &str = "CP-DEMO";

/// `CancelReservation` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationRequest {
    /// Reservation to cancel.
    pub reservation_id: i32,
}

/// `CancelReservation` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelReservationResponse {
    /// `Accepted` or `Rejected`.
    pub status: String,
}

/// The demo action.
pub struct CancelReservation;

impl Action for CancelReservation {
    const NAME: &'static str = "CancelReservation";
    type Request = CancelReservationRequest;
    type Response = CancelReservationResponse;
}

/// Running node plus demo peers.
pub struct NodeRuntime {
    node: Arc<MessageExchange>,
    charge_point: NodeId,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    /// Build every engine, link the network and start the event loops.
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        let network = MemoryNetwork::default();
        let shutdown = CancellationToken::new();
        let local = config.exchange.node().context("Invalid node id")?;
        let relay = NodeId::new(DEMO_RELAY).context("Invalid relay id")?;
        let charge_point = NodeId::new(DEMO_CHARGE_POINT).context("Invalid charge point id")?;

        let (transport, node_events) = network.endpoint(local.clone());
        let node = Arc::new(
            MessageExchange::builder(config.exchange.clone())
                .transport(transport)
                .build()
                .context("Failed to build node exchange")?,
        );
        node.topology().add_route(charge_point.clone(), relay.clone());

        let (transport, relay_events) = network.endpoint(relay.clone());
        let relay_exchange = Arc::new(
            MessageExchange::builder(ExchangeConfig::for_node(DEMO_RELAY))
                .transport(transport)
                .middleware(SignatureMiddleware::disabled())
                .build()
                .context("Failed to build demo relay")?,
        );

        let (transport, cp_events) = network.endpoint(charge_point.clone());
        let cp_exchange = Arc::new(
            MessageExchange::builder(ExchangeConfig::for_node(DEMO_CHARGE_POINT))
                .transport(transport)
                .middleware(peer_verifier(&config.exchange)?)
                .build()
                .context("Failed to build demo charge point")?,
        );
        register_demo_handlers(&cp_exchange)?;

        let tasks = vec![
            tokio::spawn(Arc::clone(&node).run(node_events, shutdown.clone())),
            tokio::spawn(relay_exchange.run(relay_events, shutdown.clone())),
            tokio::spawn(cp_exchange.run(cp_events, shutdown.clone())),
        ];

        network
            .link(&local, &relay)
            .await
            .context("Failed to link node and relay")?;
        network
            .link(&relay, &charge_point)
            .await
            .context("Failed to link relay and charge point")?;

        info!(
            node = %local,
            relay = %relay,
            charge_point = %charge_point,
            "Demo network linked"
        );

        Ok(Self {
            node,
            charge_point,
            shutdown,
            tasks,
        })
    }

    /// The configured node's engine.
    pub fn node(&self) -> &Arc<MessageExchange> {
        &self.node
    }

    /// Send one demo request and log the outcome.
    pub async fn cancel_reservation(
        &self,
        reservation_id: i32,
    ) -> Result<CancelReservationResponse> {
        let reply = self
            .node
            .call::<CancelReservation>(
                SourceRouting::to(self.charge_point.clone()),
                CancelReservationRequest { reservation_id },
            )
            .await
            .context("CancelReservation failed")?;
        info!(
            correlation_id = %reply.correlation_id,
            path = %reply.network_path,
            runtime_ms = reply.runtime.as_millis(),
            status = %reply.payload.status,
            "CancelReservation answered"
        );
        Ok(reply.payload)
    }

    /// Send a demo request every `interval` until `shutdown` fires.
    ///
    /// Returns how many exchanges were answered.
    pub async fn run_demo(&self, interval: Duration, shutdown: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reservation_id = 0;
        let mut answered = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    reservation_id += 1;
                    match self.cancel_reservation(reservation_id).await {
                        Ok(_) => answered += 1,
                        Err(e) => warn!(error = %format!("{e:#}"), "Demo exchange failed"),
                    }
                }
            }
        }
        debug!(answered, "Demo loop stopped");
        answered
    }

    /// Stop every event loop and wait for them.
    pub async fn shutdown(self) {
        info!("Shutting down node runtime");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Event loop ended abnormally");
            }
        }
        info!("Node runtime stopped");
    }
}

/// Middleware for the demo charge point: verify whatever the node signs.
fn peer_verifier(config: &ExchangeConfig) -> Result<SignatureMiddleware> {
    let mut keys = KeyRing::new();
    for key in &config.security.keys {
        match key.kind {
            KeyKind::Ed25519Seed => {
                let public = Ed25519KeyPair::from_hex_seed(&key.hex)
                    .with_context(|| format!("Invalid seed for key {}", key.id))?
                    .public_key();
                keys.add_ed25519_public(&key.id, public);
            }
            KeyKind::HmacSecret => {
                let secret = SharedSecret::from_hex(&key.hex)
                    .with_context(|| format!("Invalid secret for key {}", key.id))?;
                keys.add_hmac(&key.id, secret);
            }
            // Public keys of other peers mean nothing to the demo charge point.
            KeyKind::Ed25519Public => {}
        }
    }
    let policy = SignaturePolicy::disabled()
        .with_rule(
            Direction::IncomingRequest,
            ActionFilter::Any,
            RuleMode::VerifyPresent,
        )
        .with_freshness(
            config.security.max_signature_age,
            config.security.max_future_skew,
        );
    Ok(SignatureMiddleware::new(Arc::new(keys), Arc::new(policy)))
}

fn register_demo_handlers(exchange: &MessageExchange) -> Result<()> {
    let registry = exchange.registry();
    registry.observe::<CancelReservation, _>(|ctx, request| {
        info!(
            correlation_id = %ctx.correlation_id,
            path = %ctx.network_path,
            reservation_id = request.reservation_id,
            "Reservation cancel requested"
        );
    })?;
    registry.process::<CancelReservation, _, _>(|_ctx, request| async move {
        let status = if request.reservation_id >= 0 {
            "Accepted"
        } else {
            "Rejected"
        };
        Ok(Some(CancelReservationResponse {
            status: status.to_string(),
        }))
    })?;
    Ok(())
}
