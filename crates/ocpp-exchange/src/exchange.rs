//! The message exchange engine.
//!
//! A [`MessageExchange`] is one node's view of the network. It sends typed
//! requests with [`MessageExchange::call`], answers and relays inbound frames
//! fed to it by a transport, and resolves each outstanding request exactly
//! once.

use crate::config::{ConfigError, ExchangeConfig, ResultSelection};
use crate::correlation::{cleanup_task, PendingRequestStore, PendingSnapshot, Resolution, Resolved};
use crate::registry::HandlerRegistry;
use crate::reporter::{ErrorReporter, TracingReporter};
use crate::routing::{Router, Topology};
use crate::security::{Direction, SignatureMiddleware};
use crate::transport::{ConnectionId, SendOutcome, Transport, TransportEvent};
use chrono::Utc;
use ocpp_types::{
    encode, Action, CorrelationId, ErrorCode, ErrorFrame, ExchangeFailure, Frame, NetworkPath,
    NodeId, OutcomeKind, RequestFrame, ResponseFrame, SourceRouting,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the configured default timeout.
    pub timeout: Option<Duration>,
    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Options with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReply<R> {
    /// Typed response payload.
    pub payload: R,
    /// Correlation id of the exchange.
    pub correlation_id: CorrelationId,
    /// Reply path: forward route plus the responder.
    pub network_path: NetworkPath,
    /// Time from sending to the reply.
    pub runtime: Duration,
}

/// Builder for [`MessageExchange`].
pub struct ExchangeBuilder {
    config: ExchangeConfig,
    transport: Option<Arc<dyn Transport>>,
    middleware: Option<SignatureMiddleware>,
    registry: Option<Arc<HandlerRegistry>>,
    topology: Option<Arc<Topology>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl ExchangeBuilder {
    /// Transport used to write frames. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Signature middleware; built from the security config when not given.
    pub fn middleware(mut self, middleware: SignatureMiddleware) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Handler registry to share.
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Topology to share.
    pub fn topology(mut self, topology: Arc<Topology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Error reporter; faults are logged when not given.
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(self) -> Result<MessageExchange, ConfigError> {
        self.config.validate()?;
        let local = self.config.node()?;

        let transport = self
            .transport
            .ok_or_else(|| ConfigError::Invalid("a transport is required".into()))?;

        let middleware = match self.middleware {
            Some(middleware) => middleware,
            None => {
                let (keys, policy) = self.config.security.build()?;
                SignatureMiddleware::new(Arc::new(keys), Arc::new(policy))
            }
        };

        let topology = self.topology.unwrap_or_default();
        let pending = Arc::new(PendingRequestStore::new(self.config.default_timeout));

        info!(
            node = %local,
            default_timeout_ms = self.config.default_timeout.as_millis(),
            rules = middleware.policy().rules().len(),
            "Message exchange ready"
        );

        Ok(MessageExchange {
            router: Router::new(local, topology),
            middleware,
            registry: self.registry.unwrap_or_default(),
            pending,
            transport,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TracingReporter)),
            default_timeout: self.config.default_timeout,
            sweep_interval: self.config.sweep_interval,
            result_selection: self.config.result_selection,
        })
    }
}

/// One node's message exchange engine.
pub struct MessageExchange {
    pub(crate) router: Router,
    pub(crate) middleware: SignatureMiddleware,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) pending: Arc<PendingRequestStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    default_timeout: Duration,
    sweep_interval: Duration,
    pub(crate) result_selection: ResultSelection,
}

impl MessageExchange {
    /// Start building an engine from `config`.
    pub fn builder(config: ExchangeConfig) -> ExchangeBuilder {
        ExchangeBuilder {
            config,
            transport: None,
            middleware: None,
            registry: None,
            topology: None,
            reporter: None,
        }
    }

    /// This node.
    pub fn local(&self) -> &NodeId {
        self.router.local()
    }

    /// Handlers for inbound requests.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Peers, static routes and uplink.
    pub fn topology(&self) -> &Arc<Topology> {
        self.router.topology()
    }

    /// Requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    /// Correlation counters.
    pub fn stats(&self) -> PendingSnapshot {
        self.pending.stats().snapshot()
    }

    /// Register a freshly opened connection to `peer`.
    pub fn connection_opened(&self, connection: ConnectionId, peer: NodeId) {
        if let Some(previous) = self.topology().connect(peer.clone(), connection) {
            warn!(
                peer = %peer,
                previous = %previous,
                connection = %connection,
                "Peer reconnected; replacing connection"
            );
        } else {
            debug!(peer = %peer, connection = %connection, "Connection opened");
        }
    }

    /// Forget a closed connection and fail the requests written to it.
    ///
    /// Returns the number of pending requests resolved.
    pub fn connection_closed(&self, connection: ConnectionId) -> usize {
        let peer = self.topology().disconnect(connection);
        let failed = self.pending.connection_closed(connection);
        debug!(
            connection = %connection,
            peer = ?peer.as_ref().map(NodeId::as_str),
            failed_requests = failed,
            "Connection closed"
        );
        failed
    }

    /// Start the expiry sweeper.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(cleanup_task(
            Arc::clone(&self.pending),
            self.sweep_interval,
            shutdown,
        ))
    }

    /// Consume transport events until the channel closes or `shutdown` fires.
    ///
    /// Each inbound frame is handled on its own task.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        let sweeper_shutdown = shutdown.child_token();
        let sweeper = self.spawn_sweeper(sweeper_shutdown.clone());
        info!(node = %self.local(), "Message exchange running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(node = %self.local(), "Message exchange shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Opened { connection, peer }) => {
                        self.connection_opened(connection, peer);
                    }
                    Some(TransportEvent::Frame(frame)) => {
                        let exchange = Arc::clone(&self);
                        tokio::spawn(async move { exchange.handle_inbound(frame).await });
                    }
                    Some(TransportEvent::Closed { connection }) => {
                        self.connection_closed(connection);
                    }
                    None => {
                        warn!(node = %self.local(), "Transport event channel closed");
                        break;
                    }
                },
            }
        }

        sweeper_shutdown.cancel();
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Pending request sweeper failed");
        }
    }

    /// Encode and write one frame.
    pub(crate) async fn transmit(&self, connection: ConnectionId, frame: &Frame) -> SendOutcome {
        let outcome = self.transport.send(connection, encode(frame)).await;
        if outcome.is_delivered() {
            debug!(
                correlation_id = %frame.correlation_id(),
                kind = ?frame.kind(),
                connection = %connection,
                "Frame sent"
            );
        } else {
            warn!(
                correlation_id = %frame.correlation_id(),
                kind = ?frame.kind(),
                connection = %connection,
                outcome = %outcome,
                "Frame not delivered"
            );
        }
        outcome
    }

    /// Send a typed request and await its typed response.
    pub async fn call<A: Action>(
        &self,
        destination: SourceRouting,
        request: A::Request,
    ) -> Result<CallReply<A::Response>, ExchangeFailure> {
        self.call_with::<A>(destination, request, CallOptions::default())
            .await
    }

    /// [`MessageExchange::call`] with a timeout override or cancellation token.
    pub async fn call_with<A: Action>(
        &self,
        destination: SourceRouting,
        request: A::Request,
        options: CallOptions,
    ) -> Result<CallReply<A::Response>, ExchangeFailure> {
        let correlation_id = CorrelationId::new();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let fail = |kind: OutcomeKind, description: String| {
            ExchangeFailure::new(kind, correlation_id.clone(), A::NAME, description)
        };

        let payload = serde_json::to_value(&request)
            .map_err(|e| fail(OutcomeKind::CouldNotParse, e.to_string()))?;
        if !payload.is_object() {
            return Err(fail(
                OutcomeKind::CouldNotParse,
                "request payload must serialize to a JSON object".into(),
            ));
        }

        let mut frame = Frame::Request(
            RequestFrame::new(correlation_id.clone(), A::NAME, payload, self.local().clone())
                .with_destination(destination.clone())
                .with_timing(Utc::now(), timeout),
        );
        self.middleware
            .sign_outgoing(&mut frame, Direction::OutgoingRequest, A::NAME)
            .map_err(|e| fail(OutcomeKind::SigningError, e.to_string()))?;

        let mut rx = self
            .pending
            .register(correlation_id.clone(), A::NAME, Some(timeout))
            .map_err(|e| fail(OutcomeKind::Failed, e.to_string()))?;

        let connection = match self.router.next_hop(&destination) {
            Ok(connection) => connection,
            Err(e) => {
                self.pending.discard(&correlation_id);
                return Err(fail(OutcomeKind::Unreachable, e.to_string()));
            }
        };
        self.pending.bind_connection(&correlation_id, connection);

        let started = Instant::now();
        let outcome = self.transmit(connection, &frame).await;
        if !outcome.is_delivered() {
            let resolution = match outcome {
                SendOutcome::ConnectionClosed => Resolution::ConnectionClosed,
                other => Resolution::SendFailed(other),
            };
            self.pending.complete(&correlation_id, resolution);
        }

        debug!(
            correlation_id = %correlation_id,
            action = A::NAME,
            destination = %destination.destination(),
            connection = %connection,
            "Awaiting reply"
        );

        let cancel = options.cancel.unwrap_or_default();
        let resolved = tokio::select! {
            resolved = &mut rx => resolved,
            _ = tokio::time::sleep(timeout) => {
                self.pending.complete(&correlation_id, Resolution::TimedOut);
                (&mut rx).await
            }
            _ = cancel.cancelled() => {
                self.pending.cancel(&correlation_id);
                (&mut rx).await
            }
        };

        let Ok(resolved) = resolved else {
            return Err(fail(
                OutcomeKind::Failed,
                "pending request dropped without resolution".into(),
            ));
        };
        let runtime = started.elapsed();
        self.finish::<A>(resolved, connection, timeout, runtime)
            .await
            .map_err(|failure| failure.with_runtime(runtime))
    }

    async fn finish<A: Action>(
        &self,
        resolved: Resolved,
        connection: ConnectionId,
        timeout: Duration,
        runtime: Duration,
    ) -> Result<CallReply<A::Response>, ExchangeFailure> {
        let Resolved {
            correlation_id,
            resolution,
            ..
        } = resolved;
        let fail = |kind: OutcomeKind, description: String| {
            ExchangeFailure::new(kind, correlation_id.clone(), A::NAME, description)
        };

        match resolution {
            Resolution::Reply(frame) => {
                self.middleware
                    .verify_incoming(&frame, Direction::IncomingResponse, A::NAME)
                    .map_err(|e| fail(OutcomeKind::SignatureError, e.to_string()))?;

                match frame {
                    Frame::Response(response) => match A::parse_response(&response.payload) {
                        Ok(payload) => Ok(CallReply {
                            payload,
                            correlation_id: response.correlation_id,
                            network_path: response.network_path,
                            runtime,
                        }),
                        Err(e) => {
                            let failure = fail(
                                OutcomeKind::ResponseError,
                                format!("response does not match {}: {}", A::NAME, e),
                            )
                            .with_code(ErrorCode::FormatViolation);
                            self.reject_response(&response, connection, &failure).await;
                            Err(failure)
                        }
                    },
                    Frame::RequestError(error) => {
                        let kind = error.outcome().unwrap_or(OutcomeKind::RequestError);
                        Err(remote_failure(kind, A::NAME, error))
                    }
                    Frame::ResponseError(error) => {
                        Err(remote_failure(OutcomeKind::ResponseError, A::NAME, error))
                    }
                    Frame::Request(_) => Err(fail(
                        OutcomeKind::Failed,
                        "a request cannot resolve a pending request".into(),
                    )),
                }
            }
            Resolution::TimedOut => Err(fail(
                OutcomeKind::Timeout,
                format!("no reply within {}ms", timeout.as_millis()),
            )),
            Resolution::Cancelled => Err(fail(
                OutcomeKind::Timeout,
                "cancelled by caller".into(),
            )
            .with_details(json!({ "cancelled": true }))),
            Resolution::ConnectionClosed => Err(fail(
                OutcomeKind::ConnectionClosed,
                "connection closed before a reply arrived".into(),
            )),
            Resolution::SendFailed(outcome) => Err(fail(
                OutcomeKind::ConnectionClosed,
                format!("request could not be sent: {}", outcome),
            )
            .with_details(json!({ "sendOutcome": outcome.to_string() }))),
        }
    }

    /// Tell the responder its response was rejected.
    ///
    /// The error travels forward along the reply path to the responder. Best
    /// effort: failures are logged and the caller's result is unaffected.
    async fn reject_response(
        &self,
        response: &ResponseFrame,
        connection: ConnectionId,
        failure: &ExchangeFailure,
    ) {
        let mut error = ErrorFrame::with_path(
            response.correlation_id.clone(),
            NetworkPath::from_source(self.local().clone()),
            failure,
        );

        let hops = response.network_path.hops();
        let target = match hops.split_last() {
            Some((responder, rest)) if responder != self.local() => {
                // Skip this node at the head of the reply path.
                let relays: Vec<NodeId> = rest
                    .iter()
                    .filter(|hop| *hop != self.local())
                    .cloned()
                    .collect();
                let routing = SourceRouting::via(relays, responder.clone());
                match self.router.next_hop(&routing) {
                    Ok(next) => {
                        error.destination = Some(routing);
                        next
                    }
                    Err(e) => {
                        warn!(
                            correlation_id = %response.correlation_id,
                            error = %e,
                            "Cannot route response error to responder"
                        );
                        return;
                    }
                }
            }
            // A peer that records no path is answered on the request's connection.
            _ => connection,
        };

        let mut frame = Frame::ResponseError(error);
        if let Err(e) = self
            .middleware
            .sign_outgoing(&mut frame, Direction::OutgoingResponse, &failure.action)
        {
            warn!(
                correlation_id = %response.correlation_id,
                error = %e,
                "Sending response error unsigned"
            );
        }
        self.transmit(target, &frame).await;
    }
}

/// Failure reported by a remote error frame.
fn remote_failure(kind: OutcomeKind, action: &str, error: ErrorFrame) -> ExchangeFailure {
    let details = match error.error_details {
        Value::Object(map) if map.is_empty() => None,
        details => Some(details),
    };
    ExchangeFailure {
        kind,
        correlation_id: error.correlation_id,
        action: action.to_string(),
        code: error.error_code,
        description: error.error_description,
        details,
        runtime: None,
    }
}
