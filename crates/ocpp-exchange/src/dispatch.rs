//! Inbound dispatch.
//!
//! Every frame read from a connection lands in [`MessageExchange::handle_inbound`]:
//!
//! ```text
//! raw ──decode──┬─ Request ───── hop check ──┬─ addressed elsewhere ─> relay
//!               │                            └─ addressed here ──────> pipeline
//!               ├─ Response / RequestError ── reply path ─┬─ origin ─> pending
//!               │                                         └─ relay ──> previous hop
//!               └─ ResponseError ── hop check ─┬─ addressed elsewhere ─> relay
//!                                              └─ addressed here ──────> pending
//! ```
//!
//! The request pipeline runs Parsed → SignatureChecked → HandlersInvoked and
//! yields `Result<Value, ExchangeFailure>`. Only the final respond step
//! turns that into a wire frame, signs it and routes it back.

use crate::config::ResultSelection;
use crate::correlation::Resolution;
use crate::exchange::MessageExchange;
use crate::registry::{ActionEntry, ErasedRequest, RequestContext, ResponseSent};
use crate::reporter::{panic_message, FaultReport, FaultStage};
use crate::routing::ReplyHop;
use crate::security::Direction;
use crate::transport::{ConnectionId, InboundFrame, SendOutcome};
use chrono::Utc;
use futures::future::join_all;
use ocpp_types::{
    decode, ErrorCode, ErrorFrame, ExchangeFailure, Frame, FrameError, NetworkPath, OutcomeKind,
    RequestFrame, ResponseFrame,
};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

type PipelineResult = Result<Value, ExchangeFailure>;

impl MessageExchange {
    /// Handle one frame read from a connection.
    pub async fn handle_inbound(self: &Arc<Self>, inbound: InboundFrame) {
        let InboundFrame { connection, raw } = inbound;
        let frame = match decode(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.reject_malformed(connection, e).await;
                return;
            }
        };

        match frame {
            Frame::Request(request) => self.handle_request(connection, request).await,
            Frame::Response(_) | Frame::RequestError(_) => self.handle_reply(frame).await,
            Frame::ResponseError(error) => self.handle_response_error(connection, error).await,
        }
    }

    /// Answer a malformed request whose correlation id survived; drop anything else.
    async fn reject_malformed(&self, connection: ConnectionId, error: FrameError) {
        let (true, Some(correlation_id)) = (error.was_request(), error.correlation_id.clone())
        else {
            warn!(connection = %connection, error = %error, "Dropping malformed frame");
            return;
        };
        let Some(peer) = self.topology().peer_of(connection) else {
            warn!(
                connection = %connection,
                error = %error,
                "Dropping malformed frame from unregistered connection"
            );
            return;
        };

        debug!(
            correlation_id = %correlation_id,
            connection = %connection,
            error = %error,
            "Answering malformed request"
        );
        let path = NetworkPath::from_source(peer).append(self.local().clone());
        let mut frame = Frame::RequestError(ErrorFrame::formation_violation(
            correlation_id,
            path,
            error.wire_code(),
            error.to_string(),
        ));
        if let Err(e) = self
            .middleware
            .sign_outgoing(&mut frame, Direction::OutgoingResponse, "")
        {
            warn!(error = %e, "Sending formation violation unsigned");
        }
        self.transmit(connection, &frame).await;
    }

    async fn handle_request(self: &Arc<Self>, connection: ConnectionId, mut request: RequestFrame) {
        match self.router.inbound_path(connection, &request.network_path) {
            Ok((_, path)) => request.network_path = path,
            Err(e) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    action = %request.action,
                    error = %e,
                    "Routing violation; dropping request"
                );
                return;
            }
        }

        if !self.router.is_addressed_here(request.destination.as_ref()) {
            self.relay_request(request).await;
            return;
        }

        let received_at = Utc::now();
        let ctx = RequestContext {
            correlation_id: request.correlation_id.clone(),
            action: request.action.clone(),
            network_path: request.network_path.clone(),
            connection,
            received_at,
        };
        let entry = self.registry.get(&request.action);
        debug!(
            correlation_id = %ctx.correlation_id,
            action = %ctx.action,
            path = %ctx.network_path,
            "Dispatching request"
        );

        // The pipeline runs on its own task so a panic anywhere inside it
        // still produces a reply for this correlation id.
        let pipeline = tokio::spawn(Arc::clone(self).run_pipeline(
            ctx.clone(),
            request.clone(),
            entry.clone(),
        ));
        let result = match pipeline.await {
            Ok(result) => result,
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                self.report(&ctx, FaultStage::Pipeline, message.clone());
                Err(ExchangeFailure::new(
                    OutcomeKind::ExceptionOccurred,
                    ctx.correlation_id.clone(),
                    ctx.action.clone(),
                    message,
                ))
            }
        };

        self.respond(&request, entry.as_deref(), result).await;
    }

    async fn run_pipeline(
        self: Arc<Self>,
        ctx: RequestContext,
        request: RequestFrame,
        entry: Option<Arc<ActionEntry>>,
    ) -> PipelineResult {
        let fail = |kind: OutcomeKind, description: String| {
            ExchangeFailure::new(kind, ctx.correlation_id.clone(), ctx.action.clone(), description)
        };

        let Some(entry) = entry else {
            // Checked before answering, so unsigned senders learn nothing about registrations.
            let frame = Frame::Request(request);
            self.middleware
                .verify_incoming(&frame, Direction::IncomingRequest, &ctx.action)
                .map_err(|e| fail(OutcomeKind::SignatureError, e.to_string()))?;
            return Err(fail(
                OutcomeKind::Failed,
                format!("no handler registered for {}", ctx.action),
            )
            .with_code(ErrorCode::NotImplemented));
        };

        // Parsed
        let parsed = entry
            .parse(&request.payload)
            .map_err(|e| fail(OutcomeKind::CouldNotParse, e.to_string()))?;

        // SignatureChecked
        let frame = Frame::Request(request);
        self.middleware
            .verify_incoming(&frame, Direction::IncomingRequest, &ctx.action)
            .map_err(|e| fail(OutcomeKind::SignatureError, e.to_string()))?;

        // HandlersInvoked
        for observer in &entry.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer(&ctx, parsed.as_ref())));
            if let Err(payload) = outcome {
                self.report(&ctx, FaultStage::Observer, panic_message(payload.as_ref()));
            }
        }

        if entry.processors.is_empty() {
            return Err(fail(
                OutcomeKind::Failed,
                format!("no processor registered for {}", ctx.action),
            ));
        }

        let results = self.invoke_processors(&ctx, &entry, parsed).await;
        self.select_result(&ctx, results)
    }

    /// Run every processor concurrently and wait for all of them.
    async fn invoke_processors(
        &self,
        ctx: &RequestContext,
        entry: &ActionEntry,
        request: ErasedRequest,
    ) -> Vec<Result<Option<Value>, ExchangeFailure>> {
        let handles = entry.processors.iter().map(|processor| {
            let processor = Arc::clone(processor);
            let ctx = ctx.clone();
            let request = Arc::clone(&request);
            tokio::spawn(async move { processor(ctx, request).await })
        });
        let joined = join_all(handles).await;

        joined
            .into_iter()
            .enumerate()
            .map(|(index, joined)| {
                let message = match joined {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(e) if e.is_panic() => panic_message(e.into_panic().as_ref()),
                    Err(e) => e.to_string(),
                };
                self.report(ctx, FaultStage::Processor { index }, message.clone());
                Err(ExchangeFailure::new(
                    OutcomeKind::ExceptionOccurred,
                    ctx.correlation_id.clone(),
                    ctx.action.clone(),
                    message,
                ))
            })
            .collect()
    }

    fn select_result(
        &self,
        ctx: &RequestContext,
        results: Vec<Result<Option<Value>, ExchangeFailure>>,
    ) -> PipelineResult {
        let absent = || {
            ExchangeFailure::new(
                OutcomeKind::Failed,
                ctx.correlation_id.clone(),
                ctx.action.clone(),
                "no processor produced a result",
            )
        };

        match self.result_selection {
            ResultSelection::FirstRegistered => match results.into_iter().next() {
                Some(Ok(Some(value))) => Ok(value),
                Some(Err(failure)) => Err(failure),
                Some(Ok(None)) | None => Err(absent()),
            },
            ResultSelection::FirstPresent => {
                let mut first_failure = None;
                for result in results {
                    match result {
                        Ok(Some(value)) => return Ok(value),
                        Ok(None) => {}
                        Err(failure) => {
                            first_failure.get_or_insert(failure);
                        }
                    }
                }
                Err(first_failure.unwrap_or_else(absent))
            }
        }
    }

    /// Turn a pipeline result into a signed reply, send it back along the
    /// reverse path and tell the response-sent observers.
    async fn respond(&self, request: &RequestFrame, entry: Option<&ActionEntry>, result: PipelineResult) {
        let local = self.local();
        let (mut frame, mut failure) = match result {
            Ok(payload) => (
                Frame::Response(ResponseFrame::from_request(request, local, payload)),
                None,
            ),
            Err(failure) => (
                Frame::RequestError(ErrorFrame::for_request(request, local, &failure)),
                Some(failure),
            ),
        };

        // ResponseSigned
        if let Err(e) = self
            .middleware
            .sign_outgoing(&mut frame, Direction::OutgoingResponse, &request.action)
        {
            warn!(
                correlation_id = %request.correlation_id,
                action = %request.action,
                error = %e,
                "Response signing failed; answering with an unsigned security error"
            );
            let signing_failure = ExchangeFailure::new(
                OutcomeKind::SignatureError,
                request.correlation_id.clone(),
                request.action.clone(),
                e.to_string(),
            );
            frame = Frame::RequestError(ErrorFrame::for_request(request, local, &signing_failure));
            failure = Some(signing_failure);
        }

        // Sent
        let send_outcome = match self.router.reply_hop(frame.network_path()) {
            Ok(ReplyHop::Forward { connection, .. }) => self.transmit(connection, &frame).await,
            Ok(ReplyHop::Local) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    path = %frame.network_path(),
                    "Reply path leads back to this node"
                );
                SendOutcome::Failed
            }
            Err(e) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "No route back to the requester"
                );
                SendOutcome::Failed
            }
        };

        debug!(
            correlation_id = %request.correlation_id,
            action = %request.action,
            kind = ?frame.kind(),
            outcome = %send_outcome,
            "Reply handled"
        );

        let Some(entry) = entry else {
            return;
        };
        let sent = ResponseSent {
            correlation_id: request.correlation_id.clone(),
            action: request.action.clone(),
            kind: frame.kind(),
            failure,
            send_outcome,
        };
        for observer in &entry.sent_observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(&sent))) {
                self.report_fault(FaultReport {
                    correlation_id: sent.correlation_id.clone(),
                    action: sent.action.clone(),
                    stage: FaultStage::ResponseSentObserver,
                    message: panic_message(payload.as_ref()),
                });
            }
        }
    }

    /// Forward a request addressed to another node.
    async fn relay_request(&self, request: RequestFrame) {
        let Some(routing) = request.destination.clone() else {
            return;
        };

        let failure = match self.router.forward(&routing, &request.network_path) {
            Ok((connection, path)) => {
                let forwarded = Frame::Request(RequestFrame {
                    network_path: path,
                    ..request.clone()
                });
                debug!(
                    correlation_id = %request.correlation_id,
                    action = %request.action,
                    destination = %routing.destination(),
                    connection = %connection,
                    "Relaying request"
                );
                let outcome = self.transmit(connection, &forwarded).await;
                if outcome.is_delivered() {
                    return;
                }
                format!("relay to {} failed: {}", routing.destination(), outcome)
            }
            Err(e) => e.to_string(),
        };

        warn!(
            correlation_id = %request.correlation_id,
            action = %request.action,
            reason = %failure,
            "Cannot relay request; answering unreachable"
        );
        let failure = ExchangeFailure::new(
            OutcomeKind::Unreachable,
            request.correlation_id.clone(),
            request.action.clone(),
            failure,
        );
        self.respond(&request, None, Err(failure)).await;
    }

    /// A response or request error: resolve locally or pass it back a hop.
    async fn handle_reply(&self, frame: Frame) {
        match self.router.reply_hop(frame.network_path()) {
            Ok(ReplyHop::Local) => {
                let correlation_id = frame.correlation_id().clone();
                self.pending.complete(&correlation_id, Resolution::Reply(frame));
            }
            Ok(ReplyHop::Forward { connection, next }) => {
                debug!(
                    correlation_id = %frame.correlation_id(),
                    kind = ?frame.kind(),
                    next = %next,
                    "Relaying reply"
                );
                self.transmit(connection, &frame).await;
            }
            Err(e) => {
                warn!(
                    correlation_id = %frame.correlation_id(),
                    kind = ?frame.kind(),
                    error = %e,
                    "Routing violation; dropping reply"
                );
            }
        }
    }

    /// A response error travels forward to the node whose response was rejected.
    async fn handle_response_error(&self, connection: ConnectionId, mut error: ErrorFrame) {
        match self.router.inbound_path(connection, &error.network_path) {
            Ok((_, path)) => error.network_path = path,
            Err(e) => {
                warn!(
                    correlation_id = %error.correlation_id,
                    error = %e,
                    "Routing violation; dropping response error"
                );
                return;
            }
        }

        if let Some(routing) = error
            .destination
            .clone()
            .filter(|routing| !routing.is_destination(self.local()))
        {
            match self.router.forward(&routing, &error.network_path) {
                Ok((next, path)) => {
                    error.network_path = path;
                    self.transmit(next, &Frame::ResponseError(error)).await;
                }
                Err(e) => warn!(
                    correlation_id = %error.correlation_id,
                    error = %e,
                    "Cannot relay response error; dropping"
                ),
            }
            return;
        }

        let correlation_id = error.correlation_id.clone();
        if self.pending.is_pending(&correlation_id) {
            self.pending.complete(
                &correlation_id,
                Resolution::Reply(Frame::ResponseError(error)),
            );
            return;
        }

        warn!(
            correlation_id = %correlation_id,
            code = %error.error_code,
            description = %error.error_description,
            "Peer rejected a response"
        );
        self.report_fault(FaultReport {
            correlation_id,
            action: String::new(),
            stage: FaultStage::ResponseRejected,
            message: format!("{}: {}", error.error_code, error.error_description),
        });
    }

    fn report(&self, ctx: &RequestContext, stage: FaultStage, message: String) {
        self.report_fault(FaultReport {
            correlation_id: ctx.correlation_id.clone(),
            action: ctx.action.clone(),
            stage,
            message,
        });
    }

    fn report_fault(&self, fault: FaultReport) {
        self.reporter.report(&fault);
    }
}
