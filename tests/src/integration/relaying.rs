//! # Multi-hop Routing
//!
//! Replies retrace the request path; failures along the way surface at the
//! originator with the right outcome kind.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use ocpp_exchange::{CallOptions, FaultStage};
    use ocpp_types::{Action, ErrorCode, NetworkPath, OutcomeKind, SourceRouting};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn path(hops: &[&str]) -> NetworkPath {
        hops.iter().map(|hop| node(hop)).collect()
    }

    fn accepting(node: &TestNode) {
        node.exchange
            .registry()
            .process::<Reset, _, _>(|_, _| async { Ok(Some(status("Accepted"))) })
            .unwrap();
    }

    /// A -- B -- C with A routing C through B.
    async fn chain() -> (TestNetwork, TestNode, TestNode, TestNode) {
        let net = TestNetwork::new();
        let a = net.add("A");
        let b = net.add("B");
        let c = net.add("C");
        a.exchange.topology().add_route(node("C"), node("B"));
        net.link("A", "B").await;
        net.link("B", "C").await;
        (net, a, b, c)
    }

    #[tokio::test]
    async fn test_reply_carries_full_path() {
        let (_net, a, b, c) = chain().await;
        accepting(&c);

        let reply = a
            .exchange
            .call::<Reset>(SourceRouting::to(node("C")), immediate())
            .await
            .unwrap();
        assert_eq!(reply.network_path, path(&["A", "B", "C"]));
        assert_eq!(reply.payload, status("Accepted"));
        // The relay never tracks the exchange.
        assert_eq!(b.exchange.stats().registered, 0);
    }

    #[tokio::test]
    async fn test_responder_sees_forward_path() {
        let (_net, a, _b, c) = chain().await;
        c.exchange
            .registry()
            .process::<Reset, _, _>(|ctx, _| async move {
                Ok(Some(status(&ctx.network_path.to_string())))
            })
            .unwrap();

        let reply = a
            .exchange
            .call::<Reset>(SourceRouting::to(node("C")), immediate())
            .await
            .unwrap();
        assert_eq!(reply.payload, status("A -> B"));
    }

    #[tokio::test]
    async fn test_relay_without_route_answers_unreachable() {
        let net = TestNetwork::new();
        let a = net.add("A");
        net.add("B");
        a.exchange.topology().add_route(node("C"), node("B"));
        net.link("A", "B").await;

        let failure = a
            .exchange
            .call::<Reset>(SourceRouting::to(node("C")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Unreachable);
        assert_eq!(failure.code, ErrorCode::GenericError);
        assert_eq!(a.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_originator_without_route_fails_fast() {
        let net = TestNetwork::new();
        let a = net.add("A");

        let failure = a
            .exchange
            .call::<Reset>(SourceRouting::to(node("C")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Unreachable);
        assert_eq!(a.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_close_fails_pending_request() {
        let net = TestNetwork::new();
        let a = net.add("A");
        let b = net.add("B");
        b.exchange
            .registry()
            .process::<Reset, _, _>(|_, _| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Some(status("Accepted")))
            })
            .unwrap();
        net.link("A", "B").await;

        let caller = a.exchange.clone();
        let call = tokio::spawn(async move {
            caller
                .call::<Reset>(SourceRouting::to(node("B")), immediate())
                .await
        });
        let engine = a.exchange.clone();
        eventually(move || engine.pending_count() == 1, "request in flight").await;

        net.unlink("A", "B").await;
        let failure = call.await.unwrap().unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::ConnectionClosed);
        assert_eq!(a.exchange.stats().connection_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downstream_link_loss_ends_in_timeout() {
        let (net, a, _b, c) = chain().await;
        let arrived = Arc::new(AtomicBool::new(false));
        let flag = arrived.clone();
        c.exchange
            .registry()
            .observe::<Reset, _>(move |_, _| flag.store(true, Ordering::SeqCst))
            .unwrap();
        c.exchange
            .registry()
            .process::<Reset, _, _>(|_, _| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(Some(status("Accepted")))
            })
            .unwrap();

        let caller = a.exchange.clone();
        let call = tokio::spawn(async move {
            caller
                .call_with::<Reset>(
                    SourceRouting::to(node("C")),
                    immediate(),
                    CallOptions::with_timeout(Duration::from_secs(5)),
                )
                .await
        });
        eventually(move || arrived.load(Ordering::SeqCst), "request at the responder").await;

        // The originator's own link survives, so only the timeout resolves it.
        net.unlink("B", "C").await;
        let failure = call.await.unwrap().unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Timeout);
    }

    // =========================================================================
    // REJECTED RESPONSES
    // =========================================================================

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Garbled {
        garbled: bool,
    }

    /// Same action name as [`Reset`], wrong response shape.
    struct GarbledReset;

    impl Action for GarbledReset {
        const NAME: &'static str = "Reset";
        type Request = ResetRequest;
        type Response = Garbled;
    }

    #[tokio::test]
    async fn test_malformed_response_is_rejected_back_to_responder() {
        let (_net, a, _b, c) = chain().await;
        c.exchange
            .registry()
            .process::<GarbledReset, _, _>(|_, _| async { Ok(Some(Garbled { garbled: true })) })
            .unwrap();

        let failure = a
            .exchange
            .call::<Reset>(SourceRouting::to(node("C")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::ResponseError);
        assert_eq!(failure.code, ErrorCode::FormatViolation);

        // The rejection travels A -> B -> C and lands in C's fault reports.
        let reporter = c.reporter.clone();
        eventually(
            move || {
                reporter
                    .faults()
                    .iter()
                    .any(|fault| fault.stage == FaultStage::ResponseRejected)
            },
            "response rejection at the responder",
        )
        .await;
        let fault = c.reporter.faults().pop().unwrap();
        assert_eq!(fault.correlation_id, failure.correlation_id);
    }
}
