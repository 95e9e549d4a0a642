//! # End-to-end Exchanges
//!
//! One originator, one responder, optionally relays in between:
//!
//! 1. Single hop request and response
//! 2. Signed response corrupted on the last hop
//! 3. Action with observers but no processor
//! 4. Responder that never answers
//! 5. Several processors, the first one failing

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use ocpp_exchange::{CallOptions, Direction, ExchangeConfig, SignatureMiddleware};
    use ocpp_types::{ErrorCode, NetworkPath, OutcomeKind, SourceRouting};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn path(hops: &[&str]) -> NetworkPath {
        hops.iter().map(|hop| node(hop)).collect()
    }

    // =========================================================================
    // SINGLE HOP
    // =========================================================================

    #[tokio::test]
    async fn test_single_hop_round_trip() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        let cp = net.add("CP1");
        cp.exchange
            .registry()
            .process::<Reset, _, _>(|ctx, request| async move {
                assert_eq!(ctx.network_path.hops(), &[node("CSMS")]);
                assert_eq!(request.kind, "Immediate");
                Ok(Some(status("Accepted")))
            })
            .unwrap();
        net.link("CSMS", "CP1").await;

        let reply = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap();

        assert_eq!(reply.payload, status("Accepted"));
        assert_eq!(reply.network_path, path(&["CSMS", "CP1"]));
        assert_eq!(csms.exchange.pending_count(), 0);
        let stats = csms.exchange.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_both_directions_share_one_link() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        let cp = net.add("CP1");
        for engine in [&csms, &cp] {
            let me = engine.id().to_string();
            engine
                .exchange
                .registry()
                .process::<Reset, _, _>(move |_, _| {
                    let me = me.clone();
                    async move { Ok(Some(status(&me))) }
                })
                .unwrap();
        }
        net.link("CSMS", "CP1").await;

        let (to_cp, to_csms) = tokio::join!(
            csms.exchange
                .call::<Reset>(SourceRouting::to(node("CP1")), immediate()),
            cp.exchange
                .call::<Reset>(SourceRouting::to(node("CSMS")), immediate()),
        );
        assert_eq!(to_cp.unwrap().payload, status("CP1"));
        assert_eq!(to_csms.unwrap().payload, status("CSMS"));
    }

    // =========================================================================
    // SIGNATURES ACROSS RELAYS
    // =========================================================================

    /// CSMS -- LC1 -- LC2 -- CP1; CP1 signs responses, CSMS requires it.
    async fn signed_chain(net: &TestNetwork) -> TestNode {
        let cp_key = keypair(7);
        let csms = net.add_with(
            ExchangeConfig::for_node("CSMS"),
            requiring("cp1", &cp_key, Direction::IncomingResponse),
        );
        net.add("LC1");
        net.add("LC2");
        let cp = net.add_with(
            ExchangeConfig::for_node("CP1"),
            signing("cp1", cp_key, Direction::OutgoingResponse),
        );
        cp.exchange
            .registry()
            .process::<Reset, _, _>(|_, _| async { Ok(Some(status("Accepted"))) })
            .unwrap();
        net.link("CSMS", "LC1").await;
        net.link("LC1", "LC2").await;
        net.link("LC2", "CP1").await;
        csms
    }

    fn via_relays() -> SourceRouting {
        SourceRouting::via(vec![node("LC1"), node("LC2")], node("CP1"))
    }

    #[tokio::test]
    async fn test_signed_response_across_two_relays() {
        let net = TestNetwork::new();
        let csms = signed_chain(&net).await;

        let reply = csms
            .exchange
            .call::<Reset>(via_relays(), immediate())
            .await
            .unwrap();
        assert_eq!(reply.payload, status("Accepted"));
        assert_eq!(reply.network_path, path(&["CSMS", "LC1", "LC2", "CP1"]));
    }

    #[tokio::test]
    async fn test_corruption_on_final_hop_is_a_signature_error() {
        let net = TestNetwork::new();
        let csms = signed_chain(&net).await;
        // Still a valid Reset response, but no longer what CP1 signed.
        net.tamper("LC1", "CSMS", |raw| raw.replace("Accepted", "Rejected"));

        let failure = csms
            .exchange
            .call::<Reset>(via_relays(), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::SignatureError);
        assert_eq!(failure.code, ErrorCode::SecurityError);
        assert_eq!(csms.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_corrupted_on_final_hop_is_rejected_unprocessed() {
        let net = TestNetwork::new();
        let csms_key = keypair(5);
        let csms = net.add_with(
            ExchangeConfig::for_node("CSMS"),
            signing("csms", keypair(5), Direction::OutgoingRequest),
        );
        net.add("LC1");
        net.add("LC2");
        let cp = net.add_with(
            ExchangeConfig::for_node("CP1"),
            requiring("csms", &csms_key, Direction::IncomingRequest),
        );
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        cp.exchange
            .registry()
            .process::<Reset, _, _>(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some(status("Accepted"))) }
            })
            .unwrap();
        net.link("CSMS", "LC1").await;
        net.link("LC1", "LC2").await;
        net.link("LC2", "CP1").await;
        // Still a valid Reset request, but no longer what CSMS signed.
        net.tamper("LC2", "CP1", |raw| raw.replace("Immediate", "OnIdle"));

        let failure = csms
            .exchange
            .call::<Reset>(via_relays(), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::SignatureError);
        assert_eq!(failure.code, ErrorCode::SecurityError);
        assert_eq!(processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsigned_request_rejected_by_responder() {
        let net = TestNetwork::new();
        let csms_key = keypair(3);
        let csms = net.add("CSMS");
        let cp = net.add_with(
            ExchangeConfig::for_node("CP1"),
            requiring("csms", &csms_key, Direction::IncomingRequest),
        );
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        cp.exchange
            .registry()
            .process::<Reset, _, _>(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some(status("Accepted"))) }
            })
            .unwrap();
        net.link("CSMS", "CP1").await;

        let failure = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::SignatureError);
        assert_eq!(processed.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // HANDLER OUTCOMES
    // =========================================================================

    #[tokio::test]
    async fn test_observer_only_action_fails() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        let cp = net.add("CP1");
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        cp.exchange
            .registry()
            .observe::<Reset, _>(move |_, request| {
                assert_eq!(request.kind, "Immediate");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        net.link("CSMS", "CP1").await;

        let failure = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Failed);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_implemented() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        net.add("CP1");
        net.link("CSMS", "CP1").await;

        let failure = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Failed);
        assert_eq!(failure.code, ErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn test_first_failing_processor_wins_after_all_ran() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        let cp = net.add("CP1");
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        cp.exchange
            .registry()
            .process::<Reset, _, _>(move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Option<ResetResponse>, _>(anyhow::anyhow!("relay board unreachable"))
                }
            })
            .unwrap();
        for delay in [5u64, 10] {
            let counter = ran.clone();
            cp.exchange
                .registry()
                .process::<Reset, _, _>(move |_, _| {
                    let counter = counter.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(status("Accepted")))
                    }
                })
                .unwrap();
        }
        net.link("CSMS", "CP1").await;

        let failure = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::ExceptionOccurred);
        assert_eq!(failure.code, ErrorCode::InternalError);
        assert!(failure.description.contains("relay board unreachable"));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    // =========================================================================
    // TIMEOUTS
    // =========================================================================

    fn silent_responder(net: &TestNetwork, answer_after: Duration) -> TestNode {
        let cp = net.add("CP1");
        cp.exchange
            .registry()
            .process::<Reset, _, _>(move |_, _| async move {
                tokio::time::sleep(answer_after).await;
                Ok(Some(status("Accepted")))
            })
            .unwrap();
        cp
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_five_seconds() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        silent_responder(&net, Duration::from_secs(3600));
        net.link("CSMS", "CP1").await;

        let started = Instant::now();
        let failure = csms
            .exchange
            .call_with::<Reset>(
                SourceRouting::to(node("CP1")),
                immediate(),
                CallOptions::with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert_eq!(failure.kind, OutcomeKind::Timeout);
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
        assert_eq!(csms.exchange.pending_count(), 0);
        assert_eq!(csms.exchange.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_after_timeout_is_discarded() {
        let net = TestNetwork::new();
        let csms = net.add("CSMS");
        silent_responder(&net, Duration::from_secs(8));
        net.link("CSMS", "CP1").await;

        let failure = csms
            .exchange
            .call_with::<Reset>(
                SourceRouting::to(node("CP1")),
                immediate(),
                CallOptions::with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Timeout);

        let engine = csms.exchange.clone();
        eventually(move || engine.stats().late_replies == 1, "late reply").await;
        let stats = csms.exchange.stats();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_from_config() {
        let net = TestNetwork::new();
        let mut config = ExchangeConfig::for_node("CSMS");
        config.default_timeout = Duration::from_secs(2);
        let csms = net.add_with(config, SignatureMiddleware::disabled());
        silent_responder(&net, Duration::from_secs(3600));
        net.link("CSMS", "CP1").await;

        let started = Instant::now();
        let failure = csms
            .exchange
            .call::<Reset>(SourceRouting::to(node("CP1")), immediate())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, OutcomeKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
