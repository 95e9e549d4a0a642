//! # Invariants
//!
//! Property tests over the routing, correlation and signing building blocks.

#[cfg(test)]
mod tests {
    use crate::harness::{keypair, node, requiring, signing};
    use ocpp_exchange::correlation::{PendingRequestStore, Resolution};
    use ocpp_exchange::{ConnectionId, Direction, ReplyHop, Router, SendOutcome, Topology};
    use ocpp_types::{CorrelationId, Frame, NetworkPath, NodeId, RequestFrame};
    use proptest::prelude::*;
    use serde_json::json;
    use std::mem::discriminant;
    use std::sync::Arc;
    use std::time::Duration;

    /// Router for `path[index]` connected to its neighbours on the path.
    fn router_at(path: &[NodeId], index: usize) -> Router {
        let topology = Arc::new(Topology::new());
        let neighbours = [index.checked_sub(1), Some(index + 1)];
        for (slot, neighbour) in neighbours.into_iter().flatten().enumerate() {
            if let Some(peer) = path.get(neighbour) {
                topology.connect(peer.clone(), ConnectionId::new(slot as u64 + 1));
            }
        }
        Router::new(path[index].clone(), topology)
    }

    fn resolution(choice: u8) -> Resolution {
        match choice % 4 {
            0 => Resolution::TimedOut,
            1 => Resolution::Cancelled,
            2 => Resolution::ConnectionClosed,
            _ => Resolution::SendFailed(SendOutcome::Failed),
        }
    }

    proptest! {
        #[test]
        fn prop_reply_walks_path_backwards(
            ids in proptest::collection::btree_set("[A-Z]{2}[0-9]{1,2}", 2..7),
        ) {
            let hops: Vec<NodeId> = ids.into_iter().map(|id: String| node(&id)).collect();
            let path: NetworkPath = hops.iter().cloned().collect();

            for index in 0..hops.len() {
                let hop = router_at(&hops, index).reply_hop(&path).unwrap();
                if index == 0 {
                    prop_assert_eq!(hop, ReplyHop::Local);
                } else {
                    match hop {
                        ReplyHop::Forward { next, .. } => prop_assert_eq!(&next, &hops[index - 1]),
                        ReplyHop::Local => prop_assert!(false, "only the source resolves locally"),
                    }
                }
            }
        }

        #[test]
        fn prop_nodes_off_the_path_refuse_replies(
            ids in proptest::collection::btree_set("[A-Y]{2}[0-9]{1,2}", 1..6),
        ) {
            let path: NetworkPath = ids.iter().map(|id| node(id)).collect();
            let router = Router::new(node("ZZ99"), Arc::new(Topology::new()));
            prop_assert!(router.reply_hop(&path).is_err());
        }

        #[test]
        fn prop_pending_request_resolves_exactly_once(
            choices in proptest::collection::vec(any::<u8>(), 1..8),
        ) {
            let store = PendingRequestStore::new(Duration::from_secs(30));
            let id = CorrelationId::new();
            let mut rx = store.register(id.clone(), "Reset", None).unwrap();

            let mut accepted = Vec::new();
            for choice in &choices {
                if store.complete(&id, resolution(*choice)) {
                    accepted.push(*choice);
                }
            }

            prop_assert_eq!(accepted.len(), 1);
            prop_assert_eq!(accepted[0], choices[0]);
            let resolved = rx.try_recv().unwrap();
            prop_assert_eq!(
                discriminant(&resolved.resolution),
                discriminant(&resolution(choices[0]))
            );
            prop_assert_eq!(store.pending_count(), 0);
        }

        #[test]
        fn prop_signature_covers_payload(
            original in any::<i32>(),
            changed in any::<i32>(),
        ) {
            prop_assume!(original != changed);
            let signer = signing("cs", keypair(42), Direction::OutgoingRequest);
            let verifier = requiring("cs", &keypair(42), Direction::IncomingRequest);

            let mut frame = Frame::Request(RequestFrame::new(
                CorrelationId::new(),
                "CancelReservation",
                json!({ "reservationId": original }),
                node("CSMS"),
            ));
            signer
                .sign_outgoing(&mut frame, Direction::OutgoingRequest, "CancelReservation")
                .unwrap();
            prop_assert!(verifier
                .verify_incoming(&frame, Direction::IncomingRequest, "CancelReservation")
                .is_ok());

            if let Frame::Request(request) = &mut frame {
                request.payload = json!({ "reservationId": changed });
            }
            prop_assert!(verifier
                .verify_incoming(&frame, Direction::IncomingRequest, "CancelReservation")
                .is_err());
        }
    }
}
