//! # OCPP Exchange - Message Exchange Engine
//!
//! Routing, signing, correlation and dispatch for nodes exchanging OCPP
//! frames, directly or through relays.
//!
//! ## Components
//!
//! | Module | Contents |
//! |--------|----------|
//! | `routing` | `Topology` of connection handles, `Router` for forward and reply hops |
//! | `security` | `SignaturePolicy` rules and the `SignatureMiddleware` applying them |
//! | `correlation` | `PendingRequestStore`: exactly-once resolution of outstanding requests |
//! | `registry` | `HandlerRegistry` of observers and processors per action |
//! | `dispatch` | Inbound pipeline: decode, relay or parse, verify, invoke, reply |
//! | `exchange` | `MessageExchange`: outgoing calls, the event loop, wiring |
//! | `transport` | The transport port |
//! | `adapters` | In-memory transport |
//! | `config` | `ExchangeConfig` and its validation |
//! | `reporter` | Error-reporting hook for handler faults |
//!
//! ## Example
//!
//! ```ignore
//! let exchange = Arc::new(
//!     MessageExchange::builder(ExchangeConfig::for_node("CSMS"))
//!         .transport(transport)
//!         .build()?,
//! );
//! tokio::spawn(Arc::clone(&exchange).run(events, shutdown.clone()));
//!
//! let reply = exchange
//!     .call::<CancelReservation>(SourceRouting::to(cp), request)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod correlation;
mod dispatch;
pub mod exchange;
pub mod registry;
pub mod reporter;
pub mod routing;
pub mod security;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-exports
pub use config::{ConfigError, ExchangeConfig, ResultSelection, SecurityConfig};
pub use correlation::{CorrelationError, PendingRequestStore, PendingSnapshot};
pub use exchange::{CallOptions, CallReply, ExchangeBuilder, MessageExchange};
pub use registry::{HandlerRegistry, RegistryError, RequestContext, ResponseSent};
pub use reporter::{CollectingReporter, ErrorReporter, FaultReport, FaultStage, TracingReporter};
pub use routing::{ReplyHop, Router, RoutingError, Topology};
pub use security::{
    ActionFilter, Direction, RuleMode, SignatureMiddleware, SignaturePolicy, SigningError,
    VerificationError,
};
pub use transport::{ConnectionId, InboundFrame, SendOutcome, Transport, TransportEvent};
