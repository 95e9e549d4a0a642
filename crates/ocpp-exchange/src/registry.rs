//! Handler registry.
//!
//! An explicit, action-keyed table of typed callbacks. Each action has:
//!
//! - its request schema (used to parse the payload once per request)
//! - request observers, fired for side effects only
//! - processors, whose results compete to become the response
//! - response-sent observers, told how the reply went out
//!
//! Registrations keep their order. Adding a handler clones the action's
//! entry, extends the copy and publishes it, so a dispatch in flight keeps
//! working on the snapshot it started with.

use crate::transport::{ConnectionId, SendOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use ocpp_types::{Action, CorrelationId, ExchangeFailure, MessageKind, NetworkPath};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// What handlers learn about the request they are handling.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Action name.
    pub action: String,
    /// Path the request travelled.
    pub network_path: NetworkPath,
    /// Connection it arrived on.
    pub connection: ConnectionId,
    /// When this node received it.
    pub received_at: DateTime<Utc>,
}

/// How a reply left this node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSent {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Action name.
    pub action: String,
    /// `Response` or `RequestError`.
    pub kind: MessageKind,
    /// The failure, when the reply was an error frame.
    pub failure: Option<ExchangeFailure>,
    /// Transmission outcome.
    pub send_outcome: SendOutcome,
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two different request types were registered under one action name.
    #[error("action {action} is already registered with a different request type")]
    SchemaMismatch {
        /// Action name.
        action: String,
    },
}

pub(crate) type ErasedRequest = Arc<dyn Any + Send + Sync>;
type ParseFn = Arc<dyn Fn(&Value) -> Result<ErasedRequest, serde_json::Error> + Send + Sync>;
type ObserverFn = Arc<dyn Fn(&RequestContext, &(dyn Any + Send + Sync)) + Send + Sync>;
pub(crate) type ProcessorFn = Arc<
    dyn Fn(RequestContext, ErasedRequest) -> BoxFuture<'static, anyhow::Result<Option<Value>>>
        + Send
        + Sync,
>;
type SentObserverFn = Arc<dyn Fn(&ResponseSent) + Send + Sync>;

/// Everything registered for one action.
#[derive(Clone)]
pub(crate) struct ActionEntry {
    request_type: TypeId,
    parse: ParseFn,
    pub(crate) observers: Vec<ObserverFn>,
    pub(crate) processors: Vec<ProcessorFn>,
    pub(crate) sent_observers: Vec<SentObserverFn>,
}

impl ActionEntry {
    fn new<A: Action>() -> Self {
        Self {
            request_type: TypeId::of::<A::Request>(),
            parse: Arc::new(|payload: &Value| {
                A::parse_request(payload).map(|request| Arc::new(request) as ErasedRequest)
            }),
            observers: Vec::new(),
            processors: Vec::new(),
            sent_observers: Vec::new(),
        }
    }

    /// Parse a payload into the action's request type.
    pub(crate) fn parse(&self, payload: &Value) -> Result<ErasedRequest, serde_json::Error> {
        (self.parse)(payload)
    }
}

/// Action-keyed table of handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    actions: DashMap<String, Arc<ActionEntry>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn update<A: Action>(&self, f: impl FnOnce(&mut ActionEntry)) -> Result<(), RegistryError> {
        let mut slot = self
            .actions
            .entry(A::NAME.to_string())
            .or_insert_with(|| Arc::new(ActionEntry::new::<A>()));
        if slot.request_type != TypeId::of::<A::Request>() {
            return Err(RegistryError::SchemaMismatch {
                action: A::NAME.to_string(),
            });
        }
        let mut entry = ActionEntry::clone(&slot);
        f(&mut entry);
        *slot = Arc::new(entry);
        Ok(())
    }

    /// Make an action known without any handler.
    ///
    /// Requests for it are parsed and verified, then answered with `Failed`.
    pub fn register_action<A: Action>(&self) -> Result<(), RegistryError> {
        self.update::<A>(|_| {})
    }

    /// Add a request observer.
    pub fn observe<A, F>(&self, observer: F) -> Result<(), RegistryError>
    where
        A: Action,
        F: Fn(&RequestContext, &A::Request) + Send + Sync + 'static,
    {
        let erased: ObserverFn = Arc::new(
            move |ctx: &RequestContext, request: &(dyn Any + Send + Sync)| {
                if let Some(request) = request.downcast_ref::<A::Request>() {
                    observer(ctx, request);
                }
            },
        );
        self.update::<A>(|entry| entry.observers.push(erased))
    }

    /// Add a processor.
    ///
    /// `Ok(None)` means the processor has nothing to say about this request.
    pub fn process<A, F, Fut>(&self, processor: F) -> Result<(), RegistryError>
    where
        A: Action,
        F: Fn(RequestContext, Arc<A::Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<A::Response>>> + Send + 'static,
    {
        let erased: ProcessorFn = Arc::new(
            move |ctx: RequestContext,
                  request: ErasedRequest|
                  -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
                match request.downcast::<A::Request>() {
                    Ok(request) => {
                        let fut = processor(ctx, request);
                        async move {
                            let response = fut.await?;
                            let value = response.map(serde_json::to_value).transpose()?;
                            Ok::<_, anyhow::Error>(value)
                        }
                        .boxed()
                    }
                    Err(_) => async move {
                        Err(anyhow::anyhow!("request type mismatch for {}", A::NAME))
                    }
                    .boxed(),
                }
            },
        );
        self.update::<A>(|entry| entry.processors.push(erased))
    }

    /// Add a response-sent observer.
    pub fn on_response_sent<A, F>(&self, observer: F) -> Result<(), RegistryError>
    where
        A: Action,
        F: Fn(&ResponseSent) + Send + Sync + 'static,
    {
        let erased: SentObserverFn = Arc::new(observer);
        self.update::<A>(|entry| entry.sent_observers.push(erased))
    }

    /// Snapshot of an action's handlers.
    pub(crate) fn get(&self, action: &str) -> Option<Arc<ActionEntry>> {
        self.actions.get(action).map(|entry| Arc::clone(&entry))
    }

    /// Whether anything is registered for `action`.
    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of processors registered for `action`.
    pub fn processor_count(&self, action: &str) -> usize {
        self.actions
            .get(action)
            .map_or(0, |entry| entry.processors.len())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}
