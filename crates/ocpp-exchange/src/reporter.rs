//! Error-reporting hook.
//!
//! Handler faults never abort a pipeline. They are turned into an outcome
//! and handed to an [`ErrorReporter`] so the embedding application can count
//! or alert on them.

use ocpp_types::CorrelationId;
use parking_lot::Mutex;
use std::fmt;
use tracing::error;

/// Pipeline stage a fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    /// A request observer panicked.
    Observer,
    /// A processor returned an error or panicked.
    Processor {
        /// Registration index of the processor.
        index: usize,
    },
    /// A response-sent observer panicked.
    ResponseSentObserver,
    /// The dispatch pipeline itself panicked.
    Pipeline,
    /// A peer rejected a response this node sent.
    ResponseRejected,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observer => f.write_str("observer"),
            Self::Processor { index } => write!(f, "processor #{index}"),
            Self::ResponseSentObserver => f.write_str("response-sent observer"),
            Self::Pipeline => f.write_str("pipeline"),
            Self::ResponseRejected => f.write_str("response rejected"),
        }
    }
}

/// A handler fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    /// Request being handled.
    pub correlation_id: CorrelationId,
    /// Its action.
    pub action: String,
    /// Where it happened.
    pub stage: FaultStage,
    /// Error or panic message.
    pub message: String,
}

/// Receives handler faults.
pub trait ErrorReporter: Send + Sync {
    /// Report one fault. Must not block.
    fn report(&self, fault: &FaultReport);
}

/// Logs faults through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, fault: &FaultReport) {
        error!(
            correlation_id = %fault.correlation_id,
            action = %fault.action,
            stage = %fault.stage,
            message = %fault.message,
            "Handler fault"
        );
    }
}

/// Keeps every fault in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    faults: Mutex<Vec<FaultReport>>,
}

impl CollectingReporter {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Faults reported so far.
    pub fn faults(&self) -> Vec<FaultReport> {
        self.faults.lock().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, fault: &FaultReport) {
        self.faults.lock().push(fault.clone());
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
