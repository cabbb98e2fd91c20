//! Embedder-facing callbacks

use pmosoap::SoapMessage;

use crate::command::{Command, Params};
use crate::errors::Fault;
use crate::model::OnvifResponse;

/// Session completion observer.
///
/// Held weakly by the session. Every method runs on the session's
/// [`MainContext`](crate::MainContext). Only `on_failure` is mandatory.
pub trait SessionObserver: Send + Sync {
    /// Exactly one call per failed exchange
    fn on_failure(&self, fault: &Fault);

    /// The device acknowledged a command with an empty reply
    fn on_simple_ack(&self, _command: Command) {}

    /// Capability discovery finished and profiles are registered
    fn on_initialized(&self) {}

    fn on_deinitialized(&self) {}

    /// Sees the decoded tree before routing. Returning `true` consumes
    /// the reply: no handler, dispatcher or observer sees it afterwards.
    fn on_raw_preview(&self, _message: &SoapMessage, _command: Command) -> bool {
        false
    }

    /// A typed reply no dispatcher consumed
    fn on_response(&self, _command: Command, _response: &OnvifResponse) {}
}

/// Result of a parameter producer
#[derive(Debug, Clone)]
pub enum ParameterRequest {
    /// Send the command now with these parameters
    Send(Params),
    /// More input is needed; the embedder runs the command again later
    Defer,
}

/// Embedder-supplied producer/consumer pair for one command
pub trait CommandDispatcher: Send + Sync {
    fn produce_parameters(&self, _command: Command) -> ParameterRequest {
        ParameterRequest::Send(Params::new())
    }

    /// Returns `true` when the reply was handled; `false` lets the
    /// observer receive it
    fn consume_response(&self, _command: Command, _response: &OnvifResponse) -> bool {
        false
    }
}
