//! # pmoonvif - client-side ONVIF protocol engine
//!
//! One [`OnvifSession`] drives one device:
//!
//! - capability discovery (device information, services, service
//!   capabilities, scopes, network interfaces, capabilities), step by step
//! - HTTP Basic / Digest authentication with challenge negotiation
//! - profile handlers (Core, S, T, G) registered from the discovered scopes
//! - typed replies routed to per-command dispatchers or to the observer
//! - a closed fault taxonomy, one `on_failure` per failed exchange
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pmoonvif::{Fault, OnvifSession, SessionConfig, SessionObserver};
//!
//! struct Printer;
//!
//! impl SessionObserver for Printer {
//!     fn on_failure(&self, fault: &Fault) {
//!         eprintln!("{}", fault.full_description());
//!     }
//!
//!     fn on_initialized(&self) {
//!         println!("ready");
//!     }
//! }
//!
//! let config = SessionConfig::new("192.168.1.64", 80, "admin", "secret");
//! let session = OnvifSession::new(&config)?;
//! let observer = Arc::new(Printer);
//! session.attach_observer(&observer);
//! ```

mod auth;

pub mod command;
pub mod config;
pub mod context;
pub mod digest;
pub mod discovery;
pub mod errors;
pub mod model;
pub mod observer;
pub mod profiles;
pub mod registry;
pub mod session;

pub use auth::AuthMethod;
pub use command::{Command, Params};
pub use config::{Scheme, SessionConfig};
pub use context::{DeliveryThread, InlineContext, Job, MainContext};
pub use digest::{ChallengeProbe, DigestChallenge, DigestNegotiator, HttpChallengeProbe};
pub use discovery::{Discovery, DiscoveryStep};
pub use errors::{Fault, FaultCode, FaultParseError, FaultSubcode, ProtocolError};
pub use model::{
    Capabilities, DeviceInformation, Hostname, MediaProfile, MediaUri, NetworkInterface,
    OnvifResponse, Recording, RecordingSummary, Resolution, Scope, Service, ServiceCapabilities,
    SystemDateAndTime, Track, User, VideoSource,
};
pub use observer::{CommandDispatcher, ParameterRequest, SessionObserver};
pub use profiles::{ProfileHandler, ProfileKind};
pub use registry::ProfileRegistry;
pub use session::OnvifSession;
