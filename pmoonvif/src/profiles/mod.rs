//! Profile handlers.
//!
//! A handler owns the commands of one ONVIF profile, knows which of its
//! namespaces the device supports and where each service lives, and decodes
//! the replies it claims into [`OnvifResponse`] values.

use std::collections::HashMap;
use std::fmt;

use pmosoap::{SoapMessage, SoapNode};
use serde::Serialize;

use crate::command::{Command, Params};
use crate::errors::{Fault, ProtocolError};
use crate::model::{OnvifResponse, Resolution, Service};

pub mod device;
pub mod media2;
pub mod recording;
pub mod streaming;

pub use self::device::CoreHandler;
pub use self::media2::Media2Handler;
pub use self::recording::RecordingHandler;
pub use self::streaming::StreamingHandler;

/// Scope prefix announcing a profile
const PROFILE_SCOPE: &str = "onvif://www.onvif.org/Profile/";

/// Schema namespace, declared on every envelope
pub const SCHEMA_NS: (&str, &str) = ("tt", "http://www.onvif.org/ver10/schema");

/// One service namespace: wire prefix, URI and conventional path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: &'static str,
    pub uri: &'static str,
    pub default_path: &'static str,
}

pub const DEVICE_NS: Namespace = Namespace {
    prefix: "tds",
    uri: "http://www.onvif.org/ver10/device/wsdl",
    default_path: "/onvif/device_service",
};

pub const MEDIA_NS: Namespace = Namespace {
    prefix: "trt",
    uri: "http://www.onvif.org/ver10/media/wsdl",
    default_path: "/onvif/media_service",
};

pub const MEDIA2_NS: Namespace = Namespace {
    prefix: "tr2",
    uri: "http://www.onvif.org/ver20/media/wsdl",
    default_path: "/onvif/media2_service",
};

pub const RECORDING_NS: Namespace = Namespace {
    prefix: "trc",
    uri: "http://www.onvif.org/ver10/recording/wsdl",
    default_path: "/onvif/recording_service",
};

pub const SEARCH_NS: Namespace = Namespace {
    prefix: "tse",
    uri: "http://www.onvif.org/ver10/search/wsdl",
    default_path: "/onvif/search_service",
};

pub const REPLAY_NS: Namespace = Namespace {
    prefix: "trp",
    uri: "http://www.onvif.org/ver10/replay/wsdl",
    default_path: "/onvif/replay_service",
};

/// Profile identifier, ordered for deterministic routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProfileKind {
    Core,
    S,
    G,
    T,
}

impl ProfileKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProfileKind::Core => "Core",
            ProfileKind::S => "Profile S",
            ProfileKind::G => "Profile G",
            ProfileKind::T => "Profile T",
        }
    }

    /// Profile announced by a scope item, e.g.
    /// `onvif://www.onvif.org/Profile/Streaming`
    pub fn from_scope(item: &str) -> Option<Self> {
        let name = item.trim().strip_prefix(PROFILE_SCOPE)?.trim_end_matches('/');
        match name {
            "Streaming" | "S" => Some(ProfileKind::S),
            "T" => Some(ProfileKind::T),
            "G" => Some(ProfileKind::G),
            _ => None,
        }
    }

    pub fn instantiate(self) -> Box<dyn ProfileHandler> {
        match self {
            ProfileKind::Core => Box::new(CoreHandler::new()),
            ProfileKind::S => Box::new(StreamingHandler::new()),
            ProfileKind::G => Box::new(RecordingHandler::new()),
            ProfileKind::T => Box::new(Media2Handler::new()),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Namespaces confirmed by the device and resolved service paths
#[derive(Debug, Clone, Default)]
pub struct ProfileState {
    pub supported: Vec<&'static str>,
    pub endpoints: HashMap<&'static str, String>,
}

impl ProfileState {
    /// Intersects `declared` with the discovered services
    pub fn configure(&mut self, declared: &[Namespace], services: &[Service]) {
        self.supported.clear();
        for ns in declared {
            if let Some(service) = services.iter().find(|s| s.namespace == ns.uri) {
                self.supported.push(ns.uri);
                if let Some(path) = xaddr_path(&service.xaddr) {
                    self.endpoints.insert(ns.uri, path);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.supported.clear();
        self.endpoints.clear();
    }
}

/// Behaviour shared by every profile handler
pub trait ProfileHandler: Send {
    fn kind(&self) -> ProfileKind;

    fn declared_namespaces(&self) -> &'static [Namespace];

    fn commands(&self) -> &'static [Command];

    fn state(&self) -> &ProfileState;

    fn state_mut(&mut self) -> &mut ProfileState;

    /// Decodes a claimed reply to `command`, sent with `request`
    fn decode(
        &mut self,
        command: Command,
        message: &SoapMessage,
        request: &Params,
    ) -> Result<OnvifResponse, Fault>;

    /// Drops cached device data
    fn clear(&mut self) {}

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn supported_namespaces(&self) -> &[&'static str] {
        &self.state().supported
    }

    fn namespace_for(&self, prefix: &str) -> Option<&'static Namespace> {
        self.declared_namespaces().iter().find(|ns| ns.prefix == prefix)
    }

    fn is_available(&self, command: Command) -> bool {
        command.profile() == self.kind()
            && self
                .namespace_for(command.action_prefix())
                .is_some_and(|ns| self.state().supported.contains(&ns.uri))
    }

    fn available_commands(&self) -> Vec<Command> {
        self.commands()
            .iter()
            .copied()
            .filter(|c| self.is_available(*c))
            .collect()
    }

    /// Service path for `command`: discovered endpoint or default path
    fn path_for(&self, command: Command) -> Option<String> {
        let ns = self.namespace_for(command.action_prefix())?;
        Some(
            self.state()
                .endpoints
                .get(ns.uri)
                .cloned()
                .unwrap_or_else(|| ns.default_path.to_string()),
        )
    }

    /// Namespace declarations placed on the envelope
    fn namespace_decls(&self) -> Vec<(&'static str, &'static str)> {
        let mut decls: Vec<(&'static str, &'static str)> = self
            .declared_namespaces()
            .iter()
            .map(|ns| (ns.prefix, ns.uri))
            .collect();
        decls.push(SCHEMA_NS);
        decls
    }

    /// Command whose reply `message` is, if this handler owns it
    fn claimed_command(&self, message: &SoapMessage) -> Option<Command> {
        let namespace = message.namespace.as_deref()?;
        if !self.state().supported.iter().any(|ns| *ns == namespace) {
            return None;
        }
        self.commands().iter().copied().find(|c| {
            c.response_name() == message.name
                && self
                    .namespace_for(c.action_prefix())
                    .is_some_and(|ns| ns.uri == namespace)
        })
    }

    fn claims(&self, message: &SoapMessage) -> bool {
        self.claimed_command(message).is_some()
    }

    /// Claims and decodes `message`, the reply to a request sent with
    /// `request`; `None` when not claimed
    fn callback_handler(
        &mut self,
        message: &SoapMessage,
        request: &Params,
    ) -> Option<Result<OnvifResponse, Fault>> {
        let command = self.claimed_command(message)?;
        Some(self.decode(command, message, request))
    }
}

/// Path part of an advertised service address.
///
/// Devices behind NAT announce hosts unreachable from the client, so only
/// the path is kept and joined to the configured address.
pub fn xaddr_path(xaddr: &str) -> Option<String> {
    let url = url::Url::parse(xaddr.trim()).ok()?;
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Some(path)
}

pub(crate) fn text(node: &SoapNode, key: &str) -> Option<String> {
    node.text(key).map(str::to_string)
}

pub(crate) fn text_at(node: &SoapNode, path: &[&str]) -> Option<String> {
    node.path(path).and_then(SoapNode::scalar).map(str::to_string)
}

pub(crate) fn required(
    node: &SoapNode,
    action: &'static str,
    field: &'static str,
) -> Result<String, Fault> {
    text(node, field).ok_or_else(|| Fault::protocol(ProtocolError::MissingField { action, field }))
}

pub(crate) fn flag(node: &SoapNode, key: &str) -> bool {
    node.text(key)
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

pub(crate) fn resolution(node: Option<&SoapNode>) -> Option<Resolution> {
    let node = node?;
    Some(Resolution {
        width: node.text("Width")?.parse().ok()?,
        height: node.text("Height")?.parse().ok()?,
    })
}
