//! Fault taxonomy for ONVIF exchanges.
//!
//! Every failure reported to a [`SessionObserver`](crate::SessionObserver)
//! is a [`Fault`]: either an HTTP/connection level problem, a SOAP fault
//! decoded from the reply body, or an opaque wrapper around an error the
//! engine could not classify.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use pmosoap::{SoapNode, TransportError};
use thiserror::Error;
use tracing::warn;

/// Primary fault code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    /// HTTP error status or unreachable device
    Transport,
    VersionMismatch,
    MustUnderstand,
    DataEncodingUnknown,
    Sender,
    Receiver,
    /// Forced digest authentication but the device sent no challenge
    NoRealm,
    UnknownTransportError,
    UnknownProtocolError,
}

impl FaultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCode::Transport => "TransportFault",
            FaultCode::VersionMismatch => "VersionMismatch",
            FaultCode::MustUnderstand => "MustUnderstand",
            FaultCode::DataEncodingUnknown => "DataEncodingUnknown",
            FaultCode::Sender => "SenderFault",
            FaultCode::Receiver => "ReceiverFault",
            FaultCode::NoRealm => "AuthFault",
            FaultCode::UnknownTransportError => "UnknownTransportError",
            FaultCode::UnknownProtocolError => "UnknownProtocolError",
        }
    }

    /// SOAP 1.2 `Code/Value` or SOAP 1.1 `faultcode`, prefix stripped
    fn from_soap(value: &str) -> Option<Self> {
        match local_name(value) {
            "VersionMismatch" => Some(FaultCode::VersionMismatch),
            "MustUnderstand" => Some(FaultCode::MustUnderstand),
            "DataEncodingUnknown" => Some(FaultCode::DataEncodingUnknown),
            "Sender" | "Client" => Some(FaultCode::Sender),
            "Receiver" | "Server" => Some(FaultCode::Receiver),
            _ => None,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! fault_subcodes {
    ($($variant:ident),+ $(,)?) => {
        /// Subcode vocabulary understood by the engine
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FaultSubcode {
            $($variant),+
        }

        impl FaultSubcode {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(FaultSubcode::$variant => stringify!($variant)),+
                }
            }

            /// Case-sensitive lookup, namespace prefix ignored
            pub fn from_name(value: &str) -> Option<Self> {
                match local_name(value) {
                    $(stringify!($variant) => Some(FaultSubcode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

fault_subcodes! {
    WellFormed,
    TagMismatch,
    Tag,
    Namespace,
    MissingAttr,
    ProhibAttr,
    InvalidArgs,
    InvalidArgVal,
    UnknownAction,
    OperationProhibited,
    NotAuthorized,
    ActionNotSupported,
    Action,
    OutofMemory,
    CriticalError,
    NoProfile,
    NoSource,
    NoConfig,
    NoEntity,
    NoRecording,
    InvalidToken,
    InvalidHostname,
    InvalidStreamSetup,
    StreamConflict,
    ConfigModify,
    ServiceNotSupported,
    MaxUsers,
    UsernameClash,
    PasswordTooWeak,
}

impl fmt::Display for FaultSubcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn local_name(value: &str) -> &str {
    let value = value.trim();
    value.rsplit_once(':').map_or(value, |(_, local)| local)
}

/// Why a fault body could not be classified
#[derive(Debug, Error)]
pub enum FaultParseError {
    #[error("fault body has no code")]
    MissingCode,

    #[error("unrecognised fault code '{0}'")]
    UnknownCode(String),

    #[error("unrecognised fault subcode '{0}'")]
    UnknownSubcode(String),

    #[error("unexpected shape for fault field '{0}'")]
    UnexpectedShape(&'static str),
}

/// Engine-side protocol errors, wrapped in an `UnknownProtocolError` fault
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no profile handler claimed the '{0}' response")]
    Unclaimed(String),

    #[error("'{action}' response has no '{field}' element")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("'{action}' response has an invalid '{field}' value: {value}")]
    InvalidField {
        action: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("command '{0}' is not available on this device")]
    CommandUnavailable(&'static str),

    #[error("command '{0}' requires parameters")]
    ParametersRequired(&'static str),
}

/// Classified failure of one exchange
#[derive(Clone)]
pub struct Fault {
    code: FaultCode,
    http_status: Option<u16>,
    subcodes: Vec<FaultSubcode>,
    reason: Option<String>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl Fault {
    pub fn new(code: FaultCode) -> Self {
        Self {
            code,
            http_status: None,
            subcodes: Vec::new(),
            reason: None,
            source: None,
        }
    }

    /// Classifies one exchange.
    ///
    /// An explicit `code` wins over an HTTP status >= 300, which wins over
    /// a fault `body`. Returns `None` when none of them signals a fault.
    pub fn classify(
        code: Option<FaultCode>,
        http_status: u16,
        body: Option<&SoapNode>,
    ) -> Option<Self> {
        if let Some(code) = code {
            let fault = Fault::new(code);
            return Some(if http_status >= 300 {
                fault.with_http_status(http_status)
            } else {
                fault
            });
        }

        if http_status >= 300 {
            return Some(Fault::transport(http_status));
        }

        // A body without any code carries no fault signal
        let body = body?;
        match parse_fault_body(body) {
            Err(FaultParseError::MissingCode) => None,
            parsed => Some(Fault::from_parsed_body(body, parsed)),
        }
    }

    /// HTTP level fault
    pub fn transport(http_status: u16) -> Self {
        Fault::new(FaultCode::Transport).with_http_status(http_status)
    }

    /// Decodes the content of a `Fault` element (SOAP 1.2 or 1.1).
    ///
    /// Anything that does not fit the known vocabulary degrades to
    /// `UnknownProtocolError` carrying the parse error.
    pub fn from_fault_body(body: &SoapNode) -> Self {
        Fault::from_parsed_body(body, parse_fault_body(body))
    }

    fn from_parsed_body(body: &SoapNode, parsed: Result<Fault, FaultParseError>) -> Self {
        match parsed {
            Ok(fault) => fault,
            Err(e) => {
                if matches!(e, FaultParseError::UnexpectedShape(_)) {
                    warn!(error = %e, body = ?body, "Unrecognised fault body shape, please report it");
                } else {
                    warn!(error = %e, "Fault body outside the known vocabulary");
                }
                Fault::wrap(FaultCode::UnknownProtocolError, e)
            }
        }
    }

    /// Maps a transport failure: unreachable device is a transport fault,
    /// an unreadable reply a protocol error, anything else stays opaque.
    pub fn from_transport(error: TransportError) -> Self {
        if error.is_connection() {
            return Fault::wrap(FaultCode::Transport, error);
        }
        match error {
            TransportError::Parse(_) => Fault::wrap(FaultCode::UnknownProtocolError, error),
            _ => Fault::wrap(FaultCode::UnknownTransportError, error),
        }
    }

    pub fn no_realm() -> Self {
        Fault::new(FaultCode::NoRealm)
    }

    pub fn protocol(error: ProtocolError) -> Self {
        Fault::wrap(FaultCode::UnknownProtocolError, error)
    }

    pub fn wrap(code: FaultCode, error: impl Error + Send + Sync + 'static) -> Self {
        let mut fault = Fault::new(code);
        fault.source = Some(Arc::new(error));
        fault
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_subcodes(mut self, subcodes: &[FaultSubcode]) -> Self {
        self.subcodes = subcodes.iter().take(2).copied().collect();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn code(&self) -> FaultCode {
        self.code
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn subcodes(&self) -> &[FaultSubcode] {
        &self.subcodes
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Wrapped underlying error, if any
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn description(&self) -> &'static str {
        self.code.as_str()
    }

    /// Code name, then HTTP status, subcode chain, reason and wrapped error
    pub fn full_description(&self) -> String {
        let mut out = self.code.as_str().to_string();

        if let Some(status) = self.http_status {
            out.push_str(&format!(" (HTTP {})", status));
        }
        if !self.subcodes.is_empty() {
            let chain: Vec<&str> = self.subcodes.iter().map(FaultSubcode::as_str).collect();
            out.push_str(": ");
            out.push_str(&chain.join(" > "));
        }
        if let Some(reason) = &self.reason {
            out.push_str(&format!(" - {}", reason));
        }
        if let Some(source) = &self.source {
            out.push_str(&format!(" [{}]", source));
        }

        out
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("code", &self.code)
            .field("http_status", &self.http_status)
            .field("subcodes", &self.subcodes)
            .field("reason", &self.reason)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_description())
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn Error + 'static))
    }
}

/// Scalar value of a field that devices encode either as a bare string or
/// as a `{ Value: ... }` wrapper, possibly next to other keys.
fn field_value<'a>(node: &'a SoapNode, field: &'static str) -> Result<&'a str, FaultParseError> {
    if let Some(value) = node.scalar() {
        return Ok(value);
    }
    node.get("Value")
        .or_else(|| node.get("value"))
        .and_then(SoapNode::scalar)
        .ok_or(FaultParseError::UnexpectedShape(field))
}

fn parse_fault_body(body: &SoapNode) -> Result<Fault, FaultParseError> {
    // SOAP 1.2
    if let Some(code_node) = body.get("Code") {
        let code_value = field_value(code_node, "Code")?;
        let code = FaultCode::from_soap(code_value)
            .ok_or_else(|| FaultParseError::UnknownCode(code_value.to_string()))?;

        let mut subcodes = Vec::new();
        let mut current = code_node.get("Subcode");
        while let Some(node) = current {
            if subcodes.len() == 2 {
                break;
            }
            let value = field_value(node, "Subcode")?;
            let subcode = FaultSubcode::from_name(value)
                .ok_or_else(|| FaultParseError::UnknownSubcode(value.to_string()))?;
            subcodes.push(subcode);
            current = node.get("Subcode");
        }

        let reason = match body.get("Reason") {
            Some(node) => Some(reason_text(node)?),
            None => None,
        };

        let mut fault = Fault::new(code).with_subcodes(&subcodes);
        fault.reason = reason;
        return Ok(fault);
    }

    // SOAP 1.1
    if let Some(code_node) = body.get("faultcode") {
        let code_value = field_value(code_node, "faultcode")?;
        let code = FaultCode::from_soap(code_value)
            .ok_or_else(|| FaultParseError::UnknownCode(code_value.to_string()))?;
        let mut fault = Fault::new(code);
        fault.reason = body.text("faultstring").map(str::to_string);
        return Ok(fault);
    }

    Err(FaultParseError::MissingCode)
}

fn reason_text(node: &SoapNode) -> Result<String, FaultParseError> {
    if let Some(text) = node.scalar() {
        return Ok(text.to_string());
    }
    // Several languages: keep the first one
    node.items("Text")
        .first()
        .and_then(|t| t.scalar())
        .map(str::to_string)
        .ok_or(FaultParseError::UnexpectedShape("Reason"))
}
