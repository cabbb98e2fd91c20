//! # pmosoap - couche SOAP/XML pour les clients ONVIF
//!
//! Ce crate fournit le collaborateur "transport" du moteur ONVIF :
//!
//! - ✅ Construction d'enveloppes SOAP 1.2 ([`SoapRequest`])
//! - ✅ Conversion XML → arbre clé/valeur ([`SoapNode`], [`SoapMessage`])
//! - ✅ Envoi HTTP asynchrone par callback ([`SoapTransport`], [`UreqTransport`])
//! - ✅ Hooks pré-envoi / pré-parsing ([`RequestHooks`])
//! - ✅ Sonde `WWW-Authenticate` pour l'authentification Digest
//!
//! ## Example
//!
//! ```ignore
//! use pmosoap::{SoapRequest, ParamValue};
//!
//! let mut request = SoapRequest::new(
//!     &[("tds", "http://www.onvif.org/ver10/device/wsdl")],
//!     "tds:GetServices",
//! );
//! request.set_parameter("tds:IncludeCapability", ParamValue::from(false));
//! let xml = request.to_xml().unwrap();
//! assert!(xml.contains("<tds:IncludeCapability>false</tds:IncludeCapability>"));
//! ```

mod envelope;
mod parser;
mod probe;
mod transport;
mod tree;

pub use envelope::{ParamValue, SOAP_ENVELOPE_NS, SoapRequest};
pub use parser::{ParseOptions, SoapParseError, parse_soap_response};
pub use probe::probe_www_authenticate;
pub use transport::{
    Completion, NoHooks, RawRequest, RequestHooks, SendOptions, SoapTransport, TransportError,
    TransportReply, UreqTransport,
};
pub use tree::{SoapMessage, SoapNode};

/// Content-Type des requêtes SOAP 1.2
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
