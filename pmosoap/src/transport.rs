//! Transport HTTP des requêtes SOAP
//!
//! L'envoi se fait sur un thread de travail : l'appelant fournit une
//! [`Completion`] invoquée exactement une fois avec le résultat.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};
use ureq::Agent;

use crate::envelope::SoapRequest;
use crate::parser::{ParseOptions, SoapParseError, parse_soap_response};
use crate::tree::SoapMessage;
use crate::SOAP_CONTENT_TYPE;

/// Requête HTTP brute, exposée aux hooks avant l'envoi
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawRequest {
    /// Ajoute ou remplace un en-tête (comparaison insensible à la casse)
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Réponse HTTP reçue pour une requête SOAP
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// Code HTTP
    pub status: u16,

    /// En-têtes de la réponse
    pub headers: Vec<(String, String)>,

    /// Premier élément du corps SOAP, `None` si le corps d'une réponse
    /// en erreur HTTP n'était pas une enveloppe SOAP
    pub message: Option<SoapMessage>,
}

impl TransportReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Erreurs du transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    #[error("Failed to serialize SOAP envelope: {0}")]
    Envelope(#[from] xmltree::Error),

    #[error("Invalid SOAP response: {0}")]
    Parse(#[from] SoapParseError),
}

impl TransportError {
    /// Vrai si l'équipement n'a pas pu être joint
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            TransportError::Http(
                ureq::Error::Io(_)
                    | ureq::Error::Timeout(_)
                    | ureq::Error::HostNotFound
                    | ureq::Error::ConnectionFailed
            )
        )
    }
}

/// Points d'interception d'une requête
///
/// `mutate_request` est appelé juste avant l'envoi (c'est là que se pose
/// l'en-tête `Authorization`), `inspect_raw_bytes` avant le parsing.
pub trait RequestHooks: Send + Sync {
    fn mutate_request(&self, request: RawRequest) -> RawRequest {
        request
    }

    fn inspect_raw_bytes(&self, data: Vec<u8>) -> Vec<u8> {
        data
    }
}

/// Hooks neutres
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RequestHooks for NoHooks {}

/// Callback de fin de requête
pub type Completion = Box<dyn FnOnce(Result<TransportReply, TransportError>) + Send + 'static>;

/// Options par requête
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Conserve les attributs XML dans l'arbre de réponse
    pub keep_attributes: bool,
}

/// Abstraction du transport SOAP
pub trait SoapTransport: Send + Sync {
    /// Envoie `request` vers `url`. `completion` est appelée exactement
    /// une fois, éventuellement depuis un autre thread.
    fn send(
        &self,
        request: &SoapRequest,
        url: &str,
        options: SendOptions,
        hooks: Arc<dyn RequestHooks>,
        completion: Completion,
    );
}

/// Transport basé sur `ureq`, un thread par requête
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        // Les erreurs HTTP doivent laisser le corps lisible (SOAP Fault en 500)
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self { agent }
    }
}

impl SoapTransport for UreqTransport {
    fn send(
        &self,
        request: &SoapRequest,
        url: &str,
        options: SendOptions,
        hooks: Arc<dyn RequestHooks>,
        completion: Completion,
    ) {
        let body = match request.to_xml() {
            Ok(xml) => xml.into_bytes(),
            Err(e) => {
                completion(Err(TransportError::Envelope(e)));
                return;
            }
        };

        let raw = RawRequest {
            method: "POST".to_string(),
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), SOAP_CONTENT_TYPE.to_string())],
            body,
        };
        let agent = self.agent.clone();
        let action = request.action().to_string();

        thread::spawn(move || {
            let result = execute(&agent, raw, options, hooks.as_ref());
            match &result {
                Ok(reply) => debug!(action = %action, status = reply.status, "SOAP reply received"),
                Err(e) => debug!(action = %action, error = %e, "SOAP request failed"),
            }
            completion(result);
        });
    }
}

fn execute(
    agent: &Agent,
    raw: RawRequest,
    options: SendOptions,
    hooks: &dyn RequestHooks,
) -> Result<TransportReply, TransportError> {
    let raw = hooks.mutate_request(raw);
    trace!(url = %raw.url, bytes = raw.body.len(), "Sending SOAP request");

    let mut builder = agent.post(raw.url.as_str());
    for (name, value) in &raw.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let mut response = builder.send(&raw.body[..])?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_string(), v.to_string()))
        })
        .collect();

    let data = response.body_mut().read_to_vec()?;
    let data = hooks.inspect_raw_bytes(data);

    let parse_options = ParseOptions {
        keep_attributes: options.keep_attributes,
    };
    let message = match parse_soap_response(&data, parse_options) {
        Ok(message) => Some(message),
        // Une page d'erreur HTML sur un 401/404 n'est pas une erreur de parsing
        Err(_) if status >= 300 => None,
        Err(e) => return Err(e.into()),
    };

    Ok(TransportReply {
        status,
        headers,
        message,
    })
}
