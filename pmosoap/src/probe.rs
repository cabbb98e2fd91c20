//! Sonde du challenge `WWW-Authenticate`

use std::time::Duration;

use tracing::{debug, trace};
use ureq::Agent;

use crate::SOAP_CONTENT_TYPE;
use crate::envelope::SOAP_ENVELOPE_NS;
use crate::transport::TransportError;

/// Envoie une enveloppe SOAP vide non authentifiée vers `url` et renvoie
/// l'en-tête `WWW-Authenticate` de type Digest si l'équipement répond 401.
///
/// Une nouvelle connexion est ouverte à chaque appel : certains
/// équipements refusent de réémettre un challenge sur une connexion
/// réutilisée.
pub fn probe_www_authenticate(
    url: &str,
    timeout: Duration,
) -> Result<Option<String>, TransportError> {
    let agent: Agent = Agent::config_builder()
        .http_status_as_error(false)
        .max_idle_connections(0)
        .timeout_global(Some(timeout))
        .build()
        .into();

    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="{}"><s:Body/></s:Envelope>"#,
        SOAP_ENVELOPE_NS
    );

    trace!(url = %url, "Probing for digest challenge");
    let response = agent
        .post(url)
        .header("Content-Type", SOAP_CONTENT_TYPE)
        .send(body)?;

    let status = response.status().as_u16();
    if status != 401 {
        debug!(url = %url, status, "Probe did not return a challenge");
        return Ok(None);
    }

    let challenge = response
        .headers()
        .get_all("www-authenticate")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| {
            v.trim_start()
                .get(..6)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
        })
        .map(str::to_string);

    Ok(challenge)
}
