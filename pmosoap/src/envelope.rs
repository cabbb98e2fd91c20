//! Construction des requêtes SOAP 1.2

use xmltree::{Element, XMLNode};

/// Namespace de l'enveloppe SOAP 1.2
pub const SOAP_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Valeur d'un paramètre de requête.
///
/// Les listes sont émises comme des éléments frères portant le même nom,
/// jamais comme un élément englobant.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Map(Vec<(String, ParamValue)>),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Construit une valeur structurée à partir de paires (clé, valeur)
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        ParamValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Text(if value { "true" } else { "false" }.to_string())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Requête SOAP prête à être sérialisée
#[derive(Debug, Clone)]
pub struct SoapRequest {
    /// Déclarations de namespaces (préfixe, URI) posées sur l'enveloppe
    namespaces: Vec<(String, String)>,

    /// Nom qualifié de l'action (ex: "tds:GetDeviceInformation")
    action: String,

    /// Paramètres dans l'ordre d'insertion, clés répétables
    parameters: Vec<(String, ParamValue)>,
}

impl SoapRequest {
    /// Crée une requête pour l'action `soap_action` (nom qualifié)
    pub fn new(namespaces: &[(&str, &str)], soap_action: &str) -> Self {
        Self {
            namespaces: namespaces
                .iter()
                .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
                .collect(),
            action: soap_action.to_string(),
            parameters: Vec::new(),
        }
    }

    /// Ajoute un paramètre. Appeler plusieurs fois avec la même clé
    /// produit plusieurs éléments frères.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: ParamValue) {
        self.parameters.push((key.into(), value));
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }

    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    /// Sérialise l'enveloppe complète
    pub fn to_xml(&self) -> Result<String, xmltree::Error> {
        let mut action_elem = Element::new(&self.action);
        for (key, value) in &self.parameters {
            push_param(&mut action_elem, key, value);
        }

        let mut body = Element::new("s:Body");
        body.children.push(XMLNode::Element(action_elem));

        let mut envelope = Element::new("s:Envelope");
        envelope
            .attributes
            .insert("xmlns:s".to_string(), SOAP_ENVELOPE_NS.to_string());
        for (prefix, uri) in &self.namespaces {
            envelope
                .attributes
                .insert(format!("xmlns:{}", prefix), uri.clone());
        }
        envelope.children.push(XMLNode::Element(body));

        let mut buf = Vec::new();
        let config = xmltree::EmitterConfig::new()
            .write_document_declaration(true)
            .perform_indent(false);
        envelope.write_with_config(&mut buf, config)?;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn push_param(parent: &mut Element, key: &str, value: &ParamValue) {
    match value {
        ParamValue::Text(text) => {
            let mut child = Element::new(key);
            child.children.push(XMLNode::Text(text.clone()));
            parent.children.push(XMLNode::Element(child));
        }
        ParamValue::Map(entries) => {
            let mut child = Element::new(key);
            for (k, v) in entries {
                push_param(&mut child, k, v);
            }
            parent.children.push(XMLNode::Element(child));
        }
        ParamValue::List(items) => {
            for item in items {
                push_param(parent, key, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";

    #[test]
    fn test_build_empty_request() {
        let request = SoapRequest::new(&[("tds", DEVICE_NS)], "tds:GetDeviceInformation");
        let xml = request.to_xml().unwrap();

        assert!(xml.contains("<tds:GetDeviceInformation"));
        assert!(xml.contains("xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\""));
        assert!(xml.contains("xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\""));
        assert!(xml.contains("<s:Body>"));
    }

    #[test]
    fn test_nested_parameters() {
        let mut request = SoapRequest::new(&[("trt", "urn:media")], "trt:GetStreamUri");
        request.set_parameter(
            "trt:StreamSetup",
            ParamValue::map([
                ("tt:Stream", ParamValue::from("RTP-Unicast")),
                (
                    "tt:Transport",
                    ParamValue::map([("tt:Protocol", "RTSP")]),
                ),
            ]),
        );
        request.set_parameter("trt:ProfileToken", ParamValue::from("main"));
        let xml = request.to_xml().unwrap();

        assert!(xml.contains("<tt:Stream>RTP-Unicast</tt:Stream>"));
        assert!(xml.contains("<tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport>"));
        assert!(xml.contains("<trt:ProfileToken>main</trt:ProfileToken>"));
    }

    #[test]
    fn test_list_values_become_siblings() {
        let mut request = SoapRequest::new(&[("tds", DEVICE_NS)], "tds:SetScopes");
        request.set_parameter(
            "tds:Scopes",
            ParamValue::from(vec!["onvif://a", "onvif://b"]),
        );
        let xml = request.to_xml().unwrap();

        assert_eq!(xml.matches("<tds:Scopes>").count(), 2);
        assert!(xml.contains("<tds:Scopes>onvif://a</tds:Scopes><tds:Scopes>onvif://b</tds:Scopes>"));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut request = SoapRequest::new(&[("tds", DEVICE_NS)], "tds:SetHostname");
        request.set_parameter("tds:Name", ParamValue::from("a<b&c"));
        let xml = request.to_xml().unwrap();

        assert!(xml.contains("a&lt;b&amp;c"));
    }
}
