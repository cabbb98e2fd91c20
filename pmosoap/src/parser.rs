//! Parser des réponses SOAP vers l'arbre [`SoapNode`]

use std::io::BufReader;

use indexmap::IndexMap;
use xmltree::Element;

use crate::tree::{ATTRIBUTE_PREFIX, SoapMessage, SoapNode, TEXT_KEY};

/// Options de conversion XML → arbre
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Conserve les attributs XML sous des clés `@nom`
    pub keep_attributes: bool,
}

/// Erreur de parsing SOAP
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("Empty SOAP Body")]
    EmptyBody,
}

/// Parse une enveloppe SOAP et renvoie le premier élément du corps
pub fn parse_soap_response(
    xml: &[u8],
    options: ParseOptions,
) -> Result<SoapMessage, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    if root.name != "Envelope" {
        return Err(SoapParseError::MissingEnvelope);
    }

    let body = root.get_child("Body").ok_or(SoapParseError::MissingBody)?;

    let message = body
        .children
        .iter()
        .find_map(|n| n.as_element())
        .ok_or(SoapParseError::EmptyBody)?;

    Ok(SoapMessage {
        name: message.name.clone(),
        namespace: message.namespace.clone(),
        content: node_from_element(message, &options),
    })
}

fn text_of(elem: &Element) -> String {
    elem.get_text()
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

fn node_from_element(elem: &Element, options: &ParseOptions) -> SoapNode {
    let children: Vec<&Element> = elem
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .collect();
    let with_attributes = options.keep_attributes && !elem.attributes.is_empty();

    if children.is_empty() && !with_attributes {
        return SoapNode::Text(text_of(elem));
    }

    let mut map = IndexMap::new();

    if with_attributes {
        for (name, value) in &elem.attributes {
            map.insert(
                format!("{}{}", ATTRIBUTE_PREFIX, name),
                SoapNode::Text(value.clone()),
            );
        }
    }

    if children.is_empty() {
        let text = text_of(elem);
        if !text.is_empty() {
            map.insert(TEXT_KEY.to_string(), SoapNode::Text(text));
        }
    }

    for child in children {
        let node = node_from_element(child, options);
        match map.get_mut(&child.name) {
            Some(SoapNode::List(items)) => items.push(node),
            Some(existing) => {
                let first = std::mem::replace(existing, SoapNode::List(Vec::new()));
                *existing = SoapNode::List(vec![first, node]);
            }
            None => {
                map.insert(child.name.clone(), node);
            }
        }
    }

    SoapNode::Object(map)
}
