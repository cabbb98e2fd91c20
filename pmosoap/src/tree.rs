//! Arbre clé/valeur issu d'une réponse SOAP

use indexmap::IndexMap;

/// Clé portant le texte d'un élément qui possède aussi des attributs
pub const TEXT_KEY: &str = "#text";

/// Préfixe des clés d'attributs
pub const ATTRIBUTE_PREFIX: char = '@';

/// Noeud de l'arbre de réponse.
///
/// - un élément sans enfant ni attribut devient `Text`
/// - un élément structuré devient `Object` (clés = noms locaux)
/// - des enfants répétés sous le même nom deviennent `List`
#[derive(Debug, Clone, PartialEq)]
pub enum SoapNode {
    Text(String),
    Object(IndexMap<String, SoapNode>),
    List(Vec<SoapNode>),
}

impl SoapNode {
    /// Enfant direct `key` d'un objet
    pub fn get(&self, key: &str) -> Option<&SoapNode> {
        match self {
            SoapNode::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Descend le long d'un chemin de clés
    pub fn path(&self, keys: &[&str]) -> Option<&SoapNode> {
        keys.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Valeur scalaire du noeud.
    ///
    /// Accepte une chaîne nue ou un objet enveloppe à une seule clé
    /// `value`/`Value`; les équipements encodent le même champ des deux
    /// façons. Un élément avec attributs expose son texte via `#text`.
    /// Toute autre forme renvoie `None`.
    pub fn scalar(&self) -> Option<&str> {
        match self {
            SoapNode::Text(s) => Some(s.as_str()),
            SoapNode::Object(map) => {
                if let Some(text) = map.get(TEXT_KEY) {
                    return text.scalar();
                }
                if map.len() != 1 {
                    return None;
                }
                map.get("Value")
                    .or_else(|| map.get("value"))
                    .and_then(SoapNode::scalar)
            }
            SoapNode::List(_) => None,
        }
    }

    /// Texte de l'enfant `key`, quelle que soit sa forme
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SoapNode::scalar)
    }

    /// Valeur d'un attribut conservé lors du parsing
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            SoapNode::Object(map) => map
                .get(&format!("{}{}", ATTRIBUTE_PREFIX, name))
                .and_then(SoapNode::scalar),
            _ => None,
        }
    }

    /// Occurrences de l'enfant `key`: zéro, une ou plusieurs
    pub fn items(&self, key: &str) -> Vec<&SoapNode> {
        match self.get(key) {
            Some(SoapNode::List(items)) => items.iter().collect(),
            Some(node) => vec![node],
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SoapNode::Text(s) => s.is_empty(),
            SoapNode::Object(map) => map.is_empty(),
            SoapNode::List(items) => items.is_empty(),
        }
    }
}

/// Premier élément du corps SOAP (action, réponse ou Fault)
#[derive(Debug, Clone, PartialEq)]
pub struct SoapMessage {
    /// Nom local (ex: "GetDeviceInformationResponse", "Fault")
    pub name: String,

    /// URI du namespace de l'élément
    pub namespace: Option<String>,

    /// Contenu de l'élément
    pub content: SoapNode,
}

impl SoapMessage {
    pub fn is_fault(&self) -> bool {
        self.name == "Fault"
    }

    /// Vrai si ce message est la réponse à `action` dans `namespace`
    pub fn is_response_to(&self, action: &str, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
            && self
                .name
                .strip_suffix("Response")
                .is_some_and(|base| base == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entries: Vec<(&str, SoapNode)>) -> SoapNode {
        SoapNode::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn text(s: &str) -> SoapNode {
        SoapNode::Text(s.to_string())
    }

    #[test]
    fn test_scalar_accepts_both_shapes() {
        let bare = text("ter:InvalidArgVal");
        let wrapped = object(vec![("Value", text("ter:InvalidArgVal"))]);
        let lower = object(vec![("value", text("ter:InvalidArgVal"))]);

        assert_eq!(bare.scalar(), Some("ter:InvalidArgVal"));
        assert_eq!(bare.scalar(), wrapped.scalar());
        assert_eq!(bare.scalar(), lower.scalar());
    }

    #[test]
    fn test_scalar_rejects_other_shapes() {
        let two_keys = object(vec![("Value", text("a")), ("Subcode", text("b"))]);
        let list = SoapNode::List(vec![text("a")]);

        assert_eq!(two_keys.scalar(), None);
        assert_eq!(list.scalar(), None);
    }

    #[test]
    fn test_items_normalizes_repetition() {
        let single = object(vec![("Scopes", text("a"))]);
        let many = object(vec![("Scopes", SoapNode::List(vec![text("a"), text("b")]))]);

        assert_eq!(single.items("Scopes").len(), 1);
        assert_eq!(many.items("Scopes").len(), 2);
        assert!(single.items("Missing").is_empty());
    }

    #[test]
    fn test_attribute_and_text() {
        let node = object(vec![("@token", text("main")), (TEXT_KEY, text("Main"))]);

        assert_eq!(node.attribute("token"), Some("main"));
        assert_eq!(node.scalar(), Some("Main"));
    }

    #[test]
    fn test_is_response_to() {
        let message = SoapMessage {
            name: "GetProfilesResponse".to_string(),
            namespace: Some("urn:media".to_string()),
            content: SoapNode::Object(IndexMap::new()),
        };

        assert!(message.is_response_to("GetProfiles", "urn:media"));
        assert!(!message.is_response_to("GetProfiles", "urn:media2"));
        assert!(!message.is_response_to("GetProfile", "urn:media"));
    }
}
