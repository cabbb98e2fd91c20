//! Command descriptors

use indexmap::IndexMap;
use pmosoap::{ParamValue, SoapRequest};

use crate::profiles::ProfileKind;

/// Parameters of one request, keyed by element name
pub type Params = IndexMap<String, ParamValue>;

/// Immutable description of one device operation.
///
/// A descriptor names the action, the profile owning it and the namespace
/// prefixes used on the wire. The owning profile handler resolves the
/// prefix to a namespace URI and a service path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    action: &'static str,
    profile: ProfileKind,
    action_prefix: &'static str,
    param_prefix: &'static str,
    retrieve_attributes: bool,
    requires_parameters: bool,
}

impl Command {
    pub const fn new(profile: ProfileKind, action_prefix: &'static str, action: &'static str) -> Self {
        Self {
            action,
            profile,
            action_prefix,
            param_prefix: action_prefix,
            retrieve_attributes: false,
            requires_parameters: false,
        }
    }

    pub const fn with_param_prefix(mut self, prefix: &'static str) -> Self {
        self.param_prefix = prefix;
        self
    }

    /// Replies keep XML attributes (tokens are often attributes)
    pub const fn retrieving_attributes(mut self) -> Self {
        self.retrieve_attributes = true;
        self
    }

    pub const fn requiring_parameters(mut self) -> Self {
        self.requires_parameters = true;
        self
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn profile(&self) -> ProfileKind {
        self.profile
    }

    pub fn action_prefix(&self) -> &'static str {
        self.action_prefix
    }

    pub fn param_prefix(&self) -> &'static str {
        self.param_prefix
    }

    pub fn retrieve_attributes(&self) -> bool {
        self.retrieve_attributes
    }

    pub fn requires_parameters(&self) -> bool {
        self.requires_parameters
    }

    /// Qualified action element, e.g. `tds:GetScopes`
    pub fn soap_action(&self) -> String {
        format!("{}:{}", self.action_prefix, self.action)
    }

    /// Element name of the expected reply
    pub fn response_name(&self) -> String {
        format!("{}Response", self.action)
    }

    /// Adds the parameter prefix to keys that carry none
    pub fn qualify(&self, key: &str) -> String {
        if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", self.param_prefix, key)
        }
    }

    pub(crate) fn build_request(&self, namespaces: &[(&str, &str)], params: &Params) -> SoapRequest {
        let mut request = SoapRequest::new(namespaces, &self.soap_action());
        for (key, value) in params {
            let key = self.qualify(key);
            match value {
                ParamValue::List(items) => {
                    for item in items {
                        request.set_parameter(key.clone(), item.clone());
                    }
                }
                other => request.set_parameter(key, other.clone()),
            }
        }
        request
    }
}
