//! Capability discovery sequence

use pmosoap::ParamValue;

use crate::command::{Command, Params};
use crate::profiles::device;

/// One step of the handshake; each is issued after the previous succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStep {
    DeviceInformation,
    Services,
    ServiceCapabilities,
    Scopes,
    NetworkInterfaces,
    Capabilities,
}

impl DiscoveryStep {
    pub const FIRST: DiscoveryStep = DiscoveryStep::DeviceInformation;

    pub fn command(&self) -> Command {
        match self {
            DiscoveryStep::DeviceInformation => device::GET_DEVICE_INFORMATION,
            DiscoveryStep::Services => device::GET_SERVICES,
            DiscoveryStep::ServiceCapabilities => device::GET_SERVICE_CAPABILITIES,
            DiscoveryStep::Scopes => device::GET_SCOPES,
            DiscoveryStep::NetworkInterfaces => device::GET_NETWORK_INTERFACES,
            DiscoveryStep::Capabilities => device::GET_CAPABILITIES,
        }
    }

    pub fn params(&self) -> Params {
        let mut params = Params::new();
        match self {
            DiscoveryStep::Services => {
                params.insert("IncludeCapability".to_string(), ParamValue::from(false));
            }
            DiscoveryStep::Capabilities => {
                params.insert("Category".to_string(), ParamValue::from("All"));
            }
            _ => {}
        }
        params
    }

    pub fn next(&self) -> Option<DiscoveryStep> {
        match self {
            DiscoveryStep::DeviceInformation => Some(DiscoveryStep::Services),
            DiscoveryStep::Services => Some(DiscoveryStep::ServiceCapabilities),
            DiscoveryStep::ServiceCapabilities => Some(DiscoveryStep::Scopes),
            DiscoveryStep::Scopes => Some(DiscoveryStep::NetworkInterfaces),
            DiscoveryStep::NetworkInterfaces => Some(DiscoveryStep::Capabilities),
            DiscoveryStep::Capabilities => None,
        }
    }
}

/// Where the session stands in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discovery {
    #[default]
    Idle,
    Running(DiscoveryStep),
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_order() {
        let mut actions = Vec::new();
        let mut step = Some(DiscoveryStep::FIRST);
        while let Some(current) = step {
            actions.push(current.command().action());
            step = current.next();
        }

        assert_eq!(
            actions,
            vec![
                "GetDeviceInformation",
                "GetServices",
                "GetServiceCapabilities",
                "GetScopes",
                "GetNetworkInterfaces",
                "GetCapabilities",
            ]
        );
    }

    #[test]
    fn test_step_parameters() {
        let services = DiscoveryStep::Services.params();
        assert_eq!(
            services.get("IncludeCapability").and_then(|v| v.as_text()),
            Some("false")
        );
        assert!(DiscoveryStep::Scopes.params().is_empty());
    }
}
