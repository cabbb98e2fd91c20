//! Core profile: device management service

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use pmosoap::{SoapMessage, SoapNode};

use super::{
    DEVICE_NS, Namespace, ProfileHandler, ProfileKind, ProfileState, flag, required, text,
    text_at, xaddr_path,
};
use crate::command::{Command, Params};
use crate::errors::Fault;
use crate::model::{
    Capabilities, DeviceInformation, Hostname, NetworkInterface, OnvifResponse, Scope, Service,
    ServiceCapabilities, SystemDateAndTime, User,
};

pub const GET_DEVICE_INFORMATION: Command =
    Command::new(ProfileKind::Core, "tds", "GetDeviceInformation");
pub const GET_SERVICES: Command =
    Command::new(ProfileKind::Core, "tds", "GetServices").requiring_parameters();
pub const GET_SERVICE_CAPABILITIES: Command =
    Command::new(ProfileKind::Core, "tds", "GetServiceCapabilities").retrieving_attributes();
pub const GET_SCOPES: Command = Command::new(ProfileKind::Core, "tds", "GetScopes");
pub const GET_NETWORK_INTERFACES: Command =
    Command::new(ProfileKind::Core, "tds", "GetNetworkInterfaces").retrieving_attributes();
pub const GET_CAPABILITIES: Command = Command::new(ProfileKind::Core, "tds", "GetCapabilities");
pub const GET_SYSTEM_DATE_AND_TIME: Command =
    Command::new(ProfileKind::Core, "tds", "GetSystemDateAndTime");
pub const GET_HOSTNAME: Command = Command::new(ProfileKind::Core, "tds", "GetHostname");
pub const SET_HOSTNAME: Command =
    Command::new(ProfileKind::Core, "tds", "SetHostname").requiring_parameters();
pub const GET_USERS: Command = Command::new(ProfileKind::Core, "tds", "GetUsers");
pub const SYSTEM_REBOOT: Command = Command::new(ProfileKind::Core, "tds", "SystemReboot");

static NAMESPACES: [Namespace; 1] = [DEVICE_NS];

static COMMANDS: [Command; 11] = [
    GET_DEVICE_INFORMATION,
    GET_SERVICES,
    GET_SERVICE_CAPABILITIES,
    GET_SCOPES,
    GET_NETWORK_INTERFACES,
    GET_CAPABILITIES,
    GET_SYSTEM_DATE_AND_TIME,
    GET_HOSTNAME,
    SET_HOSTNAME,
    GET_USERS,
    SYSTEM_REBOOT,
];

/// Mandatory handler, always registered.
///
/// Keeps what capability discovery learnt about the device.
#[derive(Debug)]
pub struct CoreHandler {
    state: ProfileState,
    device_information: Option<DeviceInformation>,
    services: Vec<Service>,
    service_capabilities: Option<ServiceCapabilities>,
    scopes: Vec<Scope>,
    network_interfaces: Vec<NetworkInterface>,
    capabilities: Capabilities,
}

impl Default for CoreHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreHandler {
    pub fn new() -> Self {
        Self {
            state: ProfileState {
                supported: vec![DEVICE_NS.uri],
                endpoints: Default::default(),
            },
            device_information: None,
            services: Vec::new(),
            service_capabilities: None,
            scopes: Vec::new(),
            network_interfaces: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn device_information(&self) -> Option<&DeviceInformation> {
        self.device_information.as_ref()
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service_capabilities(&self) -> Option<&ServiceCapabilities> {
        self.service_capabilities.as_ref()
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn network_interfaces(&self) -> &[NetworkInterface] {
        &self.network_interfaces
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[cfg(test)]
    pub(crate) fn set_discovered(&mut self, scopes: Vec<Scope>, services: Vec<Service>) {
        self.scopes = scopes;
        self.services = services;
    }

    fn decode_services(&mut self, content: &SoapNode) -> Result<Vec<Service>, Fault> {
        let mut services = Vec::new();
        for node in content.items("Service") {
            let version = match (
                text_at(node, &["Version", "Major"]),
                text_at(node, &["Version", "Minor"]),
            ) {
                (Some(major), Some(minor)) => Some(format!("{}.{}", major, minor)),
                _ => None,
            };
            services.push(Service {
                namespace: required(node, "GetServices", "Namespace")?,
                xaddr: required(node, "GetServices", "XAddr")?,
                version,
            });
        }

        // The device service may live elsewhere than the default path
        if let Some(device) = services.iter().find(|s| s.namespace == DEVICE_NS.uri) {
            if let Some(path) = xaddr_path(&device.xaddr) {
                self.state.endpoints.insert(DEVICE_NS.uri, path);
            }
        }

        self.services = services.clone();
        Ok(services)
    }
}

impl ProfileHandler for CoreHandler {
    fn kind(&self) -> ProfileKind {
        ProfileKind::Core
    }

    fn declared_namespaces(&self) -> &'static [Namespace] {
        &NAMESPACES
    }

    fn commands(&self) -> &'static [Command] {
        &COMMANDS
    }

    fn state(&self) -> &ProfileState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProfileState {
        &mut self.state
    }

    fn decode(
        &mut self,
        command: Command,
        message: &SoapMessage,
        _request: &Params,
    ) -> Result<OnvifResponse, Fault> {
        let content = &message.content;

        match command.action() {
            "GetDeviceInformation" => {
                let info = DeviceInformation {
                    manufacturer: text(content, "Manufacturer").unwrap_or_default(),
                    model: text(content, "Model").unwrap_or_default(),
                    firmware_version: text(content, "FirmwareVersion").unwrap_or_default(),
                    serial_number: text(content, "SerialNumber").unwrap_or_default(),
                    hardware_id: text(content, "HardwareId").unwrap_or_default(),
                };
                self.device_information = Some(info.clone());
                Ok(OnvifResponse::DeviceInformation(info))
            }
            "GetServices" => Ok(OnvifResponse::Services(self.decode_services(content)?)),
            "GetServiceCapabilities" => {
                let caps = decode_service_capabilities(content);
                self.service_capabilities = Some(caps.clone());
                Ok(OnvifResponse::ServiceCapabilities(caps))
            }
            "GetScopes" => {
                let mut scopes = Vec::new();
                for node in content.items("Scopes") {
                    scopes.push(Scope {
                        definition: text(node, "ScopeDef").unwrap_or_default(),
                        item: required(node, "GetScopes", "ScopeItem")?,
                    });
                }
                self.scopes = scopes.clone();
                Ok(OnvifResponse::Scopes(scopes))
            }
            "GetNetworkInterfaces" => {
                let interfaces: Vec<NetworkInterface> = content
                    .items("NetworkInterfaces")
                    .into_iter()
                    .map(decode_network_interface)
                    .collect();
                self.network_interfaces = interfaces.clone();
                Ok(OnvifResponse::NetworkInterfaces(interfaces))
            }
            "GetCapabilities" => {
                let caps = decode_capabilities(content);
                self.capabilities = caps.clone();
                Ok(OnvifResponse::Capabilities(caps))
            }
            "GetSystemDateAndTime" => Ok(OnvifResponse::SystemDateAndTime(
                decode_date_and_time(content),
            )),
            "GetHostname" => {
                let info = content.get("HostnameInformation");
                Ok(OnvifResponse::Hostname(Hostname {
                    from_dhcp: info.is_some_and(|n| flag(n, "FromDHCP")),
                    name: info.and_then(|n| text(n, "Name")),
                }))
            }
            "GetUsers" => {
                let mut users = Vec::new();
                for node in content.items("User") {
                    users.push(User {
                        username: required(node, "GetUsers", "Username")?,
                        level: text(node, "UserLevel").unwrap_or_default(),
                    });
                }
                Ok(OnvifResponse::Users(users))
            }
            "SystemReboot" => Ok(OnvifResponse::RebootMessage(
                text(content, "Message").unwrap_or_default(),
            )),
            _ => Ok(OnvifResponse::Ack),
        }
    }

    fn clear(&mut self) {
        self.device_information = None;
        self.services.clear();
        self.service_capabilities = None;
        self.scopes.clear();
        self.network_interfaces.clear();
        self.capabilities = Capabilities::default();
        self.state.endpoints.clear();
    }
}

fn decode_service_capabilities(content: &SoapNode) -> ServiceCapabilities {
    let mut categories = BTreeMap::new();
    if let Some(SoapNode::Object(map)) = content.get("Capabilities") {
        for (category, node) in map {
            let mut attributes = BTreeMap::new();
            if let SoapNode::Object(fields) = node {
                for (key, value) in fields {
                    if let (Some(name), Some(value)) = (key.strip_prefix('@'), value.scalar()) {
                        attributes.insert(name.to_string(), value.to_string());
                    }
                }
            }
            categories.insert(category.clone(), attributes);
        }
    }
    ServiceCapabilities { categories }
}

fn decode_network_interface(node: &SoapNode) -> NetworkInterface {
    let mut ipv4_addresses = Vec::new();
    if let Some(config) = node.path(&["IPv4", "Config"]) {
        for source in ["Manual", "FromDHCP", "LinkLocal"] {
            for entry in config.items(source) {
                if let Some(address) = entry.text("Address") {
                    ipv4_addresses.push(address.to_string());
                }
            }
        }
    }

    NetworkInterface {
        token: node.attribute("token").map(str::to_string),
        enabled: flag(node, "Enabled"),
        name: text_at(node, &["Info", "Name"]),
        hw_address: text_at(node, &["Info", "HwAddress"]),
        ipv4_addresses,
    }
}

fn decode_capabilities(content: &SoapNode) -> Capabilities {
    let mut endpoints = BTreeMap::new();
    if let Some(SoapNode::Object(map)) = content.get("Capabilities") {
        for (category, node) in map {
            if let Some(xaddr) = node.text("XAddr") {
                endpoints.insert(category.clone(), xaddr.to_string());
            }
        }
        // Recording, search, replay... are announced under Extension
        if let Some(SoapNode::Object(extension)) = map.get("Extension") {
            for (category, node) in extension {
                if let Some(xaddr) = node.text("XAddr") {
                    endpoints.insert(category.clone(), xaddr.to_string());
                }
            }
        }
    }
    Capabilities { endpoints }
}

fn decode_date_and_time(content: &SoapNode) -> SystemDateAndTime {
    let node = content.get("SystemDateAndTime");
    let field = |path: &[&str]| node.and_then(|n| text_at(n, path));
    let number = |path: &[&str]| field(path).and_then(|v| v.parse::<u32>().ok());

    let utc = (|| {
        let year = field(&["UTCDateTime", "Date", "Year"])?.parse::<i32>().ok()?;
        Utc.with_ymd_and_hms(
            year,
            number(&["UTCDateTime", "Date", "Month"])?,
            number(&["UTCDateTime", "Date", "Day"])?,
            number(&["UTCDateTime", "Time", "Hour"])?,
            number(&["UTCDateTime", "Time", "Minute"])?,
            number(&["UTCDateTime", "Time", "Second"])?,
        )
        .single()
    })();

    SystemDateAndTime {
        date_time_type: field(&["DateTimeType"]).unwrap_or_default(),
        daylight_savings: node.is_some_and(|n| flag(n, "DaylightSavings")),
        time_zone: field(&["TimeZone", "TZ"]),
        utc,
    }
}
