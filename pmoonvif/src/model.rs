use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInformation {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Service {
    /// Namespace URI of the service WSDL
    pub namespace: String,
    /// Advertised endpoint, possibly with a host unreachable from here
    pub xaddr: String,
    /// `major.minor`, when announced
    pub version: Option<String>,
}

/// Attributes of each `GetServiceCapabilities` category
/// (`Network`, `Security`, `System`, ...)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceCapabilities {
    pub categories: BTreeMap<String, BTreeMap<String, String>>,
}

impl ServiceCapabilities {
    pub fn get(&self, category: &str, name: &str) -> Option<&str> {
        self.categories
            .get(category)
            .and_then(|attrs| attrs.get(name))
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scope {
    /// `Fixed` or `Configurable`
    pub definition: String,
    pub item: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub token: Option<String>,
    pub enabled: bool,
    pub name: Option<String>,
    pub hw_address: Option<String>,
    pub ipv4_addresses: Vec<String>,
}

/// Service category to endpoint, from `GetCapabilities`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub endpoints: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn xaddr(&self, category: &str) -> Option<&str> {
        self.endpoints.get(category).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SystemDateAndTime {
    /// `NTP` or `Manual`
    pub date_time_type: String,
    pub daylight_savings: bool,
    pub time_zone: Option<String>,
    pub utc: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Hostname {
    pub from_dhcp: bool,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub username: String,
    /// `Administrator`, `Operator`, `User`, `Anonymous` or `Extended`
    pub level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MediaProfile {
    pub token: String,
    pub name: String,
    pub fixed: bool,
    pub video_source_token: Option<String>,
    pub encoding: Option<String>,
    pub resolution: Option<Resolution>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoSource {
    pub token: String,
    pub framerate: Option<f32>,
    pub resolution: Option<Resolution>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaUri {
    /// Profile the URI was requested for
    pub profile_token: Option<String>,
    pub uri: String,
    pub invalid_after_connect: bool,
    pub invalid_after_reboot: bool,
    pub timeout: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Track {
    pub token: String,
    pub track_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recording {
    pub token: String,
    pub source_name: Option<String>,
    pub content: Option<String>,
    pub tracks: Vec<Track>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordingSummary {
    pub data_from: Option<String>,
    pub data_until: Option<String>,
    pub number_recordings: u32,
}

/// Typed value decoded from one reply
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum OnvifResponse {
    DeviceInformation(DeviceInformation),
    Services(Vec<Service>),
    ServiceCapabilities(ServiceCapabilities),
    Scopes(Vec<Scope>),
    NetworkInterfaces(Vec<NetworkInterface>),
    Capabilities(Capabilities),
    SystemDateAndTime(SystemDateAndTime),
    Hostname(Hostname),
    Users(Vec<User>),
    RebootMessage(String),
    Profiles(Vec<MediaProfile>),
    VideoSources(Vec<VideoSource>),
    StreamUri(MediaUri),
    SnapshotUri(MediaUri),
    Uri(String),
    Recordings(Vec<Recording>),
    RecordingSummary(RecordingSummary),
    /// Empty reply
    Ack,
}
