//! Profile T: media2 service (ver20)

use pmosoap::{ParamValue, SoapMessage};

use super::{
    MEDIA2_NS, Namespace, ProfileHandler, ProfileKind, ProfileState, required, resolution, text,
    text_at,
};
use crate::command::{Command, Params};
use crate::errors::{Fault, ProtocolError};
use crate::model::{MediaProfile, OnvifResponse};

pub const GET_PROFILES: Command =
    Command::new(ProfileKind::T, "tr2", "GetProfiles").retrieving_attributes();
pub const GET_STREAM_URI: Command =
    Command::new(ProfileKind::T, "tr2", "GetStreamUri").requiring_parameters();

static NAMESPACES: [Namespace; 1] = [MEDIA2_NS];

static COMMANDS: [Command; 2] = [GET_PROFILES, GET_STREAM_URI];

/// Parameters for `GetStreamUri` (RTSP)
pub fn stream_uri_params(profile_token: &str) -> Params {
    let mut params = Params::new();
    params.insert("Protocol".to_string(), ParamValue::from("RTSP"));
    params.insert("ProfileToken".to_string(), ParamValue::from(profile_token));
    params
}

/// Parameters asking for every configuration of every profile
pub fn all_profiles_params() -> Params {
    let mut params = Params::new();
    params.insert("Type".to_string(), ParamValue::from("All"));
    params
}

#[derive(Debug, Default)]
pub struct Media2Handler {
    state: ProfileState,
    profiles: Vec<MediaProfile>,
}

impl Media2Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &[MediaProfile] {
        &self.profiles
    }
}

impl ProfileHandler for Media2Handler {
    fn kind(&self) -> ProfileKind {
        ProfileKind::T
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
            "GetProfiles" => {
                let mut profiles = Vec::new();
                for node in content.items("Profiles") {
                    let token = node.attribute("token").ok_or_else(|| {
                        Fault::protocol(ProtocolError::MissingField {
                            action: "GetProfiles",
                            field: "token",
                        })
                    })?;
                    profiles.push(MediaProfile {
                        token: token.to_string(),
                        name: text(node, "Name").unwrap_or_default(),
                        fixed: node.attribute("fixed").is_some_and(|f| f == "true"),
                        video_source_token: text_at(
                            node,
                            &["Configurations", "VideoSource", "SourceToken"],
                        ),
                        encoding: text_at(node, &["Configurations", "VideoEncoder", "Encoding"]),
                        resolution: resolution(
                            node.path(&["Configurations", "VideoEncoder", "Resolution"]),
                        ),
                    });
                }
                self.profiles = profiles.clone();
                Ok(OnvifResponse::Profiles(profiles))
            }
            "GetStreamUri" => Ok(OnvifResponse::Uri(required(content, "GetStreamUri", "Uri")?)),
            _ => Ok(OnvifResponse::Ack),
        }
    }

    fn clear(&mut self) {
        self.profiles.clear();
    }
}
