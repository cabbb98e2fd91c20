//! Profile S: media service (ver10)

use pmosoap::{ParamValue, SoapMessage, SoapNode};

use super::{
    MEDIA_NS, Namespace, ProfileHandler, ProfileKind, ProfileState, flag, required, resolution,
    text, text_at,
};
use crate::command::{Command, Params};
use crate::errors::{Fault, ProtocolError};
use crate::model::{MediaProfile, MediaUri, OnvifResponse, VideoSource};

pub const GET_PROFILES: Command =
    Command::new(ProfileKind::S, "trt", "GetProfiles").retrieving_attributes();
pub const GET_VIDEO_SOURCES: Command =
    Command::new(ProfileKind::S, "trt", "GetVideoSources").retrieving_attributes();
pub const GET_STREAM_URI: Command =
    Command::new(ProfileKind::S, "trt", "GetStreamUri").requiring_parameters();
pub const GET_SNAPSHOT_URI: Command =
    Command::new(ProfileKind::S, "trt", "GetSnapshotUri").requiring_parameters();

static NAMESPACES: [Namespace; 1] = [MEDIA_NS];

static COMMANDS: [Command; 4] = [
    GET_PROFILES,
    GET_VIDEO_SOURCES,
    GET_STREAM_URI,
    GET_SNAPSHOT_URI,
];

/// Parameters for `GetStreamUri` over RTSP unicast
pub fn stream_uri_params(profile_token: &str) -> Params {
    let mut params = Params::new();
    params.insert(
        "StreamSetup".to_string(),
        ParamValue::map([
            ("tt:Stream", ParamValue::from("RTP-Unicast")),
            ("tt:Transport", ParamValue::map([("tt:Protocol", "RTSP")])),
        ]),
    );
    params.insert("ProfileToken".to_string(), ParamValue::from(profile_token));
    params
}

/// Parameters for `GetSnapshotUri`
pub fn snapshot_uri_params(profile_token: &str) -> Params {
    let mut params = Params::new();
    params.insert("ProfileToken".to_string(), ParamValue::from(profile_token));
    params
}

/// Profile token found in request parameters, whatever its prefix
pub(crate) fn profile_token(params: &Params) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key.rsplit(':').next() == Some("ProfileToken"))
        .and_then(|(_, value)| value.as_text())
        .map(str::to_string)
}

/// Media profiles are listed first, then URIs are fetched per token.
/// A URI reply is tagged with the token of the request it answers.
#[derive(Debug, Default)]
pub struct StreamingHandler {
    state: ProfileState,
    profiles: Vec<MediaProfile>,
    video_sources: Vec<VideoSource>,
}

impl StreamingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &[MediaProfile] {
        &self.profiles
    }

    pub fn video_sources(&self) -> &[VideoSource] {
        &self.video_sources
    }

    fn decode_uri(command: Command, content: &SoapNode, request: &Params) -> Result<MediaUri, Fault> {
        let node = content
            .get("MediaUri")
            .ok_or(Fault::protocol(ProtocolError::MissingField {
                action: command.action(),
                field: "MediaUri",
            }))?;

        Ok(MediaUri {
            profile_token: profile_token(request),
            uri: required(node, command.action(), "Uri")?,
            invalid_after_connect: flag(node, "InvalidAfterConnect"),
            invalid_after_reboot: flag(node, "InvalidAfterReboot"),
            timeout: text(node, "Timeout"),
        })
    }
}

impl ProfileHandler for StreamingHandler {
    fn kind(&self) -> ProfileKind {
        ProfileKind::S
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
        request: &Params,
    ) -> Result<OnvifResponse, Fault> {
        let content = &message.content;

        match command.action() {
            "GetProfiles" => {
                let mut profiles = Vec::new();
                for node in content.items("Profiles") {
                    profiles.push(MediaProfile {
                        token: node
                            .attribute("token")
                            .map(str::to_string)
                            .ok_or(Fault::protocol(ProtocolError::MissingField {
                                action: "GetProfiles",
                                field: "token",
                            }))?,
                        name: text(node, "Name").unwrap_or_default(),
                        fixed: node.attribute("fixed").is_some_and(|f| f == "true"),
                        video_source_token: text_at(node, &["VideoSourceConfiguration", "SourceToken"]),
                        encoding: text_at(node, &["VideoEncoderConfiguration", "Encoding"]),
                        resolution: resolution(node.path(&["VideoEncoderConfiguration", "Resolution"])),
                    });
                }
                self.profiles = profiles.clone();
                Ok(OnvifResponse::Profiles(profiles))
            }
            "GetVideoSources" => {
                let sources: Vec<VideoSource> = content
                    .items("VideoSources")
                    .into_iter()
                    .map(|node| VideoSource {
                        token: node.attribute("token").unwrap_or_default().to_string(),
                        framerate: node.text("Framerate").and_then(|f| f.parse().ok()),
                        resolution: resolution(node.get("Resolution")),
                    })
                    .collect();
                self.video_sources = sources.clone();
                Ok(OnvifResponse::VideoSources(sources))
            }
            "GetStreamUri" => Ok(OnvifResponse::StreamUri(Self::decode_uri(
                command, content, request,
            )?)),
            "GetSnapshotUri" => Ok(OnvifResponse::SnapshotUri(Self::decode_uri(
                command, content, request,
            )?)),
            _ => Ok(OnvifResponse::Ack),
        }
    }

    fn clear(&mut self) {
        self.profiles.clear();
        self.video_sources.clear();
    }
}
