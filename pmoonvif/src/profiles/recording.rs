//! Profile G: recording, search and replay services

use pmosoap::{ParamValue, SoapMessage};

use super::{
    Namespace, ProfileHandler, ProfileKind, ProfileState, RECORDING_NS, REPLAY_NS, SEARCH_NS,
    required, text, text_at,
};
use crate::command::{Command, Params};
use crate::errors::{Fault, ProtocolError};
use crate::model::{OnvifResponse, Recording, RecordingSummary, Track};

pub const GET_RECORDINGS: Command = Command::new(ProfileKind::G, "trc", "GetRecordings");
pub const GET_RECORDING_SUMMARY: Command =
    Command::new(ProfileKind::G, "tse", "GetRecordingSummary");
pub const GET_REPLAY_URI: Command =
    Command::new(ProfileKind::G, "trp", "GetReplayUri").requiring_parameters();

static NAMESPACES: [Namespace; 3] = [RECORDING_NS, SEARCH_NS, REPLAY_NS];

static COMMANDS: [Command; 3] = [GET_RECORDINGS, GET_RECORDING_SUMMARY, GET_REPLAY_URI];

/// Parameters for `GetReplayUri` over RTSP
pub fn replay_uri_params(recording_token: &str) -> Params {
    let mut params = Params::new();
    params.insert(
        "StreamSetup".to_string(),
        ParamValue::map([
            ("tt:Stream", ParamValue::from("RTP-Unicast")),
            ("tt:Transport", ParamValue::map([("tt:Protocol", "RTSP")])),
        ]),
    );
    params.insert(
        "RecordingToken".to_string(),
        ParamValue::from(recording_token),
    );
    params
}

/// Recording, search and replay may be offered independently: each
/// command is available only when its own service is.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    state: ProfileState,
    recordings: Vec<Recording>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }
}

impl ProfileHandler for RecordingHandler {
    fn kind(&self) -> ProfileKind {
        ProfileKind::G
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
            "GetRecordings" => {
                let mut recordings = Vec::new();
                for node in content.items("RecordingItem") {
                    let tracks: Vec<Track> = node
                        .get("Tracks")
                        .map(|tracks| {
                            tracks
                                .items("Track")
                                .into_iter()
                                .filter_map(|track| {
                                    Some(Track {
                                        token: text(track, "TrackToken")?,
                                        track_type: text_at(track, &["Configuration", "TrackType"]),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();

                    recordings.push(Recording {
                        token: required(node, "GetRecordings", "RecordingToken")?,
                        source_name: text_at(node, &["Configuration", "Source", "Name"]),
                        content: text_at(node, &["Configuration", "Content"]),
                        tracks,
                    });
                }
                self.recordings = recordings.clone();
                Ok(OnvifResponse::Recordings(recordings))
            }
            "GetRecordingSummary" => {
                let summary = content.get("Summary").ok_or_else(|| {
                    Fault::protocol(ProtocolError::MissingField {
                        action: "GetRecordingSummary",
                        field: "Summary",
                    })
                })?;
                let count = text(summary, "NumberRecordings").unwrap_or_default();
                let number_recordings = if count.is_empty() {
                    0
                } else {
                    count.parse::<u32>().map_err(|_| {
                        Fault::protocol(ProtocolError::InvalidField {
                            action: "GetRecordingSummary",
                            field: "NumberRecordings",
                            value: count.clone(),
                        })
                    })?
                };
                Ok(OnvifResponse::RecordingSummary(RecordingSummary {
                    data_from: text(summary, "DataFrom"),
                    data_until: text(summary, "DataUntil"),
                    number_recordings,
                }))
            }
            "GetReplayUri" => Ok(OnvifResponse::Uri(required(content, "GetReplayUri", "Uri")?)),
            _ => Ok(OnvifResponse::Ack),
        }
    }

    fn clear(&mut self) {
        self.recordings.clear();
    }
}
