use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pmoonvif::profiles::{device, streaming};
use pmoonvif::{
    AuthMethod, ChallengeProbe, Command, CommandDispatcher, Discovery, Fault, FaultCode,
    InlineContext, OnvifResponse, OnvifSession, ParameterRequest, Params, ProfileKind,
    SessionConfig, SessionObserver,
};
use pmosoap::{
    Completion, ParseOptions, RawRequest, RequestHooks, SOAP_CONTENT_TYPE, SendOptions,
    SoapMessage, SoapParseError, SoapRequest, SoapTransport, TransportError, TransportReply,
    parse_soap_response,
};

const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";

const DISCOVERY: [&str; 6] = [
    "GetDeviceInformation",
    "GetServices",
    "GetServiceCapabilities",
    "GetScopes",
    "GetNetworkInterfaces",
    "GetCapabilities",
];

fn envelope(body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="{}" xmlns:trt="{}" xmlns:tt="http://www.onvif.org/ver10/schema"><s:Body>{}</s:Body></s:Envelope>"#,
        DEVICE_NS, MEDIA_NS, body
    )
}

// ---------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------

#[derive(Clone)]
enum Scripted {
    Reply {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    Unreadable,
}

#[derive(Debug, Clone)]
struct Sent {
    action: String,
    url: String,
    authorization: Option<String>,
    body: String,
}

/// Answers from per-action scripts; the last scripted reply repeats.
/// Unscripted actions get an empty `<Action>Response`.
#[derive(Default)]
struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<Sent>>,
    hold: AtomicBool,
    held: Mutex<Vec<(Completion, Result<TransportReply, TransportError>)>>,
}

impl MockTransport {
    fn script(&self, action: &str, status: u16, body: String) {
        self.push(
            action,
            Scripted::Reply {
                status,
                headers: Vec::new(),
                body,
            },
        );
    }

    /// Drops whatever was scripted for `action` before
    fn replace(&self, action: &str, status: u16, body: String) {
        self.scripts.lock().unwrap().remove(action);
        self.script(action, status, body);
    }

    fn push(&self, action: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(scripted);
    }

    fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Completes every held request; returns how many there were
    fn release(&self) -> usize {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        let count = held.len();
        for (completion, result) in held {
            completion(result);
        }
        count
    }

    fn release_all(&self) {
        while self.release() > 0 {}
    }

    /// Completes every held request, most recent first
    fn release_reversed(&self) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for (completion, result) in held.into_iter().rev() {
            completion(result);
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.action).collect()
    }

    fn count(&self, action: &str) -> usize {
        self.actions().iter().filter(|a| *a == action).count()
    }

    fn next_script(&self, action: &str) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(action)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn empty_response(request: &SoapRequest) -> String {
    let (prefix, name) = request.action().split_once(':').unwrap();
    let uri = request
        .namespaces()
        .iter()
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
        .unwrap();
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><{p}:{n}Response xmlns:{p}="{u}"/></s:Body></s:Envelope>"#,
        p = prefix,
        n = name,
        u = uri
    )
}

impl SoapTransport for MockTransport {
    fn send(
        &self,
        request: &SoapRequest,
        url: &str,
        options: SendOptions,
        hooks: Arc<dyn RequestHooks>,
        completion: Completion,
    ) {
        let raw = RawRequest {
            method: "POST".to_string(),
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), SOAP_CONTENT_TYPE.to_string())],
            body: request.to_xml().unwrap().into_bytes(),
        };
        let raw = hooks.mutate_request(raw);

        let action = request.action().split_once(':').unwrap().1.to_string();
        self.sent.lock().unwrap().push(Sent {
            action: action.clone(),
            url: raw.url.clone(),
            authorization: raw.header("Authorization").map(str::to_string),
            body: String::from_utf8_lossy(&raw.body).into_owned(),
        });

        let scripted = self.next_script(&action).unwrap_or(Scripted::Reply {
            status: 200,
            headers: Vec::new(),
            body: empty_response(request),
        });

        let result = match scripted {
            Scripted::Reply {
                status,
                headers,
                body,
            } => {
                let bytes = hooks.inspect_raw_bytes(body.into_bytes());
                let parsed = parse_soap_response(
                    &bytes,
                    ParseOptions {
                        keep_attributes: options.keep_attributes,
                    },
                );
                match parsed {
                    Ok(message) => Ok(TransportReply {
                        status,
                        headers,
                        message: Some(message),
                    }),
                    Err(_) if status >= 300 => Ok(TransportReply {
                        status,
                        headers,
                        message: None,
                    }),
                    Err(e) => Err(TransportError::Parse(e)),
                }
            }
            Scripted::Unreadable => Err(TransportError::Parse(SoapParseError::MissingEnvelope)),
        };

        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push((completion, result));
        } else {
            completion(result);
        }
    }
}

struct ScriptedProbe {
    calls: AtomicUsize,
    headers: Vec<Option<&'static str>>,
}

impl ScriptedProbe {
    fn new(headers: Vec<Option<&'static str>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            headers,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChallengeProbe for ScriptedProbe {
    fn www_authenticate(&self, _url: &str, _timeout: Duration) -> Option<String> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let last = self.headers.len().saturating_sub(1);
        self.headers
            .get(i.min(last))
            .copied()
            .flatten()
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Failure(FaultCode, Option<u16>),
    Ack(&'static str),
    Initialized,
    Deinitialized,
    Response(&'static str, OnvifResponse),
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    consume_preview: AtomicBool,
    previews: AtomicUsize,
}

impl RecordingObserver {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn failures(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Failure(..)))
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_failure(&self, fault: &Fault) {
        self.push(Event::Failure(fault.code(), fault.http_status()));
    }

    fn on_simple_ack(&self, command: Command) {
        self.push(Event::Ack(command.action()));
    }

    fn on_initialized(&self) {
        self.push(Event::Initialized);
    }

    fn on_deinitialized(&self) {
        self.push(Event::Deinitialized);
    }

    fn on_raw_preview(&self, _message: &SoapMessage, _command: Command) -> bool {
        self.previews.fetch_add(1, Ordering::SeqCst);
        self.consume_preview.load(Ordering::SeqCst)
    }

    fn on_response(&self, command: Command, response: &OnvifResponse) {
        self.push(Event::Response(command.action(), response.clone()));
    }
}

struct Harness {
    session: OnvifSession,
    transport: Arc<MockTransport>,
    probe: Arc<ScriptedProbe>,
    observer: Arc<RecordingObserver>,
}

fn harness(config: SessionConfig, probe: Arc<ScriptedProbe>) -> Harness {
    let transport = Arc::new(MockTransport::default());
    let session = OnvifSession::with_collaborators(
        &config,
        transport.clone(),
        probe.clone(),
        Arc::new(InlineContext),
    );
    Harness {
        session,
        transport,
        probe,
        observer: Arc::new(RecordingObserver::default()),
    }
}

fn anonymous() -> Harness {
    harness(SessionConfig::new("cam", 80, "", ""), ScriptedProbe::new(vec![None]))
}

fn authenticated(method: AuthMethod, probe: Vec<Option<&'static str>>) -> Harness {
    harness(
        SessionConfig::new("cam", 80, "admin", "secret").with_auth_method(method),
        ScriptedProbe::new(probe),
    )
}

/// A Profile S camera with a media service at `/onvif/Media`
fn script_discovery(transport: &MockTransport) {
    transport.script(
        "GetDeviceInformation",
        200,
        envelope(
            "<tds:GetDeviceInformationResponse><tds:Manufacturer>Acme</tds:Manufacturer><tds:Model>C1</tds:Model><tds:FirmwareVersion>1.0</tds:FirmwareVersion><tds:SerialNumber>42</tds:SerialNumber><tds:HardwareId>1</tds:HardwareId></tds:GetDeviceInformationResponse>",
        ),
    );
    transport.script(
        "GetServices",
        200,
        envelope(&format!(
            "<tds:GetServicesResponse><tds:Service><tds:Namespace>{}</tds:Namespace><tds:XAddr>http://10.0.0.2/onvif/device_service</tds:XAddr></tds:Service><tds:Service><tds:Namespace>{}</tds:Namespace><tds:XAddr>http://10.0.0.2/onvif/Media</tds:XAddr></tds:Service></tds:GetServicesResponse>",
            DEVICE_NS, MEDIA_NS
        )),
    );
    transport.script(
        "GetServiceCapabilities",
        200,
        envelope(
            r#"<tds:GetServiceCapabilitiesResponse><tds:Capabilities><tds:Network IPFilter="false" ZeroConfiguration="true"/></tds:Capabilities></tds:GetServiceCapabilitiesResponse>"#,
        ),
    );
    transport.script(
        "GetScopes",
        200,
        envelope(
            "<tds:GetScopesResponse><tds:Scopes><tt:ScopeDef>Fixed</tt:ScopeDef><tt:ScopeItem>onvif://www.onvif.org/Profile/Streaming</tt:ScopeItem></tds:Scopes><tds:Scopes><tt:ScopeDef>Configurable</tt:ScopeDef><tt:ScopeItem>onvif://www.onvif.org/name/Lobby</tt:ScopeItem></tds:Scopes></tds:GetScopesResponse>",
        ),
    );
    transport.script(
        "GetNetworkInterfaces",
        200,
        envelope(
            r#"<tds:GetNetworkInterfacesResponse><tds:NetworkInterfaces token="eth0"><tt:Enabled>true</tt:Enabled></tds:NetworkInterfaces></tds:GetNetworkInterfacesResponse>"#,
        ),
    );
    transport.script(
        "GetCapabilities",
        200,
        envelope(
            "<tds:GetCapabilitiesResponse><tds:Capabilities><tt:Device><tt:XAddr>http://10.0.0.2/onvif/device_service</tt:XAddr></tt:Device><tt:Media><tt:XAddr>http://10.0.0.2/onvif/Media</tt:XAddr></tt:Media></tds:Capabilities></tds:GetCapabilitiesResponse>",
        ),
    );
}

fn initialized(h: &Harness) {
    script_discovery(&h.transport);
    h.session.attach_observer(&h.observer);
    assert!(h.session.is_initialized(), "discovery did not complete: {:?}", h.observer.events());
}

// ---------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------

#[test]
fn test_discovery_registers_profile_s() {
    let h = anonymous();
    initialized(&h);

    assert_eq!(h.transport.actions(), DISCOVERY);
    assert_eq!(h.observer.events(), vec![Event::Initialized]);
    assert_eq!(
        h.session.registered_profiles(),
        vec![ProfileKind::Core, ProfileKind::S]
    );
    assert_eq!(h.session.supported_namespaces(ProfileKind::S), vec![MEDIA_NS]);
    assert!(!h.session.available_commands(ProfileKind::S).is_empty());

    let info = h.session.device_information().unwrap();
    assert_eq!(info.manufacturer, "Acme");
    assert_eq!(h.session.scopes().len(), 2);
    assert!(!h.session.capabilities().is_empty());
    assert!(h.transport.sent().iter().all(|s| s.authorization.is_none()));
    assert!(h.transport.sent().iter().all(|s| s.url == "http://cam:80/onvif/device_service"));
}

#[test]
fn test_discovery_step_parameters_are_sent() {
    let h = anonymous();
    initialized(&h);

    let services = &h.transport.sent()[1];
    assert!(services.body.contains("<tds:IncludeCapability>false</tds:IncludeCapability>"));
    let capabilities = &h.transport.sent()[5];
    assert!(capabilities.body.contains("<tds:Category>All</tds:Category>"));
}

#[test]
fn test_failure_stops_discovery() {
    let h = anonymous();
    script_discovery(&h.transport);
    h.transport.replace(
        "GetServiceCapabilities",
        500,
        envelope(
            "<s:Fault><s:Code><s:Value>s:Receiver</s:Value><s:Subcode><s:Value>ter:ActionNotSupported</s:Value></s:Subcode></s:Code><s:Reason><s:Text>Not supported</s:Text></s:Reason></s:Fault>",
        ),
    );

    h.session.attach_observer(&h.observer);

    assert_eq!(h.transport.actions(), DISCOVERY[..3]);
    assert_eq!(
        h.observer.events(),
        vec![Event::Failure(FaultCode::Receiver, Some(500))]
    );
    assert_eq!(h.session.discovery(), Discovery::Idle);
    assert_eq!(h.session.registered_profiles(), vec![ProfileKind::Core]);
}

#[test]
fn test_http_error_without_envelope_is_transport_fault() {
    let h = anonymous();
    h.transport
        .script("GetDeviceInformation", 503, "<html>busy</html>".to_string());

    h.session.attach_observer(&h.observer);

    assert_eq!(h.transport.actions(), ["GetDeviceInformation"]);
    assert_eq!(
        h.observer.events(),
        vec![Event::Failure(FaultCode::Transport, Some(503))]
    );
}

#[test]
fn test_unreadable_reply_is_protocol_error() {
    let h = anonymous();
    h.transport.push("GetDeviceInformation", Scripted::Unreadable);

    h.session.attach_observer(&h.observer);

    assert_eq!(
        h.observer.events(),
        vec![Event::Failure(FaultCode::UnknownProtocolError, None)]
    );
}

#[test]
fn test_initialize_is_idempotent() {
    let h = anonymous();
    script_discovery(&h.transport);
    h.transport.hold();

    h.session.attach_observer(&h.observer);
    h.session.initialize();
    h.session.attach_observer(&h.observer);
    assert_eq!(h.transport.count("GetDeviceInformation"), 1);

    h.transport.release_all();
    assert!(h.session.is_initialized());

    h.session.initialize();
    h.session.attach_observer(&h.observer);
    h.transport.release_all();

    assert_eq!(h.transport.count("GetDeviceInformation"), 1);
    assert_eq!(h.observer.events(), vec![Event::Initialized]);
}

#[test]
fn test_late_reply_after_deinitialize_is_dropped() {
    let h = anonymous();
    script_discovery(&h.transport);
    h.transport.hold();

    h.session.attach_observer(&h.observer);
    h.session.deinitialize();
    h.transport.release_all();

    assert_eq!(h.transport.actions(), ["GetDeviceInformation"]);
    assert_eq!(h.observer.events(), vec![Event::Deinitialized]);
    assert!(h.session.device_information().is_none());
    assert_eq!(h.session.discovery(), Discovery::Idle);
}

#[test]
fn test_reconnect_after_deinitialize() {
    let h = anonymous();
    initialized(&h);

    h.session.deinitialize();
    assert_eq!(h.session.registered_profiles(), vec![ProfileKind::Core]);
    assert!(h.session.capabilities().is_empty());

    h.session.attach_observer(&h.observer);
    assert!(h.session.is_initialized());
    assert_eq!(h.transport.count("GetDeviceInformation"), 2);
    assert_eq!(
        h.observer.events(),
        vec![Event::Initialized, Event::Deinitialized, Event::Initialized]
    );
}

// ---------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------

const CHALLENGE: &str = r#"Digest realm="cam", nonce="abc", qop="auth", opaque="xyz""#;
const STALE: &str = r#"Digest realm="cam", nonce="old", qop="auth", stale=true"#;

#[test]
fn test_stale_challenge_is_probed_again_once() {
    let h = authenticated(AuthMethod::Digest, vec![Some(STALE), Some(CHALLENGE)]);
    initialized(&h);

    // Every discovery request targets the same path: one negotiation only
    assert_eq!(h.probe.calls(), 2);

    let sent = h.transport.sent();
    assert!(sent.iter().all(|s| {
        s.authorization
            .as_deref()
            .is_some_and(|a| a.starts_with("Digest ") && a.contains(r#"nonce="abc""#))
    }));
    assert!(sent[0].authorization.as_deref().unwrap().contains("nc=00000001"));
    assert!(sent[5].authorization.as_deref().unwrap().contains("nc=00000006"));
    assert_eq!(h.session.nonce_count(), 6);
}

#[test]
fn test_probe_without_nonce_falls_back_to_basic_for_good() {
    let h = authenticated(AuthMethod::Both, vec![Some(r#"Digest realm="cam""#)]);
    initialized(&h);

    assert_eq!(h.session.auth_method(), AuthMethod::Basic);
    assert_eq!(h.probe.calls(), 1);

    h.session
        .perform_request(streaming::GET_PROFILES, Params::new(), None);

    assert_eq!(h.probe.calls(), 1);
    assert!(h.transport.sent().iter().all(|s| {
        s.authorization
            .as_deref()
            .is_some_and(|a| a == "Basic YWRtaW46c2VjcmV0")
    }));
}

#[test]
fn test_forced_digest_without_realm_sends_nothing() {
    let h = authenticated(AuthMethod::Digest, vec![None]);

    h.session.attach_observer(&h.observer);

    assert!(h.transport.sent().is_empty());
    assert_eq!(
        h.observer.events(),
        vec![Event::Failure(FaultCode::NoRealm, None)]
    );
    assert_eq!(h.session.discovery(), Discovery::Idle);
}

#[test]
fn test_forced_basic_never_probes() {
    let h = authenticated(AuthMethod::Basic, vec![Some(CHALLENGE)]);
    initialized(&h);

    assert_eq!(h.probe.calls(), 0);
    assert!(h.transport.sent().iter().all(|s| {
        s.authorization
            .as_deref()
            .is_some_and(|a| a.starts_with("Basic "))
    }));
}

#[test]
fn test_unauthorized_reply_discards_challenge() {
    let h = authenticated(AuthMethod::Both, vec![Some(CHALLENGE)]);
    initialized(&h);
    assert_eq!(h.probe.calls(), 1);

    h.transport.push(
        "GetHostname",
        Scripted::Reply {
            status: 401,
            headers: vec![("WWW-Authenticate".to_string(), CHALLENGE.to_string())],
            body: "Unauthorized".to_string(),
        },
    );
    h.session
        .perform_request(device::GET_HOSTNAME, Params::new(), None);
    assert_eq!(
        h.observer.failures(),
        vec![Event::Failure(FaultCode::Transport, Some(401))]
    );

    h.session
        .perform_request(device::GET_USERS, Params::new(), None);
    assert_eq!(h.probe.calls(), 2);
}

// ---------------------------------------------------------------------
// Requests, routing and dispatchers
// ---------------------------------------------------------------------

#[test]
fn test_commands_use_discovered_service_path() {
    let h = anonymous();
    initialized(&h);

    h.session
        .perform_request(streaming::GET_PROFILES, Params::new(), None);

    let last = h.transport.sent().pop().unwrap();
    assert_eq!(last.action, "GetProfiles");
    assert_eq!(last.url, "http://cam:80/onvif/Media");
}

#[test]
fn test_path_override() {
    let h = anonymous();
    initialized(&h);

    h.session
        .perform_request(device::GET_HOSTNAME, Params::new(), Some("custom/device"));

    let last = h.transport.sent().pop().unwrap();
    assert_eq!(last.url, "http://cam:80/custom/device");
}

#[test]
fn test_response_and_ack_reach_observer() {
    let h = anonymous();
    initialized(&h);

    h.session
        .perform_request(device::GET_HOSTNAME, Params::new(), None);
    let mut params = Params::new();
    params.insert("Name".to_string(), "lobby-cam".into());
    h.session
        .perform_request(device::SET_HOSTNAME, params, None);

    let events = h.observer.events();
    assert!(matches!(
        events.as_slice(),
        [
            Event::Initialized,
            Event::Response("GetHostname", OnvifResponse::Hostname(_)),
            Event::Ack("SetHostname"),
        ]
    ));
    assert!(h.transport.sent().last().unwrap().body.contains("<tds:Name>lobby-cam</tds:Name>"));
}

#[test]
fn test_unclaimed_reply_is_protocol_error() {
    let h = anonymous();
    initialized(&h);
    h.transport.script(
        "GetHostname",
        200,
        envelope("<tds:SomethingElseResponse/>"),
    );

    h.session
        .perform_request(device::GET_HOSTNAME, Params::new(), None);

    assert_eq!(
        h.observer.failures(),
        vec![Event::Failure(FaultCode::UnknownProtocolError, None)]
    );
}

#[test]
fn test_unavailable_command_fails_without_sending() {
    let h = anonymous();

    h.transport.hold();
    h.session.attach_observer(&h.observer);
    h.session
        .perform_request(streaming::GET_PROFILES, Params::new(), None);
    h.session
        .perform_request(device::SET_HOSTNAME, Params::new(), None);

    assert_eq!(
        h.observer.failures(),
        vec![
            Event::Failure(FaultCode::UnknownProtocolError, None),
            Event::Failure(FaultCode::UnknownProtocolError, None),
        ]
    );
    assert_eq!(h.transport.actions(), ["GetDeviceInformation"]);
}

#[test]
fn test_raw_preview_consumes_embedder_replies_only() {
    let h = anonymous();
    h.observer.consume_preview.store(true, Ordering::SeqCst);
    initialized(&h);
    assert_eq!(h.observer.previews.load(Ordering::SeqCst), 0);

    h.session
        .perform_request(device::GET_HOSTNAME, Params::new(), None);

    assert_eq!(h.observer.previews.load(Ordering::SeqCst), 1);
    assert_eq!(h.observer.events(), vec![Event::Initialized]);
}

#[derive(Default)]
struct StreamUriDispatcher {
    produced: AtomicUsize,
    consumed: Mutex<Vec<OnvifResponse>>,
}

impl CommandDispatcher for StreamUriDispatcher {
    fn produce_parameters(&self, _command: Command) -> ParameterRequest {
        if self.produced.fetch_add(1, Ordering::SeqCst) == 0 {
            ParameterRequest::Defer
        } else {
            ParameterRequest::Send(streaming::stream_uri_params("main"))
        }
    }

    fn consume_response(&self, _command: Command, response: &OnvifResponse) -> bool {
        self.consumed.lock().unwrap().push(response.clone());
        true
    }
}

#[test]
fn test_dispatcher_defers_then_consumes() {
    let h = anonymous();
    initialized(&h);
    h.transport.script(
        "GetStreamUri",
        200,
        envelope(
            "<trt:GetStreamUriResponse><trt:MediaUri><tt:Uri>rtsp://10.0.0.2/main</tt:Uri><tt:InvalidAfterConnect>false</tt:InvalidAfterConnect><tt:InvalidAfterReboot>false</tt:InvalidAfterReboot><tt:Timeout>PT0S</tt:Timeout></trt:MediaUri></trt:GetStreamUriResponse>",
        ),
    );
    let dispatcher = Arc::new(StreamUriDispatcher::default());
    h.session
        .set_dispatcher(streaming::GET_STREAM_URI, dispatcher.clone());

    h.session.run_command(streaming::GET_STREAM_URI);
    assert_eq!(h.transport.count("GetStreamUri"), 0);

    h.session.run_command(streaming::GET_STREAM_URI);
    assert_eq!(h.transport.count("GetStreamUri"), 1);

    let consumed = dispatcher.consumed.lock().unwrap().clone();
    let [OnvifResponse::StreamUri(uri)] = consumed.as_slice() else {
        panic!("unexpected dispatcher input {:?}", consumed);
    };
    assert_eq!(uri.uri, "rtsp://10.0.0.2/main");
    assert_eq!(uri.profile_token.as_deref(), Some("main"));
    assert_eq!(h.observer.events(), vec![Event::Initialized]);

    assert!(h.session.remove_dispatcher(streaming::GET_STREAM_URI).is_some());
}

fn stream_uri_reply(uri: &str) -> String {
    envelope(&format!(
        "<trt:GetStreamUriResponse><trt:MediaUri><tt:Uri>{}</tt:Uri><tt:InvalidAfterConnect>false</tt:InvalidAfterConnect><tt:InvalidAfterReboot>false</tt:InvalidAfterReboot><tt:Timeout>PT0S</tt:Timeout></trt:MediaUri></trt:GetStreamUriResponse>",
        uri
    ))
}

#[test]
fn test_stream_uris_keep_their_token_out_of_order() {
    let h = anonymous();
    initialized(&h);
    h.transport
        .script("GetStreamUri", 200, stream_uri_reply("rtsp://cam/main"));
    h.transport.script(
        "GetStreamUri",
        500,
        envelope(
            "<s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Reason><s:Text>Encoder busy</s:Text></s:Reason></s:Fault>",
        ),
    );
    h.transport
        .script("GetStreamUri", 200, stream_uri_reply("rtsp://cam/third"));

    h.transport.hold();
    for token in ["main", "sub", "third"] {
        h.session.perform_request(
            streaming::GET_STREAM_URI,
            streaming::stream_uri_params(token),
            None,
        );
    }
    h.transport.release_reversed();

    let uris: Vec<(Option<String>, String)> = h
        .observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Response("GetStreamUri", OnvifResponse::StreamUri(uri)) => {
                Some((uri.profile_token, uri.uri))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        uris,
        vec![
            (Some("third".to_string()), "rtsp://cam/third".to_string()),
            (Some("main".to_string()), "rtsp://cam/main".to_string()),
        ]
    );
    assert_eq!(
        h.observer.failures(),
        vec![Event::Failure(FaultCode::Receiver, Some(500))]
    );
}

#[test]
fn test_fault_reply_to_command_keeps_http_status() {
    let h = anonymous();
    initialized(&h);
    h.transport.script(
        "GetStreamUri",
        400,
        envelope(
            "<s:Fault><s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>ter:InvalidArgVal</s:Value><s:Subcode><s:Value>ter:NoProfile</s:Value></s:Subcode></s:Subcode></s:Code><s:Reason><s:Text>Unknown profile</s:Text></s:Reason></s:Fault>",
        ),
    );

    h.session.perform_request(
        streaming::GET_STREAM_URI,
        streaming::stream_uri_params("missing"),
        None,
    );

    assert_eq!(
        h.observer.failures(),
        vec![Event::Failure(FaultCode::Sender, Some(400))]
    );
}
