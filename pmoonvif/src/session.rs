//! Per-device session.
//!
//! An [`OnvifSession`] binds to one device. Attaching an observer starts
//! capability discovery; once it completes, the profiles announced by the
//! device are registered and their commands become available through
//! [`OnvifSession::perform_request`] and [`OnvifSession::run_command`].
//!
//! Replies come back on transport threads and are handed to the session's
//! [`MainContext`] before any observer or dispatcher code runs.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pmosoap::{
    RequestHooks, SendOptions, SoapTransport, TransportError, TransportReply, UreqTransport,
};
use tracing::{debug, info, warn};

use crate::auth::{AuthHook, AuthMethod, Authenticator};
use crate::command::{Command, Params};
use crate::config::SessionConfig;
use crate::context::{DeliveryThread, MainContext};
use crate::digest::{ChallengeProbe, DigestNegotiator, HttpChallengeProbe};
use crate::discovery::{Discovery, DiscoveryStep};
use crate::errors::{Fault, FaultCode, ProtocolError};
use crate::model::{
    Capabilities, DeviceInformation, NetworkInterface, OnvifResponse, Scope, Service,
    ServiceCapabilities,
};
use crate::observer::{CommandDispatcher, ParameterRequest, SessionObserver};
use crate::profiles::{DEVICE_NS, ProfileKind};
use crate::registry::ProfileRegistry;

/// Who issued a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Discovery(DiscoveryStep),
    Embedder,
}

struct SessionState {
    observer: Option<Weak<dyn SessionObserver>>,
    registry: ProfileRegistry,
    discovery: Discovery,
    /// Bumped by every teardown; replies carry the value they were sent with
    epoch: u64,
    dispatchers: HashMap<Command, Arc<dyn CommandDispatcher>>,
}

struct SessionInner {
    base_url: String,
    transport: Arc<dyn SoapTransport>,
    authenticator: Arc<Authenticator>,
    context: Arc<dyn MainContext>,
    weak_self: Weak<SessionInner>,
    state: Mutex<SessionState>,
}

/// Protocol engine bound to one device.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct OnvifSession {
    inner: Arc<SessionInner>,
}

impl OnvifSession {
    /// Session using the ureq transport, the HTTP challenge probe and a
    /// dedicated delivery thread
    pub fn new(config: &SessionConfig) -> io::Result<Self> {
        let context = DeliveryThread::spawn("onvif-delivery")?;
        let transport = UreqTransport::new(config.request_timeout());

        Ok(Self::with_collaborators(
            config,
            Arc::new(transport),
            Arc::new(HttpChallengeProbe),
            Arc::new(context),
        ))
    }

    pub fn with_collaborators(
        config: &SessionConfig,
        transport: Arc<dyn SoapTransport>,
        probe: Arc<dyn ChallengeProbe>,
        context: Arc<dyn MainContext>,
    ) -> Self {
        let negotiator = DigestNegotiator::new(probe, config.probe_timeout());
        let authenticator = Arc::new(Authenticator::new(
            &config.username,
            &config.password,
            config.auth_method,
            negotiator,
        ));

        let inner = Arc::new_cyclic(|weak_self| SessionInner {
            base_url: config.base_url(),
            transport,
            authenticator,
            context,
            weak_self: weak_self.clone(),
            state: Mutex::new(SessionState {
                observer: None,
                registry: ProfileRegistry::new(),
                discovery: Discovery::Idle,
                epoch: 0,
                dispatchers: HashMap::new(),
            }),
        });

        Self { inner }
    }

    /// `scheme://host:port` every request path is joined to
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Starts capability discovery.
    ///
    /// Does nothing while discovery runs or once it produced capabilities.
    pub fn initialize(&self) {
        {
            let mut state = self.inner.state.lock();
            if let Discovery::Running(step) = state.discovery {
                debug!(device = %self.inner.base_url, ?step, "Discovery already running");
                return;
            }
            if !state.registry.core().capabilities().is_empty() {
                debug!(device = %self.inner.base_url, "Session already initialized");
                return;
            }
            state.registry.reset();
            state.discovery = Discovery::Running(DiscoveryStep::FIRST);
        }

        info!(device = %self.inner.base_url, "Starting capability discovery");
        let step = DiscoveryStep::FIRST;
        self.inner
            .send(step.command(), step.params(), None, Origin::Discovery(step));
    }

    /// Forgets everything learnt from the device and the cached
    /// authentication. Requests already on the wire are ignored when they
    /// come back.
    pub fn deinitialize(&self) {
        {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.registry.reset();
            state.discovery = Discovery::Idle;
        }
        self.inner.authenticator.reset();

        info!(device = %self.inner.base_url, "Session torn down");
        self.inner.notify(|observer| observer.on_deinitialized());
    }

    /// Attaches the completion observer, held weakly. Starts discovery
    /// when no capabilities are known yet.
    pub fn attach_observer<O>(&self, observer: &Arc<O>)
    where
        O: SessionObserver + 'static,
    {
        let weak: Weak<O> = Arc::downgrade(observer);
        let weak: Weak<dyn SessionObserver> = weak;
        let needs_discovery = {
            let mut state = self.inner.state.lock();
            state.observer = Some(weak);
            state.registry.core().capabilities().is_empty()
        };

        if needs_discovery {
            self.initialize();
        }
    }

    pub fn detach_observer(&self) {
        self.inner.state.lock().observer = None;
    }

    /// Sends `command` with `params`.
    ///
    /// `path` overrides the service path of the owning profile. The outcome
    /// reaches the observer or the command's dispatcher; nothing is
    /// returned here.
    pub fn perform_request(&self, command: Command, params: Params, path: Option<&str>) {
        let (check, epoch) = {
            let state = self.inner.state.lock();
            let check = match state.registry.handler(command.profile()) {
                Some(handler) if handler.is_available(command) => {
                    if command.requires_parameters() && params.is_empty() {
                        Err(ProtocolError::ParametersRequired(command.action()))
                    } else {
                        Ok(())
                    }
                }
                _ => Err(ProtocolError::CommandUnavailable(command.action())),
            };
            (check, state.epoch)
        };

        match check {
            Ok(()) => self.inner.send(command, params, path, Origin::Embedder),
            Err(e) => {
                self.inner
                    .report_failure(command, Origin::Embedder, epoch, Fault::protocol(e))
            }
        }
    }

    /// Asks the command's dispatcher for parameters and sends the command,
    /// unless the dispatcher defers. Without a dispatcher the command is
    /// sent with no parameters.
    pub fn run_command(&self, command: Command) {
        let dispatcher = self.inner.state.lock().dispatchers.get(&command).cloned();
        let request = match dispatcher {
            Some(dispatcher) => dispatcher.produce_parameters(command),
            None => ParameterRequest::Send(Params::new()),
        };

        match request {
            ParameterRequest::Send(params) => self.perform_request(command, params, None),
            ParameterRequest::Defer => {
                debug!(action = command.action(), "Command deferred by its dispatcher");
            }
        }
    }

    pub fn set_dispatcher(&self, command: Command, dispatcher: Arc<dyn CommandDispatcher>) {
        self.inner
            .state
            .lock()
            .dispatchers
            .insert(command, dispatcher);
    }

    pub fn remove_dispatcher(&self, command: Command) -> Option<Arc<dyn CommandDispatcher>> {
        self.inner.state.lock().dispatchers.remove(&command)
    }

    /// True once discovery completed
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().discovery == Discovery::Complete
    }

    pub fn discovery(&self) -> Discovery {
        self.inner.state.lock().discovery
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.inner.authenticator.current_method()
    }

    /// Digest requests signed since the session was created or last torn
    /// down. The counter is shared by every challenge.
    pub fn nonce_count(&self) -> u32 {
        self.inner.authenticator.nonce_count()
    }

    pub fn device_information(&self) -> Option<DeviceInformation> {
        self.inner
            .state
            .lock()
            .registry
            .core()
            .device_information()
            .cloned()
    }

    pub fn services(&self) -> Vec<Service> {
        self.inner.state.lock().registry.core().services().to_vec()
    }

    pub fn service_capabilities(&self) -> Option<ServiceCapabilities> {
        self.inner
            .state
            .lock()
            .registry
            .core()
            .service_capabilities()
            .cloned()
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.inner.state.lock().registry.core().scopes().to_vec()
    }

    pub fn network_interfaces(&self) -> Vec<NetworkInterface> {
        self.inner
            .state
            .lock()
            .registry
            .core()
            .network_interfaces()
            .to_vec()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.state.lock().registry.core().capabilities().clone()
    }

    pub fn registered_profiles(&self) -> Vec<ProfileKind> {
        self.inner.state.lock().registry.kinds()
    }

    pub fn supported_namespaces(&self, kind: ProfileKind) -> Vec<&'static str> {
        self.inner
            .state
            .lock()
            .registry
            .handler(kind)
            .map(|h| h.supported_namespaces().to_vec())
            .unwrap_or_default()
    }

    pub fn available_commands(&self, kind: ProfileKind) -> Vec<Command> {
        self.inner
            .state
            .lock()
            .registry
            .handler(kind)
            .map(|h| h.available_commands())
            .unwrap_or_default()
    }

    /// Runs `f` against the profile registry, under the session lock
    pub fn with_registry<R>(&self, f: impl FnOnce(&ProfileRegistry) -> R) -> R {
        f(&self.inner.state.lock().registry)
    }
}

impl SessionInner {
    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.state.lock().observer.as_ref().and_then(Weak::upgrade)
    }

    /// Runs `f` against the observer on the main context
    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn SessionObserver) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.context.dispatch(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.observer() {
                Some(observer) => f(observer.as_ref()),
                None => debug!("No observer attached, notification dropped"),
            }
        }));
    }

    fn send(&self, command: Command, params: Params, path: Option<&str>, origin: Origin) {
        let prepared = {
            let state = self.state.lock();
            let epoch = state.epoch;
            state.registry.handler(command.profile()).map(|handler| {
                let path = path
                    .map(str::to_string)
                    .or_else(|| handler.path_for(command))
                    .unwrap_or_else(|| DEVICE_NS.default_path.to_string());
                (epoch, path, handler.namespace_decls())
            })
        };

        let Some((epoch, path, namespaces)) = prepared else {
            let epoch = self.state.lock().epoch;
            let fault = Fault::protocol(ProtocolError::CommandUnavailable(command.action()));
            self.report_failure(command, origin, epoch, fault);
            return;
        };

        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        let url = format!("{}{}", self.base_url, path);

        let plan = match self.authenticator.prepare(&url, &path) {
            Ok(plan) => plan,
            Err(fault) => {
                self.report_failure(command, origin, epoch, fault);
                return;
            }
        };

        debug!(action = command.action(), url = %url, ?plan, "Sending request");

        let request = command.build_request(&namespaces, &params);
        let hooks: Arc<dyn RequestHooks> =
            Arc::new(AuthHook::new(self.authenticator.clone(), plan));
        let options = SendOptions {
            keep_attributes: command.retrieve_attributes(),
        };

        let weak = self.weak_self.clone();
        self.transport.send(
            &request,
            &url,
            options,
            hooks,
            Box::new(move |result| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let context = inner.context.clone();
                context.dispatch(Box::new(move || {
                    inner.handle_reply(command, &params, origin, epoch, result)
                }));
            }),
        );
    }

    /// Runs on the main context. `params` are the ones the request was
    /// sent with.
    ///
    /// A SOAP fault is classified from its body even when it came with an
    /// HTTP error status, which is only kept for the description. This
    /// differs from [`Fault::classify`], where the status wins over the
    /// body.
    fn handle_reply(
        &self,
        command: Command,
        params: &Params,
        origin: Origin,
        epoch: u64,
        result: Result<TransportReply, TransportError>,
    ) {
        {
            let state = self.state.lock();
            if state.epoch != epoch {
                debug!(action = command.action(), "Dropping reply received after teardown");
                return;
            }
            if let Origin::Discovery(step) = origin {
                if state.discovery != Discovery::Running(step) {
                    debug!(action = command.action(), "Dropping reply of an abandoned discovery");
                    return;
                }
            }
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                let fault = Fault::from_transport(e);
                self.report_failure(command, origin, epoch, fault);
                return;
            }
        };

        debug!(action = command.action(), status = reply.status, "Reply received");

        if reply.status == 401 {
            self.authenticator
                .on_unauthorized(reply.header("WWW-Authenticate"));
        }

        let status = reply.status;
        let message = match reply.message {
            Some(message) if message.is_fault() => {
                let mut fault = Fault::from_fault_body(&message.content);
                if status >= 300 {
                    fault = fault.with_http_status(status);
                }
                self.report_failure(command, origin, epoch, fault);
                return;
            }
            Some(message) if status < 300 => message,
            _ => {
                let fault = Fault::classify(None, status, None)
                    .unwrap_or_else(|| Fault::new(FaultCode::UnknownProtocolError));
                self.report_failure(command, origin, epoch, fault);
                return;
            }
        };

        if origin == Origin::Embedder {
            if let Some(observer) = self.observer() {
                if observer.on_raw_preview(&message, command) {
                    debug!(action = command.action(), "Reply consumed by raw preview");
                    return;
                }
            }
        }

        let routed = self.state.lock().registry.route(&message, params);
        let response = match routed {
            Some(Ok(response)) => response,
            Some(Err(fault)) => {
                self.report_failure(command, origin, epoch, fault);
                return;
            }
            None => {
                let fault = Fault::protocol(ProtocolError::Unclaimed(message.name.clone()));
                self.report_failure(command, origin, epoch, fault);
                return;
            }
        };

        match origin {
            Origin::Discovery(step) => self.advance_discovery(step, epoch),
            Origin::Embedder => self.deliver(command, response),
        }
    }

    fn advance_discovery(&self, step: DiscoveryStep, epoch: u64) {
        let Some(next) = step.next() else {
            let added = {
                let mut state = self.state.lock();
                let added = state.registry.register_discovered();
                state.discovery = Discovery::Complete;
                added
            };
            info!(device = %self.base_url, profiles = ?added, "Capability discovery complete");
            if let Some(observer) = self.observer() {
                observer.on_initialized();
            }
            return;
        };

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.discovery = Discovery::Running(next);
        }
        self.send(next.command(), next.params(), None, Origin::Discovery(next));
    }

    fn deliver(&self, command: Command, response: OnvifResponse) {
        let dispatcher = self.state.lock().dispatchers.get(&command).cloned();
        if let Some(dispatcher) = dispatcher {
            if dispatcher.consume_response(command, &response) {
                return;
            }
        }

        let Some(observer) = self.observer() else {
            debug!(action = command.action(), "No observer attached, reply dropped");
            return;
        };
        match response {
            OnvifResponse::Ack => observer.on_simple_ack(command),
            response => observer.on_response(command, &response),
        }
    }

    /// Single exit for every failed exchange: one `on_failure`, and
    /// discovery stops where it failed
    fn report_failure(
        &self,
        command: Command,
        origin: Origin,
        epoch: u64,
        fault: Fault,
    ) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!(action = command.action(), "Dropping failure received after teardown");
                return;
            }
            if matches!(origin, Origin::Discovery(_)) {
                state.discovery = Discovery::Idle;
            }
        }

        warn!(
            action = command.action(),
            device = %self.base_url,
            fault = %fault.full_description(),
            "Request failed"
        );
        self.notify(move |observer| observer.on_failure(&fault));
    }
}
