//! Profile handler registry and response routing

use std::collections::BTreeMap;

use pmosoap::SoapMessage;
use tracing::{debug, info, warn};

use crate::command::Params;
use crate::errors::Fault;
use crate::model::OnvifResponse;
use crate::profiles::{CoreHandler, ProfileHandler, ProfileKind};

/// Handlers of one session. The core handler is always present; other
/// profiles are added after discovery and only removed by `reset`.
#[derive(Default)]
pub struct ProfileRegistry {
    core: CoreHandler,
    others: BTreeMap<ProfileKind, Box<dyn ProfileHandler>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn core(&self) -> &CoreHandler {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CoreHandler {
        &mut self.core
    }

    pub fn contains(&self, kind: ProfileKind) -> bool {
        kind == ProfileKind::Core || self.others.contains_key(&kind)
    }

    /// Registered profiles in routing order, core first
    pub fn kinds(&self) -> Vec<ProfileKind> {
        std::iter::once(ProfileKind::Core)
            .chain(self.others.keys().copied())
            .collect()
    }

    pub fn handler(&self, kind: ProfileKind) -> Option<&(dyn ProfileHandler + 'static)> {
        match kind {
            ProfileKind::Core => Some(&self.core),
            _ => self.others.get(&kind).map(|h| h.as_ref()),
        }
    }

    pub fn handler_mut(&mut self, kind: ProfileKind) -> Option<&mut (dyn ProfileHandler + 'static)> {
        match kind {
            ProfileKind::Core => Some(&mut self.core),
            _ => match self.others.get_mut(&kind) {
                Some(handler) => Some(handler.as_mut()),
                None => None,
            },
        }
    }

    /// Adds a handler unless its profile is already registered
    pub fn register(&mut self, handler: Box<dyn ProfileHandler>) -> bool {
        let kind = handler.kind();
        if self.contains(kind) {
            return false;
        }
        self.others.insert(kind, handler);
        true
    }

    /// Instantiates the profiles announced in the discovered scopes,
    /// restricted to the discovered service namespaces
    pub fn register_discovered(&mut self) -> Vec<ProfileKind> {
        let mut added = Vec::new();

        for scope in self.core.scopes() {
            let Some(kind) = ProfileKind::from_scope(&scope.item) else {
                continue;
            };
            if kind == ProfileKind::Core || self.others.contains_key(&kind) {
                continue;
            }

            let mut handler = kind.instantiate();
            let declared = handler.declared_namespaces();
            handler.state_mut().configure(declared, self.core.services());

            info!(
                profile = %kind,
                supported = handler.supported_namespaces().len(),
                commands = handler.available_commands().len(),
                "Profile handler registered"
            );
            self.others.insert(kind, handler);
            added.push(kind);
        }

        added
    }

    /// Every registered handler willing to claim `message`
    pub fn claimants(&self, message: &SoapMessage) -> Vec<ProfileKind> {
        self.kinds()
            .into_iter()
            .filter(|kind| self.handler(*kind).is_some_and(|h| h.claims(message)))
            .collect()
    }

    /// Offers `message`, the reply to a request sent with `request`, to the
    /// handlers in order; the first claim wins. `None` when nobody claims it.
    pub fn route(
        &mut self,
        message: &SoapMessage,
        request: &Params,
    ) -> Option<Result<OnvifResponse, Fault>> {
        let claimants = self.claimants(message);
        if claimants.len() > 1 {
            warn!(element = %message.name, ?claimants, "Several profile handlers claim the same response");
        }

        let kind = *claimants.first()?;
        debug!(element = %message.name, profile = %kind, "Response routed");
        self.handler_mut(kind)?.callback_handler(message, request)
    }

    /// Back to the core profile only, with nothing cached
    pub fn reset(&mut self) {
        self.core.clear();
        self.others.clear();
    }
}
