//! Connect/disconnect/ready notifications

use std::fmt;

use crate::core::ClientId;

/// Callback invoked with the affected client.
pub type Hook = Box<dyn FnMut(ClientId) + Send>;

/// Registered notification closures. Unset hooks are skipped.
#[derive(Default)]
pub struct Hooks {
    client_connected: Option<Hook>,
    client_disconnected: Option<Hook>,
    ready: Option<Hook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired after a client's roster sync has been delivered.
    pub fn on_client_connected(mut self, hook: impl FnMut(ClientId) + Send + 'static) -> Self {
        self.client_connected = Some(Box::new(hook));
        self
    }

    /// Fired once per departed client, whatever the reason.
    pub fn on_client_disconnected(mut self, hook: impl FnMut(ClientId) + Send + 'static) -> Self {
        self.client_disconnected = Some(Box::new(hook));
        self
    }

    /// Fired once the endpoint is ready. A server passes `ClientId::none()`.
    pub fn on_ready(mut self, hook: impl FnMut(ClientId) + Send + 'static) -> Self {
        self.ready = Some(Box::new(hook));
        self
    }

    pub(crate) fn client_connected(&mut self, id: ClientId) {
        if let Some(hook) = self.client_connected.as_mut() {
            hook(id);
        }
    }

    pub(crate) fn client_disconnected(&mut self, id: ClientId) {
        if let Some(hook) = self.client_disconnected.as_mut() {
            hook(id);
        }
    }

    pub(crate) fn ready(&mut self, id: ClientId) {
        if let Some(hook) = self.ready.as_mut() {
            hook(id);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_client_connected", &self.client_connected.is_some())
            .field("on_client_disconnected", &self.client_disconnected.is_some())
            .field("on_ready", &self.ready.is_some())
            .finish()
    }
}
