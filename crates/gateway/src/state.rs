use std::sync::Arc;

use {kestrel_agents::tool_registry::CapabilityInvoker, secrecy::SecretString};

/// Shared gateway state. Read-only once the server starts.
pub struct GatewayState {
    pub version: String,
    pub invoker: Arc<dyn CapabilityInvoker>,
    /// Bearer token required on `/rpc`, if any.
    pub token: Option<SecretString>,
}

impl GatewayState {
    pub fn new(invoker: Arc<dyn CapabilityInvoker>, token: Option<SecretString>) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            invoker,
            token,
        })
    }
}
