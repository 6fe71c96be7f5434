//! Outbound identities and the registry of the ones that logged in

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ChannelInfo, OutboundPayload};

/// Capability set shared by every account that can post into a channel
#[async_trait]
pub trait OutboundIdentity: Send + Sync {
    /// Deliver a payload to a channel
    async fn send(&self, channel_id: u64, payload: OutboundPayload) -> Result<()>;

    /// Look up a channel as this identity sees it; `None` if it is not visible
    async fn get_channel(&self, channel_id: u64) -> Result<Option<ChannelInfo>>;

    /// Human label for logs
    fn label(&self) -> &str;
}

/// Live identities, keyed by the stable id each one reported after login.
///
/// Filled sequentially during startup and read-only afterwards.
#[derive(Default)]
pub struct IdentityRegistry {
    token_to_identity: HashMap<String, u64>,
    identities: HashMap<u64, Arc<dyn OutboundIdentity>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: &str, identity_id: u64, handle: Arc<dyn OutboundIdentity>) {
        self.token_to_identity.insert(token.to_string(), identity_id);
        self.identities.insert(identity_id, handle);
    }

    /// Token → identity id → live handle
    pub fn resolve(&self, token: &str) -> Option<&Arc<dyn OutboundIdentity>> {
        let identity_id = self.token_to_identity.get(token)?;
        self.identities.get(identity_id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("identities", &self.identities.keys().collect::<Vec<_>>())
            .finish()
    }
}
