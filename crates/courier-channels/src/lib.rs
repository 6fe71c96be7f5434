//! Gateway adapters for courier
//!
//! This crate provides the Serenity-backed listening adapter that feeds the
//! relay pipeline, and the outbound bot identities that deliver its output.

pub mod discord;
pub mod listener;

use serenity::gateway::GatewayError;

// Re-export main types
pub use discord::{DiscordIdentity, spawn_gateway};
pub use listener::ListenerChannel;

/// Capacity of the queue between the listener and the relay loop
pub const EVENT_QUEUE_SIZE: usize = 256;

/// Check if a serenity error represents a fatal gateway condition (bad token, bad intents)
pub(crate) fn is_fatal_gateway_error(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Gateway(gateway_err) => matches!(
            gateway_err,
            GatewayError::InvalidAuthentication
                | GatewayError::NoAuthentication
                | GatewayError::InvalidShardData
                | GatewayError::DisallowedGatewayIntents
                | GatewayError::InvalidGatewayIntents
        ),
        _ => false,
    }
}
