//! courier-core - The relay pipeline of courier
//!
//! This crate provides:
//! - Normalization of inbound message events, including recovery of quoted or
//!   forwarded content and the HTTP re-fetch fallback for malformed rich content
//! - Keyword and author filtering with literal keyword substitution
//! - Optional machine translation of text and rich items
//! - Routing from source channels to the bot identity owning each destination

pub mod filter;
pub mod forward;
pub mod identity;
pub mod normalize;
pub mod relay;
pub mod rest;
pub mod rich;
pub mod routing;
pub mod translate;
pub mod types;

// Re-export main types for convenience
pub use filter::{ContentFilter, KeywordFilter, ReplaceRule, UserFilter};
pub use forward::Forwarder;
pub use identity::{IdentityRegistry, OutboundIdentity};
pub use normalize::{ContentSource, LatestMessageSource, Normalizer};
pub use relay::Relay;
pub use rest::DiscordRest;
pub use routing::{ChannelMapping, RoutingEntry, RoutingError, RoutingTable, TranslateSettings};
pub use translate::{ChatTranslator, Translate};
pub use types::{
    AttachmentRef, ChannelInfo, InboundEvent, NormalizedMessage, OutboundPayload, RichItem,
};
