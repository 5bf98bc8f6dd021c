pub mod cache;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod detach;
pub mod metadata;
pub mod outcome;
pub mod reference;
pub mod registry;
pub mod relay;
pub mod relay_urls;
pub mod resolver;
pub mod stats;
pub mod store;
pub mod tags;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the types most callers need at crate root
pub use config::ResolverConfig;
pub use consumer::{ChannelConsumer, ConsumerRef, ResolveConsumer};
pub use metadata::EmbedMetadata;
pub use outcome::Outcome;
pub use reference::{CacheKey, Nip19Parser, Reference, ReferenceParser};
pub use relay::{NostrRelayClient, RelayQueryClient};
pub use resolver::{ReferenceResolver, ResolveStatus};
pub use store::{LocalStore, MemoryStore, SqliteStore};
