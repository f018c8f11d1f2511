pub mod memory;
pub mod traits;

pub use memory::{InMemoryQuota, StaticChannelCatalog, StaticTokenStore};
pub use traits::{ChannelCatalog, ModelPrice, PricingLookup, TokenQuota, TokenStore, UsageSink};
