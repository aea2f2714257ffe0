//! Server providers
//!
//! A provider turns some external source into an ordered list of
//! reachable servers. The supervisor only ever talks to the trait.

pub mod feed;
pub mod probe;
pub mod subscription;

pub use subscription::{SubscriptionProvider, SubscriptionProviderConfig};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ServerDescriptor;

/// Source of candidate servers
///
/// Implementations return only servers that were reachable at fetch
/// time, ordered by preference, each with `latency_ms` recorded.
/// Per-server problems are filtered out; an error means the source as
/// a whole could not be read.
#[async_trait]
pub trait ServerProvider: Send + Sync {
    async fn fetch_available(&self) -> Result<Vec<ServerDescriptor>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
