use anyhow::Result;

use crate::models::RawItem;

/// A remote feed turned into normalized items. Adapters hold no shared state;
/// an `Err` means "nothing usable from this source this cycle".
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn collect(&self) -> Result<Vec<RawItem>>;
    fn name(&self) -> &str;
}
