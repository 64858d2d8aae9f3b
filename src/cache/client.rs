use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

use crate::cache::{
    CacheRequest, CacheView, CachedData, FetchOutcome, FetchTicket, MutationId, OptimisticOp,
    QueryKey,
};
use crate::error::ApiError;

/// Handle to the [`QueryCache`](crate::cache::QueryCache) actor.
#[derive(Clone)]
pub struct CacheClient {
    sender: mpsc::Sender<CacheRequest>,
}

/// Generates a request/response method: send the variant, await the reply.
macro_rules! cache_method {
    ($name:ident ( $($arg:ident : $ty:ty),* ) -> $ret:ty => $variant:ident) => {
        #[instrument(skip_all)]
        pub async fn $name(&self, $($arg: $ty),*) -> Result<$ret, ApiError> {
            debug!("Sending request");
            let (respond_to, response) = oneshot::channel();
            self.sender
                .send(CacheRequest::$variant { $($arg,)* respond_to })
                .await
                .map_err(|_| ApiError::CacheClosed("cache actor closed".into()))?;
            response
                .await
                .map_err(|_| ApiError::CacheClosed("cache actor dropped the reply".into()))
        }
    };
}

impl CacheClient {
    pub(crate) fn new(sender: mpsc::Sender<CacheRequest>) -> Self {
        Self { sender }
    }

    cache_method!(lookup(key: QueryKey) -> Option<CacheView> => Lookup);
    cache_method!(begin_fetch(entity: String) -> FetchTicket => BeginFetch);
    cache_method!(
        complete_fetch(key: QueryKey, ticket: FetchTicket, data: CachedData) -> FetchOutcome
            => CompleteFetch
    );
    cache_method!(apply_optimistic(entity: String, op: OptimisticOp) -> MutationId => ApplyOptimistic);
    cache_method!(settle(mutation: MutationId, succeeded: bool) -> () => Settle);
    cache_method!(invalidate(entity: String) -> () => Invalidate);
    cache_method!(clear() -> () => Clear);

    /// Stops the actor once queued requests are handled.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(CacheRequest::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::domain::{Page, PageParams};
    use std::time::Duration;

    #[tokio::test]
    async fn calls_fail_once_the_actor_stops() {
        let (cache, client) = QueryCache::new(4, Duration::from_secs(60));
        let handle = tokio::spawn(cache.run());

        client.shutdown().await;
        handle.await.unwrap();

        let err = client
            .lookup(QueryKey::list("tags", PageParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::CacheClosed(_)));
        assert!(!err.should_retry());
    }

    #[tokio::test]
    async fn clear_drops_every_entry() {
        let (cache, client) = QueryCache::new(4, Duration::from_secs(60));
        tokio::spawn(cache.run());

        let key = QueryKey::list("tags", PageParams::default());
        let ticket = client.begin_fetch("tags".into()).await.unwrap();
        client
            .complete_fetch(key.clone(), ticket, CachedData::Page(Page::default()))
            .await
            .unwrap();
        assert!(client.lookup(key.clone()).await.unwrap().is_some());

        client.clear().await.unwrap();
        assert_eq!(client.lookup(key).await.unwrap(), None);
    }
}
