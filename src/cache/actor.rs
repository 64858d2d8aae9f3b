use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::cache::layers::{self, Layer};
use crate::cache::{
    CacheClient, CacheRequest, CacheResponse, CacheView, CachedData, FetchOutcome, FetchTicket,
    MutationId, OptimisticOp, QueryKey,
};

struct Entry {
    base: CachedData,
    fetched_at: Instant,
    ticket: u64,
    layers: Vec<Layer>,
}

/// Single owner of every cached query.
///
/// All reads and writes arrive as messages, so optimistic layers, rollbacks
/// and invalidations are applied in one order with no shared locks.
pub struct QueryCache {
    receiver: mpsc::Receiver<CacheRequest>,
    entries: HashMap<QueryKey, Entry>,
    /// Clock value of each entity's latest invalidation.
    invalidated_at: HashMap<String, u64>,
    clock: u64,
    next_mutation: u64,
    stale_time: Duration,
}

impl QueryCache {
    pub fn new(buffer_size: usize, stale_time: Duration) -> (Self, CacheClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let cache = Self {
            receiver,
            entries: HashMap::new(),
            invalidated_at: HashMap::new(),
            clock: 0,
            next_mutation: 1,
            stale_time,
        };
        (cache, CacheClient::new(sender))
    }

    #[instrument(name = "query_cache", skip(self))]
    pub async fn run(mut self) {
        info!("QueryCache starting");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                CacheRequest::Lookup { key, respond_to } => self.handle_lookup(key, respond_to),
                CacheRequest::BeginFetch { entity, respond_to } => {
                    self.handle_begin_fetch(entity, respond_to)
                }
                CacheRequest::CompleteFetch {
                    key,
                    ticket,
                    data,
                    respond_to,
                } => self.handle_complete_fetch(key, ticket, data, respond_to),
                CacheRequest::ApplyOptimistic {
                    entity,
                    op,
                    respond_to,
                } => self.handle_apply_optimistic(entity, op, respond_to),
                CacheRequest::Settle {
                    mutation,
                    succeeded,
                    respond_to,
                } => self.handle_settle(mutation, succeeded, respond_to),
                CacheRequest::Invalidate { entity, respond_to } => {
                    self.handle_invalidate(entity, respond_to)
                }
                CacheRequest::Clear { respond_to } => {
                    self.entries.clear();
                    debug!("Cache cleared");
                    let _ = respond_to.send(());
                }
                CacheRequest::Shutdown => {
                    info!("QueryCache shutting down");
                    break;
                }
            }
        }

        info!("QueryCache stopped");
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn view(&self, key: &QueryKey, entry: &Entry) -> CacheView {
        let invalidated = self.invalidated_at.get(key.entity()).copied().unwrap_or(0);
        CacheView {
            data: layers::view(&entry.base, &entry.layers),
            fresh: invalidated < entry.ticket && entry.fetched_at.elapsed() < self.stale_time,
            pending: entry.layers.len(),
        }
    }

    #[instrument(fields(key = %key), skip(self, respond_to))]
    fn handle_lookup(&self, key: QueryKey, respond_to: CacheResponse<Option<CacheView>>) {
        let view = self.entries.get(&key).map(|entry| self.view(&key, entry));
        match &view {
            Some(view) => debug!(fresh = view.fresh, pending = view.pending, "Cache hit"),
            None => debug!("Cache miss"),
        }
        let _ = respond_to.send(view);
    }

    fn handle_begin_fetch(&mut self, entity: String, respond_to: CacheResponse<FetchTicket>) {
        let ticket = self.tick();
        debug!(entity = %entity, ticket, "Fetch started");
        let _ = respond_to.send(FetchTicket(ticket));
    }

    #[instrument(fields(key = %key, ticket = ticket.0), skip(self, data, respond_to))]
    fn handle_complete_fetch(
        &mut self,
        key: QueryKey,
        ticket: FetchTicket,
        data: CachedData,
        respond_to: CacheResponse<FetchOutcome>,
    ) {
        let invalidated = self.invalidated_at.get(key.entity()).copied().unwrap_or(0);
        if invalidated > ticket.0 {
            debug!(invalidated, "Discarding fetch superseded by invalidation");
            let _ = respond_to.send(FetchOutcome::Superseded);
            return;
        }

        let now = Instant::now();
        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            base: data.clone(),
            fetched_at: now,
            ticket: 0,
            layers: Vec::new(),
        });

        if entry.ticket > ticket.0 {
            debug!(stored = entry.ticket, "A newer fetch already landed");
        } else {
            entry.base = data;
            entry.fetched_at = now;
            entry.ticket = ticket.0;
            // Confirmed mutations that predate this fetch are now part of the base.
            entry
                .layers
                .retain(|l| l.confirmed_at.map_or(true, |confirmed| confirmed > ticket.0));
            debug!(remaining_layers = entry.layers.len(), "Fetch stored");
        }

        let view = match self.entries.get(&key) {
            Some(entry) => self.view(&key, entry),
            None => return,
        };
        let _ = respond_to.send(FetchOutcome::Stored(view));
    }

    #[instrument(fields(entity = %entity), skip(self, op, respond_to))]
    fn handle_apply_optimistic(
        &mut self,
        entity: String,
        op: OptimisticOp,
        respond_to: CacheResponse<MutationId>,
    ) {
        let mutation = MutationId(self.next_mutation);
        self.next_mutation += 1;

        let mut touched = 0;
        for (key, entry) in self.entries.iter_mut() {
            if key.entity() == entity && layers::affects(&op, key) {
                entry.layers.push(Layer {
                    mutation,
                    op: op.clone(),
                    confirmed_at: None,
                });
                touched += 1;
            }
        }

        debug!(mutation = %mutation, touched, "Optimistic update applied");
        let _ = respond_to.send(mutation);
    }

    #[instrument(fields(mutation = %mutation), skip(self, respond_to))]
    fn handle_settle(&mut self, mutation: MutationId, succeeded: bool, respond_to: CacheResponse<()>) {
        let now = self.tick();
        for entry in self.entries.values_mut() {
            if succeeded {
                for layer in entry.layers.iter_mut().filter(|l| l.mutation == mutation) {
                    layer.confirmed_at = Some(now);
                }
            } else {
                entry.layers.retain(|l| l.mutation != mutation);
            }
        }

        if succeeded {
            debug!("Mutation confirmed");
        } else {
            info!("Mutation rolled back");
        }
        let _ = respond_to.send(());
    }

    fn handle_invalidate(&mut self, entity: String, respond_to: CacheResponse<()>) {
        let now = self.tick();
        debug!(entity = %entity, clock = now, "Entity invalidated");
        self.invalidated_at.insert(entity, now);
        let _ = respond_to.send(());
    }
}
