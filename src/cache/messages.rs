use std::fmt;

use tokio::sync::oneshot;

use crate::domain::{Page, PageParams, Record, RecordId};

/// Identifies one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    List { entity: String, params: PageParams },
    Detail { entity: String, id: RecordId },
}

impl QueryKey {
    pub fn list(entity: impl Into<String>, params: PageParams) -> Self {
        QueryKey::List {
            entity: entity.into(),
            params,
        }
    }

    pub fn detail(entity: impl Into<String>, id: RecordId) -> Self {
        QueryKey::Detail {
            entity: entity.into(),
            id,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            QueryKey::List { entity, .. } | QueryKey::Detail { entity, .. } => entity,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::List { entity, params } => {
                write!(f, "{entity}[limit={},page={}]", params.limit, params.page)
            }
            QueryKey::Detail { entity, id } => write!(f, "{entity}/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    Page(Page),
    Record(Record),
    /// A detail entry whose record is optimistically deleted.
    Removed,
}

impl CachedData {
    pub fn into_page(self) -> Option<Page> {
        match self {
            CachedData::Page(page) => Some(page),
            _ => None,
        }
    }
}

/// A cached value with every pending optimistic layer applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheView {
    pub data: CachedData,
    pub fresh: bool,
    pub pending: usize,
}

/// An optimistic change, applied as a removable layer over fetched data.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticOp {
    Create {
        target: QueryKey,
        record: Record,
    },
    Update {
        id_field: String,
        id: RecordId,
        patch: Record,
    },
    Delete {
        id_field: String,
        id: RecordId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(pub(crate) u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Stored(CacheView),
    /// The entity was invalidated after the fetch began; the result was dropped.
    Superseded,
}

pub type CacheResponse<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum CacheRequest {
    Lookup {
        key: QueryKey,
        respond_to: CacheResponse<Option<CacheView>>,
    },
    BeginFetch {
        entity: String,
        respond_to: CacheResponse<FetchTicket>,
    },
    CompleteFetch {
        key: QueryKey,
        ticket: FetchTicket,
        data: CachedData,
        respond_to: CacheResponse<FetchOutcome>,
    },
    ApplyOptimistic {
        entity: String,
        op: OptimisticOp,
        respond_to: CacheResponse<MutationId>,
    },
    Settle {
        mutation: MutationId,
        succeeded: bool,
        respond_to: CacheResponse<()>,
    },
    Invalidate {
        entity: String,
        respond_to: CacheResponse<()>,
    },
    Clear {
        respond_to: CacheResponse<()>,
    },
    Shutdown,
}
