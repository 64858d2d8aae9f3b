use crate::cache::{CachedData, MutationId, OptimisticOp, QueryKey};

#[derive(Debug, Clone)]
pub(crate) struct Layer {
    pub mutation: MutationId,
    pub op: OptimisticOp,
    /// Clock value at which the server confirmed the mutation.
    pub confirmed_at: Option<u64>,
}

/// Whether an optimistic op touches the entry stored under `key`.
/// Callers only pass keys of the op's own entity.
pub(crate) fn affects(op: &OptimisticOp, key: &QueryKey) -> bool {
    match op {
        OptimisticOp::Create { target, .. } => target == key,
        OptimisticOp::Update { id, .. } | OptimisticOp::Delete { id, .. } => match key {
            QueryKey::List { .. } => true,
            QueryKey::Detail { id: key_id, .. } => id == key_id,
        },
    }
}

/// Applies one layer on top of `data`.
pub(crate) fn apply(data: &mut CachedData, op: &OptimisticOp) {
    if matches!(data, CachedData::Record(_)) && matches!(op, OptimisticOp::Delete { .. }) {
        *data = CachedData::Removed;
        return;
    }
    match (data, op) {
        (CachedData::Page(page), OptimisticOp::Create { record, .. }) => {
            page.data.push(record.clone());
        }
        (CachedData::Page(page), OptimisticOp::Update { id_field, id, patch }) => {
            for record in page.data.iter_mut().filter(|r| r.has_id(id_field, id)) {
                record.merge(patch);
            }
        }
        (CachedData::Page(page), OptimisticOp::Delete { id_field, id }) => {
            page.data.retain(|r| !r.has_id(id_field, id));
        }
        (CachedData::Record(record), OptimisticOp::Update { patch, .. }) => {
            record.merge(patch);
        }
        _ => {}
    }
}

/// Folds every layer, oldest first, over a copy of the fetched data.
pub(crate) fn view(base: &CachedData, layers: &[Layer]) -> CachedData {
    let mut data = base.clone();
    for layer in layers {
        apply(&mut data, &layer.op);
    }
    data
}
