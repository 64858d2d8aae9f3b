use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::{EntityDescriptor, Page, PageParams, Record, RecordId};
use crate::error::ApiError;
use crate::transport::{ApiRequest, BaseClient};

/// REST client for one entity's collection endpoint.
#[derive(Clone)]
pub struct EntityClient {
    base: Arc<BaseClient>,
    descriptor: Arc<EntityDescriptor>,
}

impl EntityClient {
    pub fn new(base: Arc<BaseClient>, descriptor: Arc<EntityDescriptor>) -> Self {
        Self { base, descriptor }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    fn collection_path(&self) -> &str {
        self.descriptor.path.trim_end_matches('/')
    }

    fn item_path(&self, id: &RecordId) -> String {
        format!("{}/{}", self.collection_path(), id)
    }

    fn not_found(&self, id: &RecordId) -> impl Fn(ApiError) -> ApiError + '_ {
        let id = id.to_string();
        move |e| match e.status() {
            Some(404) => ApiError::NotFound {
                entity: self.descriptor.name.clone(),
                id: id.clone(),
            },
            _ => e,
        }
    }

    #[instrument(skip(self), fields(entity = %self.descriptor.name))]
    pub async fn list(&self, params: PageParams) -> Result<Page, ApiError> {
        debug!("Sending request");
        let request = ApiRequest::get(self.collection_path()).with_query(params.query_pairs());
        let body = self.base.execute(request).await?;
        Page::decode(&self.descriptor, &body)
    }

    #[instrument(skip(self), fields(entity = %self.descriptor.name, id = %id))]
    pub async fn get_by_id(&self, id: &RecordId) -> Result<Record, ApiError> {
        debug!("Sending request");
        let body = self
            .base
            .execute(ApiRequest::get(self.item_path(id)))
            .await
            .map_err(self.not_found(id))?;
        Record::decode(&self.descriptor, unwrap_data(&body))
    }

    #[instrument(skip(self, record), fields(entity = %self.descriptor.name, field_count = record.len()))]
    pub async fn create(&self, record: &Record) -> Result<Record, ApiError> {
        debug!("Sending request");
        let request = ApiRequest::post(self.collection_path(), record.encode());
        let body = self.base.execute(request).await?;
        Record::decode(&self.descriptor, unwrap_data(&body))
    }

    #[instrument(skip(self, record), fields(entity = %self.descriptor.name, id = %id))]
    pub async fn update(&self, id: &RecordId, record: &Record) -> Result<Record, ApiError> {
        debug!("Sending request");
        let request = ApiRequest::put(self.item_path(id), record.encode());
        let body = self.base.execute(request).await.map_err(self.not_found(id))?;
        Record::decode(&self.descriptor, unwrap_data(&body))
    }

    /// Returns the server's acknowledgement body, whatever its shape.
    #[instrument(skip(self), fields(entity = %self.descriptor.name, id = %id))]
    pub async fn delete(&self, id: &RecordId) -> Result<Value, ApiError> {
        debug!("Sending request");
        self.base
            .execute(ApiRequest::delete(self.item_path(id)))
            .await
            .map_err(self.not_found(id))
    }
}

/// Single-record responses may arrive wrapped as `{ "data": { ... } }`.
fn unwrap_data(body: &Value) -> &Value {
    match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    }
}
