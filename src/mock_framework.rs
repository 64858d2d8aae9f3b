//! # Mock Framework
//!
//! Utilities for testing the console without a server.
//!
//! Two transports are provided:
//! * [`create_mock_transport`] hands every request to the test through a
//!   channel, so the test decides each response (see [`expect_request`]).
//! * [`FakeBackend`] answers requests itself, implementing the REST contract
//!   (pagination, `{ data, meta }` envelopes, scripted failures) in memory.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::catalog::Catalog;
use crate::domain::IdKind;
use crate::error::ApiError;
use crate::transport::{ApiRequest, ApiResponse, HttpSend, Verb};

pub type Responder = oneshot::Sender<Result<ApiResponse, ApiError>>;
pub type MockReceiver = mpsc::Receiver<(ApiRequest, Responder)>;

/// An [`HttpSend`] that forwards each request to a test-held receiver.
pub struct MockHttp {
    sender: mpsc::Sender<(ApiRequest, Responder)>,
}

#[async_trait]
impl HttpSend for MockHttp {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send((request, respond_to))
            .await
            .map_err(|_| ApiError::Network("mock transport closed".into()))?;
        response
            .await
            .map_err(|_| ApiError::Network("mock transport dropped the request".into()))?
    }
}

/// Creates a mock transport and the receiver on which its requests arrive.
///
/// Requests block until the test answers through the paired responder, which
/// makes ordering and failure injection deterministic.
pub fn create_mock_transport(buffer_size: usize) -> (Arc<MockHttp>, MockReceiver) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (Arc::new(MockHttp { sender }), receiver)
}

/// Waits for the next request sent through the mock transport.
pub async fn expect_request(receiver: &mut MockReceiver) -> Option<(ApiRequest, Responder)> {
    receiver.recv().await
}

struct Collection {
    id_field: String,
    id_kind: IdKind,
    rows: Vec<Value>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(&self.id_field).map(id_text).as_deref() == Some(id))
    }

    fn next_id(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(|row| row.get(&self.id_field).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Handle for an item GET paused by [`FakeBackend::hold_next_item_get`].
pub struct HeldGet {
    /// Fires once the request has been answered server-side but not returned.
    pub arrived: oneshot::Receiver<()>,
    /// Lets the paused response go back to the client.
    pub release: oneshot::Sender<()>,
}

struct PendingHold {
    arrived: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

#[derive(Default)]
struct BackendState {
    collections: HashMap<String, Collection>,
    paths: HashMap<String, String>,
    failures: VecDeque<(Verb, u16)>,
    log: Vec<ApiRequest>,
    hold: Option<PendingHold>,
}

/// In-memory REST server covering every entity of a catalog.
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new(catalog: &Catalog) -> Arc<Self> {
        let mut state = BackendState::default();
        for descriptor in catalog.iter() {
            let path = descriptor.path.trim_matches('/').to_string();
            state.paths.insert(descriptor.name.clone(), path.clone());
            state.collections.insert(
                path,
                Collection {
                    id_field: descriptor.id_field.clone(),
                    id_kind: descriptor.id_kind,
                    rows: Vec::new(),
                },
            );
        }
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn seed(&self, entity: &str, rows: Vec<Value>) {
        let mut state = self.lock();
        let path = state.paths[entity].clone();
        if let Some(collection) = state.collections.get_mut(&path) {
            collection.rows.extend(rows);
        }
    }

    pub fn rows(&self, entity: &str) -> Vec<Value> {
        let state = self.lock();
        state.collections[&state.paths[entity]].rows.clone()
    }

    /// The next request with `verb` fails with `status`.
    pub fn fail_next(&self, verb: Verb, status: u16) {
        self.lock().failures.push_back((verb, status));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().log.clone()
    }

    /// Pauses the next single-record GET after it has been answered.
    pub fn hold_next_item_get(&self) -> HeldGet {
        let (arrived_tx, arrived) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        self.lock().hold = Some(PendingHold {
            arrived: arrived_tx,
            release: release_rx,
        });
        HeldGet { arrived, release }
    }

    fn handle(state: &mut BackendState, request: &ApiRequest) -> ApiResponse {
        if let Some(at) = state.failures.iter().position(|(verb, _)| *verb == request.verb) {
            let (_, status) = state.failures.remove(at).unwrap_or((request.verb, 500));
            return ApiResponse::json(status, json!({ "message": format!("scripted failure {status}") }));
        }

        let trimmed = request.path.trim_matches('/');
        let (path, id) = match trimmed.split_once('/') {
            Some((path, id)) => (path, Some(id)),
            None => (trimmed, None),
        };
        let Some(collection) = state.collections.get_mut(path) else {
            return not_found();
        };

        match (request.verb, id) {
            (Verb::Get, None) => list(collection, request),
            (Verb::Get, Some(id)) => match collection.position(id) {
                Some(at) => ApiResponse::json(200, json!({ "data": collection.rows[at] })),
                None => not_found(),
            },
            (Verb::Post, None) => create(collection, request.body.clone()),
            (Verb::Put, Some(id)) => match collection.position(id) {
                Some(at) => {
                    let row = &mut collection.rows[at];
                    if let (Some(row), Some(Value::Object(patch))) =
                        (row.as_object_mut(), request.body.as_ref())
                    {
                        for (field, value) in patch {
                            row.insert(field.clone(), value.clone());
                        }
                    }
                    ApiResponse::json(200, collection.rows[at].clone())
                }
                None => not_found(),
            },
            (Verb::Delete, Some(id)) => match collection.position(id) {
                Some(at) => {
                    collection.rows.remove(at);
                    ApiResponse::json(200, json!({ "message": "deleted" }))
                }
                None => not_found(),
            },
            _ => ApiResponse::json(405, json!({ "message": "method not allowed" })),
        }
    }
}

fn not_found() -> ApiResponse {
    ApiResponse::json(404, json!({ "message": "not found" }))
}

fn query_param(request: &ApiRequest, name: &str, default: usize) -> usize {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(default)
        .max(1)
}

fn list(collection: &Collection, request: &ApiRequest) -> ApiResponse {
    let limit = query_param(request, "limit", 10);
    let page = query_param(request, "page", 1);
    let data: Vec<Value> = collection
        .rows
        .iter()
        .skip((page - 1) * limit)
        .take(limit)
        .cloned()
        .collect();
    ApiResponse::json(
        200,
        json!({
            "data": data,
            "meta": { "total": collection.rows.len(), "page": page, "limit": limit }
        }),
    )
}

fn create(collection: &mut Collection, body: Option<Value>) -> ApiResponse {
    let Some(Value::Object(mut row)) = body else {
        return ApiResponse::json(400, json!({ "message": "expected a json object" }));
    };
    match collection.id_kind {
        IdKind::Integer => {
            row.insert(collection.id_field.clone(), json!(collection.next_id()));
        }
        IdKind::Text => match row.get(&collection.id_field).map(id_text) {
            Some(id) if collection.position(&id).is_none() => {}
            Some(_) => return ApiResponse::json(409, json!({ "message": "duplicate id" })),
            None => return ApiResponse::json(400, json!({ "message": "id is required" })),
        },
    }
    let row = Value::Object(row);
    collection.rows.push(row.clone());
    ApiResponse::json(201, json!({ "data": row }))
}

#[async_trait]
impl HttpSend for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let (response, hold) = {
            let mut state = self.lock();
            state.log.push(request.clone());
            let is_item_get = request.verb == Verb::Get && request.path.trim_matches('/').contains('/');
            let hold = if is_item_get { state.hold.take() } else { None };
            (Self::handle(&mut state, &request), hold)
        };

        if let Some(hold) = hold {
            let _ = hold.arrived.send(());
            let _ = hold.release.await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<FakeBackend> {
        FakeBackend::new(&Catalog::builtin().unwrap())
    }

    #[tokio::test]
    async fn test_mock_transport() {
        let (http, mut receiver) = create_mock_transport(4);

        let task = tokio::spawn(async move { http.send(ApiRequest::get("/brands")).await });

        let (request, responder) = expect_request(&mut receiver).await.expect("Expected a request");
        assert_eq!(request.path, "/brands");
        responder
            .send(Ok(ApiResponse::json(200, json!({ "data": [] }))))
            .unwrap();

        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn fake_backend_pages_and_assigns_ids() {
        let backend = backend();
        for n in 0..12 {
            backend
                .send(ApiRequest::post("/brands", json!({ "name": format!("b{n}") })))
                .await
                .unwrap();
        }

        let page = backend
            .send(ApiRequest::get("/brands").with_query(vec![
                ("limit".into(), "5".into()),
                ("page".into(), "3".into()),
            ]))
            .await
            .unwrap();
        assert_eq!(page.body["meta"]["total"], json!(12));
        assert_eq!(page.body["data"].as_array().unwrap().len(), 2);
        assert_eq!(page.body["data"][0]["brand_id"], json!(11));
    }

    #[tokio::test]
    async fn scripted_failures_hit_the_next_matching_verb() {
        let backend = backend();
        backend.seed("brands", vec![json!({ "brand_id": 1, "name": "Acme" })]);
        backend.fail_next(Verb::Put, 500);

        let read = backend.send(ApiRequest::get("/brands/1")).await.unwrap();
        assert_eq!(read.status, 200);

        let write = backend
            .send(ApiRequest::put("/brands/1", json!({ "name": "Other" })))
            .await
            .unwrap();
        assert_eq!(write.status, 500);
        assert_eq!(backend.rows("brands")[0]["name"], json!("Acme"));
        assert_eq!(backend.requests().len(), 2);
    }
}
