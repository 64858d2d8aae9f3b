//! The per-entity management screen: list, search, pagination and the
//! create/edit form, rendered as text.

mod form;
pub mod render;

pub use form::FormState;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Record, RecordId};
use crate::error::{ApiError, FormError};
use crate::query::{EntityQuery, ListState};

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Created(Record),
    Updated(Record),
    Invalid(FormError),
    Rejected(ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    Rejected(ApiError),
}

/// Identifies one `begin_edit` call; a later call or a delete of the
/// target makes older tickets stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTicket(u64);

pub struct EntityScreen {
    query: EntityQuery,
    search: String,
    form: FormState,
    editing: Option<(RecordId, EditTicket)>,
    next_ticket: u64,
}

impl EntityScreen {
    pub fn new(query: EntityQuery) -> Self {
        let form = FormState::blank(query.descriptor().clone());
        Self {
            query,
            search: String::new(),
            form,
            editing: None,
            next_ticket: 1,
        }
    }

    pub fn query(&self) -> &EntityQuery {
        &self.query
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut FormState {
        &mut self.form
    }

    pub fn edit_target(&self) -> Option<&RecordId> {
        self.editing.as_ref().map(|(id, _)| id)
    }

    /// Loads the current page. Only an expired session is returned as an
    /// error; other failures show up in [`ListState::error`].
    pub async fn load(&self) -> Result<ListState, ApiError> {
        match self.query.list().await {
            Err(ApiError::AuthExpired) => return Err(ApiError::AuthExpired),
            Err(e) => debug!(error = %e, "List failed, shown in list state"),
            Ok(_) => {}
        }
        self.query.list_state().await
    }

    /// Rows of the loaded page that match the search box.
    pub fn visible_rows<'a>(&self, state: &'a ListState) -> Vec<&'a Record> {
        state
            .rows()
            .iter()
            .filter(|record| record.matches_search(&self.search))
            .collect()
    }

    pub fn next_page(&self) {
        self.query.next_page();
    }

    pub fn previous_page(&self) {
        self.query.previous_page();
    }

    pub fn set_page_size(&self, limit: u32) {
        self.query.set_limit(limit);
    }

    /// Leaves edit mode with an empty form.
    pub fn new_record(&mut self) {
        self.editing = None;
        self.form = FormState::blank(self.query.descriptor().clone());
    }

    /// Switches the form to editing `id`; hydrate with [`complete_edit`](Self::complete_edit).
    pub fn begin_edit(&mut self, id: RecordId) -> EditTicket {
        let ticket = EditTicket(self.next_ticket);
        self.next_ticket += 1;
        debug!(entity = %self.query.entity(), id = %id, "Editing record");
        self.editing = Some((id, ticket));
        ticket
    }

    /// Overwrites the form with the fetched record if `ticket` is still the
    /// current edit. Returns whether the form was hydrated.
    pub fn complete_edit(
        &mut self,
        ticket: EditTicket,
        fetched: Result<Record, ApiError>,
    ) -> Result<bool, ApiError> {
        if self.editing.as_ref().map(|(_, current)| *current) != Some(ticket) {
            debug!(?ticket, "Discarding stale edit fetch");
            return Ok(false);
        }
        match fetched {
            Ok(record) => {
                self.form = FormState::from_record(self.query.descriptor().clone(), &record);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Could not load record for editing");
                Err(e)
            }
        }
    }

    pub async fn edit(&mut self, id: RecordId) -> Result<bool, ApiError> {
        let ticket = self.begin_edit(id.clone());
        let fetched = self.query.fetch_by_id(&id).await;
        self.complete_edit(ticket, fetched)
    }

    #[instrument(skip(self), fields(entity = %self.query.entity()))]
    pub async fn save(&mut self) -> SaveOutcome {
        let target = self.edit_target().cloned();
        let payload = match &target {
            Some(_) => self.form.to_update_payload(),
            None => self.form.to_create_payload(),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Form rejected");
                return SaveOutcome::Invalid(e);
            }
        };

        let result = match &target {
            Some(id) => self.query.update(id, payload).await.map(SaveOutcome::Updated),
            None => self.query.create(payload).await.map(SaveOutcome::Created),
        };
        match result {
            Ok(outcome) => {
                self.new_record();
                outcome
            }
            Err(e) => {
                log_rejection(&e, "Save");
                SaveOutcome::Rejected(e)
            }
        }
    }

    #[instrument(skip(self), fields(entity = %self.query.entity(), id = %id))]
    pub async fn delete(&mut self, id: &RecordId) -> DeleteOutcome {
        match self.query.delete(id).await {
            Ok(()) => {
                if self.edit_target() == Some(id) {
                    info!("Deleted the record under edit, leaving edit mode");
                    self.new_record();
                }
                DeleteOutcome::Deleted
            }
            Err(e) => {
                log_rejection(&e, "Delete");
                DeleteOutcome::Rejected(e)
            }
        }
    }

    /// Text view of the list, or `Error: ...` when it failed to load.
    pub async fn render(&self) -> Result<String, ApiError> {
        let state = self.query.list_state().await?;
        let mut out = render::render_list(self.query.descriptor(), &state, &self.search);
        out.push('\n');
        out.push_str(&render::render_form(&self.form, self.edit_target()));
        Ok(out)
    }
}

/// Rejections the user can fix (4xx) are warnings; the rest are errors.
fn log_rejection(e: &ApiError, action: &str) {
    if e.is_client_error() && !e.is_auth_expired() {
        warn!(error = %e, status = e.status(), "{action} rejected by server");
    } else if e.is_server_error() {
        error!(error = %e, status = e.status(), "{action} failed on the server");
    } else {
        error!(error = %e, "{action} failed");
    }
}
