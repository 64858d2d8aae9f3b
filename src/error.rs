use thiserror::Error;

/// Errors surfaced by the transport, cache and query layers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
    #[error("session expired, login required")]
    AuthExpired,
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("credential storage error: {0}")]
    Storage(String),
    #[error("query cache unavailable: {0}")]
    CacheClosed(String),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::AuthExpired => Some(401),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| (500..600).contains(&s))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Whether a failed list query may be retried. Mutations never retry.
    pub fn should_retry(&self) -> bool {
        !matches!(
            self,
            Self::AuthExpired | Self::NotFound { .. } | Self::CacheClosed(_) | Self::Storage(_)
        )
    }
}

/// Errors raised while turning form input into a typed record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FormError {
    #[error("{field} is required")]
    Required { field: String },
    #[error("{field}: expected {expected}, got {input:?}")]
    Invalid {
        field: String,
        expected: String,
        input: String,
    },
    #[error("{field}: {value:?} is not one of {options:?}")]
    NotAnOption {
        field: String,
        value: String,
        options: Vec<String>,
    },
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Errors raised while loading or querying the entity catalog.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("catalog parse error: {0}")]
    Parse(String),
    #[error("invalid catalog: {0}")]
    Invalid(String),
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("catalog io error: {0}")]
    Io(String),
}

/// Errors raised while wiring the console together.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StartupError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let not_found = ApiError::NotFound {
            entity: "products".into(),
            id: "7".into(),
        };
        assert!(not_found.is_client_error());
        assert!(!not_found.should_retry());

        let server = ApiError::Http {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(server.is_server_error());
        assert!(server.should_retry());

        assert!(ApiError::AuthExpired.is_auth_expired());
        assert!(!ApiError::AuthExpired.should_retry());
        assert_eq!(ApiError::Network("reset".into()).status(), None);
    }
}
