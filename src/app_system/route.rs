use std::fmt;

use tracing::warn;

use crate::error::ApiError;

/// Where the console is, or where it should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The entity index.
    Entities,
    /// The management screen of one entity.
    Screen(String),
    Login,
}

impl Route {
    /// Navigation after a failed operation: an expired session always goes
    /// to login, anything else stays put.
    pub fn after_error(self, error: &ApiError) -> Route {
        if error.is_auth_expired() {
            warn!(from = %self, "Session expired, redirecting to login");
            Route::Login
        } else {
            self
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Entities => f.write_str("/"),
            Route::Screen(entity) => write!(f, "/{entity}"),
            Route::Login => f.write_str("/login"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_expired_goes_to_login() {
        let here = Route::Screen("orders".into());
        assert_eq!(here.clone().after_error(&ApiError::AuthExpired), Route::Login);
        assert_eq!(
            here.clone().after_error(&ApiError::Http {
                status: 500,
                message: "boom".into()
            }),
            here
        );
    }

    #[test]
    fn displays_as_paths() {
        assert_eq!(Route::Entities.to_string(), "/");
        assert_eq!(Route::Login.to_string(), "/login");
        assert_eq!(Route::Screen("audit_logs".into()).to_string(), "/audit_logs");
    }
}
