use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an authenticated caller, as resolved by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(feature = "api")]
pub use extract::AuthenticatedCaller;

#[cfg(feature = "api")]
mod extract {
    use axum::Json;
    use axum::extract::FromRequestParts;
    use axum::http::StatusCode;
    use axum::http::request::Parts;
    use axum::response::{IntoResponse, Response};
    use serde_json::json;

    use super::UserId;

    /// Extracts the caller placed into request extensions by an authentication middleware.
    #[derive(Debug, Clone, Copy)]
    pub struct AuthenticatedCaller(pub UserId);

    impl AuthenticatedCaller {
        pub fn id(&self) -> UserId {
            self.0
        }
    }

    impl<S> FromRequestParts<S> for AuthenticatedCaller
    where
        S: Send + Sync,
    {
        type Rejection = Response;

        async fn from_request_parts(
            parts: &mut Parts,
            _state: &S,
        ) -> Result<Self, Self::Rejection> {
            parts
                .extensions
                .get::<UserId>()
                .copied()
                .map(AuthenticatedCaller)
                .ok_or_else(|| {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({
                            "error": {
                                "code": "unauthenticated",
                                "message": "Authentication required"
                            }
                        })),
                    )
                        .into_response()
                })
        }
    }
}
