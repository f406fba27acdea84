//! Custom Axum extractors

use axum::extract::path::ErrorKind;
use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use super::error::ApiError;
use crate::models::ValidationError;

/// Raw author segment from the path.
///
/// Only extraction happens here; the lookup service validates the value.
pub struct AuthorPath(pub String);

impl<S> FromRequestParts<S> for AuthorPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(author): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(path_rejection)?;

        Ok(Self(author))
    }
}

fn path_rejection(rejection: PathRejection) -> ApiError {
    let reason = match &rejection {
        PathRejection::FailedToDeserializePathParams(e) => match e.kind() {
            ErrorKind::InvalidUtf8InPathParam { .. } => "path segment is not valid UTF-8",
            ErrorKind::WrongNumberOfParameters { .. } => return miswired(&rejection),
            _ => "path segment could not be read",
        },
        PathRejection::MissingPathParams(_) => return miswired(&rejection),
        _ => "path segment could not be read",
    };

    ApiError::Validation(ValidationError::InvalidFormat {
        field: "author",
        reason,
    })
}

/// The handler sits on a route that has no single author parameter.
fn miswired(rejection: &PathRejection) -> ApiError {
    ApiError::Internal {
        message: format!("author extractor on a route without one path parameter: {rejection}"),
    }
}
