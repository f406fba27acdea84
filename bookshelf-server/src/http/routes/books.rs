//! Books-by-author endpoints

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::http::error::ApiError;
use crate::http::extractors::AuthorPath;
use crate::http::server::AppState;
use crate::models::{Book, ValidationError};

/// GET /books/{author} - every book by exactly this author
async fn books_by_author(
    State(state): State<Arc<AppState>>,
    AuthorPath(author): AuthorPath,
) -> Result<Json<Vec<Book>>, ApiError> {
    let books = state.books.find_books_by_author(&author).await?;
    Ok(Json(books))
}

/// GET /books/ - the author segment is missing
async fn missing_author() -> ApiError {
    ApiError::Validation(ValidationError::Empty { field: "author" })
}

/// Book routes. `/GetBookByAuthor/{author}` is kept for existing clients.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/books/{author}", get(books_by_author))
        .route("/books/", get(missing_author))
        .route("/GetBookByAuthor/{author}", get(books_by_author))
        .route("/GetBookByAuthor/", get(missing_author))
}
