//! Domain models with validation at construction
//!
//! User input is validated when creating these types.
//! Invalid input returns ValidationError, not panic.

pub mod author;
pub mod book;
pub mod validation;

pub use author::AuthorName;
pub use book::{Book, DecodeError};
pub use validation::ValidationError;
