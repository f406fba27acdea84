//! Author name validation
//!
//! The name is matched by equality and always bound as a query parameter,
//! so quotes and SQL metacharacters are ordinary data here.

use super::ValidationError;

/// Validated author name used as the lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorName(String);

impl AuthorName {
    /// Create a new author name.
    ///
    /// # Rules
    /// - Not empty and not whitespace-only
    /// - No NUL bytes (Postgres text cannot store them)
    ///
    /// There is no length cap: any author a row can hold can be looked up.
    ///
    /// The value is kept verbatim; surrounding whitespace is not trimmed.
    ///
    /// # Example
    /// ```
    /// use bookshelf_server::models::AuthorName;
    ///
    /// assert!(AuthorName::new("Tolkien").is_ok());
    /// assert!(AuthorName::new("O'Brien' OR '1'='1").is_ok());
    /// assert!(AuthorName::new("   ").is_err());
    /// ```
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        if s.trim().is_empty() {
            return Err(ValidationError::Empty { field: "author" });
        }

        if s.contains('\0') {
            return Err(ValidationError::InvalidFormat {
                field: "author",
                reason: "must not contain NUL characters",
            });
        }

        Ok(Self(s.to_owned()))
    }

    /// Get the author name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AuthorName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
