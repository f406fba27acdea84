//! Book record and row decoding

use serde::{Deserialize, Serialize};

use crate::db::connection::{Row, Value};

/// A book from the `books` table.
///
/// `id` is optional because not every lookup selects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub author: String,
    pub cost: i64,
}

/// A row could not be turned into a [`Book`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected 3 or 4 columns, found {found}")]
    ColumnCount { found: usize },

    #[error("missing column '{column}'")]
    MissingColumn { column: &'static str },

    #[error("column '{column}' is not {expected}")]
    WrongType {
        column: &'static str,
        expected: &'static str,
    },

    #[error("cost must be non-negative, got {cost}")]
    NegativeCost { cost: i64 },

    #[error("row author '{found}' does not match the requested author")]
    AuthorMismatch { found: String },
}

impl TryFrom<&Row> for Book {
    type Error = DecodeError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        if !(3..=4).contains(&row.len()) {
            return Err(DecodeError::ColumnCount { found: row.len() });
        }

        let id = match row.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::Int(id)) => Some(*id),
            Some(Value::Text(_)) => {
                return Err(DecodeError::WrongType {
                    column: "id",
                    expected: "an integer",
                })
            }
        };

        let cost = required_int(row, "cost")?;
        if cost < 0 {
            return Err(DecodeError::NegativeCost { cost });
        }

        Ok(Self {
            id,
            title: required_text(row, "title")?,
            author: required_text(row, "author")?,
            cost,
        })
    }
}

fn required_text(row: &Row, column: &'static str) -> Result<String, DecodeError> {
    match row.get(column) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::WrongType {
            column,
            expected: "non-null text",
        }),
        None => Err(DecodeError::MissingColumn { column }),
    }
}

fn required_int(row: &Row, column: &'static str) -> Result<i64, DecodeError> {
    match row.get(column) {
        Some(Value::Int(v)) => Ok(*v),
        Some(_) => Err(DecodeError::WrongType {
            column,
            expected: "a non-null integer",
        }),
        None => Err(DecodeError::MissingColumn { column }),
    }
}
