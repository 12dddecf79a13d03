//! Copy (one physical unit of a variant) model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Copy status; only the loan and reservation services change it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum CopyStatus {
    Available = 0,
    Borrowed = 1,
    Reserved = 2,
    Lost = 3,
    Withdrawn = 4,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Available => "available",
            CopyStatus::Borrowed => "borrowed",
            CopyStatus::Reserved => "reserved",
            CopyStatus::Lost => "lost",
            CopyStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Physical copy row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookCopy {
    pub id: i32,
    pub variant_id: i32,
    /// Unique across copies
    pub barcode: String,
    pub status: CopyStatus,
    pub location: Option<String>,
    #[serde(skip)]
    pub version: i32,
}
