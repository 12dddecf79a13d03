//! Variant (published edition of a volume) model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Variant {
    pub id: i32,
    pub volume_id: i32,
    pub publisher: Option<String>,
    pub edition: Option<String>,
    pub cover: Option<String>,
    pub paper_quality: Option<String>,
    pub isbn: Option<String>,
    pub price: Option<Decimal>,
}
