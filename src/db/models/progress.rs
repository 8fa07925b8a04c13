//! Fitness progress entries.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProgressEntry {
    pub id: String,
    pub user_id: String,
    pub recorded_on: String,
    pub weight_kg: f64,
    pub body_fat_pct: Option<f64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProgressRequest {
    /// `YYYY-MM-DD`; defaults to today
    pub recorded_on: Option<String>,
    pub weight_kg: f64,
    pub body_fat_pct: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressRequest {
    pub recorded_on: Option<String>,
    pub weight_kg: Option<f64>,
    pub body_fat_pct: Option<f64>,
    pub notes: Option<String>,
}
