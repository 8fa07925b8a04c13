//! Services, trainers, trainer assignments and equipment.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(alias = "desc")]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    #[serde(alias = "desc")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trainer {
    pub id: String,
    pub name: String,
    pub specialty: String,
    pub experience_years: i64,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTrainerRequest {
    pub name: String,
    pub specialty: String,
    #[serde(default)]
    pub experience_years: i64,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTrainerRequest {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub experience_years: Option<i64>,
    pub bio: Option<String>,
}

/// A trainer-to-service slot with capacity and schedule
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: String,
    pub service_id: String,
    pub trainer_id: String,
    pub schedule: String,
    pub max_capacity: i64,
    pub booked_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    pub service_id: String,
    pub trainer_id: String,
    pub schedule: String,
    pub max_capacity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAssignmentRequest {
    pub schedule: Option<String>,
    pub max_capacity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentCondition {
    Good,
    NeedsService,
    OutOfOrder,
}

impl std::fmt::Display for EquipmentCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::NeedsService => write!(f, "needs_service"),
            Self::OutOfOrder => write!(f, "out_of_order"),
        }
    }
}

impl std::str::FromStr for EquipmentCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "needs_service" => Ok(Self::NeedsService),
            "out_of_order" => Ok(Self::OutOfOrder),
            _ => Err(format!("Unknown equipment condition: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub condition: String,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEquipmentRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default = "default_condition")]
    pub condition: String,
}

fn default_quantity() -> i64 {
    1
}

fn default_condition() -> String {
    EquipmentCondition::Good.to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateEquipmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub condition: Option<String>,
}
