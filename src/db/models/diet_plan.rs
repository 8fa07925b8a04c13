//! Diet plans and their meals.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DietPlan {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meal {
    pub id: String,
    pub diet_plan_id: String,
    pub position: i64,
    pub meal: String,
    pub description: Option<String>,
    pub calories: i64,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DietPlanWithMeals {
    #[serde(flatten)]
    pub plan: DietPlan,
    pub meals: Vec<Meal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMeal {
    /// Row index the client submitted; absent for JSON arrays
    #[serde(default)]
    pub index: Option<usize>,
    pub meal: String,
    pub description: Option<String>,
    #[serde(default)]
    pub calories: i64,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDietPlanRequest {
    pub name: String,
    pub goal: String,
    pub description: Option<String>,
    #[serde(default)]
    pub meals: Vec<NewMeal>,
}

/// `meals`, when present, replaces the plan's meal list
#[derive(Debug, Deserialize)]
pub struct UpdateDietPlanRequest {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub description: Option<String>,
    pub meals: Option<Vec<NewMeal>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMealRequest {
    pub meal: Option<String>,
    pub description: Option<String>,
    pub calories: Option<i64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
}
