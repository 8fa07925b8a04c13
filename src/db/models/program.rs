//! Workout programs and their exercises.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkoutProgram {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub level: String,
    pub duration_weeks: i64,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exercise {
    pub id: String,
    pub program_id: String,
    pub position: i64,
    pub name: String,
    pub sets: i64,
    pub reps: i64,
    pub rest_seconds: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramWithExercises {
    #[serde(flatten)]
    pub program: WorkoutProgram,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExercise {
    /// Row index the client submitted; absent for JSON arrays
    #[serde(default)]
    pub index: Option<usize>,
    pub name: String,
    #[serde(default = "default_sets")]
    pub sets: i64,
    #[serde(default = "default_reps")]
    pub reps: i64,
    pub rest_seconds: Option<i64>,
}

fn default_sets() -> i64 {
    3
}

fn default_reps() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct CreateProgramRequest {
    pub name: String,
    pub goal: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_duration_weeks")]
    pub duration_weeks: i64,
    pub description: Option<String>,
    #[serde(default)]
    pub exercises: Vec<NewExercise>,
}

fn default_level() -> String {
    "beginner".to_string()
}

fn default_duration_weeks() -> i64 {
    4
}

/// `exercises`, when present, replaces the program's exercise list
#[derive(Debug, Deserialize)]
pub struct UpdateProgramRequest {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub level: Option<String>,
    pub duration_weeks: Option<i64>,
    pub description: Option<String>,
    pub exercises: Option<Vec<NewExercise>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExerciseRequest {
    pub name: Option<String>,
    pub sets: Option<i64>,
    pub reps: Option<i64>,
    pub rest_seconds: Option<i64>,
}
