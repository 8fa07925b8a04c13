//! User, preference and login models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::Session;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

/// Stored inputs for recommendations
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct UserPreferences {
    pub user_id: String,
    pub fitness_goal: Option<String>,
    pub preferred_specialty: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesRequest {
    pub fitness_goal: Option<String>,
    pub preferred_specialty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub fitness_goal: Option<String>,
    #[serde(default)]
    pub preferred_specialty: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub session: Session,
}
