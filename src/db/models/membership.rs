//! Membership models.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MembershipPlan {
    Monthly,
    Quarterly,
    Annual,
}

impl MembershipPlan {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Monthly => Duration::days(30),
            Self::Quarterly => Duration::days(90),
            Self::Annual => Duration::days(365),
        }
    }

    pub fn price_cents(&self) -> i64 {
        match self {
            Self::Monthly => 4_999,
            Self::Quarterly => 13_499,
            Self::Annual => 47_999,
        }
    }

    pub fn end_date(&self, start: NaiveDate) -> NaiveDate {
        start + self.duration()
    }
}

impl std::fmt::Display for MembershipPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Quarterly => write!(f, "quarterly"),
            Self::Annual => write!(f, "annual"),
        }
    }
}

impl std::str::FromStr for MembershipPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "annual" | "yearly" => Ok(Self::Annual),
            _ => Err(format!("Unknown membership plan: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Cancelled,
    Expired,
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown membership status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub status: String,
    pub start_date: String,
    pub end_date: String,
    pub price_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Customers subscribe themselves; managers may name the user
#[derive(Debug, Deserialize)]
pub struct CreateMembershipRequest {
    pub plan: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMembershipRequest {
    pub plan: Option<String>,
    pub status: Option<String>,
}
