//! Database models split into domain-specific modules.

pub mod booking;
pub mod catalog;
pub mod common;
pub mod diet_plan;
pub mod membership;
pub mod program;
pub mod progress;
pub mod user;

pub use booking::*;
pub use catalog::*;
pub use common::*;
pub use diet_plan::*;
pub use membership::*;
pub use program::*;
pub use progress::*;
pub use user::*;
