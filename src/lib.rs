pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod guard;
pub mod pages;
pub mod uploads;

pub use db::DbPool;

use config::Config;

use crate::auth::session::SessionCodec;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub sessions: SessionCodec,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let sessions = SessionCodec::new(&config.auth);
        Self {
            config,
            db,
            sessions,
        }
    }
}
