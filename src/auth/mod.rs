//! Identity carried between the browser and the server.

pub mod session;

pub use session::{AuthError, Identity, IssuedSession, Role, Session, SessionCodec};
