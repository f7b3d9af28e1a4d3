//! Remote-shell surface: public-key auth, per-session dispatch, and
//! the Unix-socket tunnel channel type.

pub mod auth;
mod server;
mod session;
mod tunnel;

pub use auth::{Auth, AuthorizedUser, SystemAuth};
pub use server::ShellServer;
pub use session::{SessionClassification, SessionMode};
