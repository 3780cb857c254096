//! Domain models for the storefront.

pub mod session;
pub mod user;
pub mod verse;

pub use session::{CurrentUser, keys as session_keys};
pub use user::User;
pub use verse::Verse;
