pub mod access;
mod helpers;
mod middleware;
mod token;

pub use access::{can_access_site, can_create_sites};
pub use middleware::{AuthError, RequireAdmin, RequireAuth, RequireUser};
pub use token::{IssuedToken, RawToken, TokenGenerator};
