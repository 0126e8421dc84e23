mod models;
mod permission;
mod site;

pub use models::*;
pub use permission::Permission;
pub use site::*;
