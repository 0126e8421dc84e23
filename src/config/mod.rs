mod deploy;
mod server;

pub use deploy::{DeployConfig, Timeouts};
pub use server::ServerConfig;
