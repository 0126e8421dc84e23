//! # Dockhand
//!
//! A self-hosted control plane that turns site descriptions into running
//! container topologies: WordPress, plain PHP and Laravel sites routed by a
//! label-driven reverse proxy, and standalone database instances.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dockhand::config::ServerConfig;
//! use dockhand::deploy::{DockerCli, Orchestrator};
//! use dockhand::server::{AppState, create_router};
//! use dockhand::store::SqliteStore;
//!
//! let config = ServerConfig::default();
//! let store = Arc::new(SqliteStore::new(&config.db_path())?);
//! store.initialize()?;
//!
//! let runtime = Arc::new(DockerCli::new(
//!     config.deploy.timeouts.clone(),
//!     tokio::runtime::Handle::current(),
//! ));
//! let orchestrator = Orchestrator::with_default_source(store, runtime, config.deploy.clone());
//! let router = create_router(Arc::new(AppState::new(orchestrator)));
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): builds the `dockhand` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod deploy;
pub mod error;
pub mod server;
pub mod store;
pub mod types;
