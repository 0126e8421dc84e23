//! Compose documents for sites and their generation.

pub mod document;
mod generator;

pub use document::TopologyDocument;
pub use generator::{
    ImageProbe, PERFORMANCE_INI, PERFORMANCE_INI_CONTENT, SUPPORTED_PHP_VERSIONS,
    TopologyGenerator, WORDPRESS_MAX_PHP, clamp_wordpress_php, validate_php_version,
};
