//! Built-in applications.
//!
//! Each application is a [`Handler`] selected by name at startup:
//! - `carstore`: car records keyed by serial number (get/save/delete)
//! - `echo`: returns the request document unchanged

pub mod carstore;
pub mod echo;

use crate::config::ConfigError;
use crate::runtime::Handler;

/// Names accepted by [`resolve`].
pub const NAMES: &[&str] = &["carstore", "echo"];

/// Look up a handler by its configured name.
pub fn resolve(name: &str) -> Result<Box<dyn Handler + Send>, ConfigError> {
    match name {
        "carstore" => Ok(Box::new(carstore::CarStore::new())),
        "echo" => Ok(Box::new(echo::Echo)),
        _ => Err(ConfigError::UnknownHandler(name.to_string())),
    }
}
