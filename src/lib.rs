pub mod acl;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use error::{RustAclError, Result};
pub use config::Config;
