pub mod config;
pub mod domain;
pub mod error;

pub use config::BillingConfig;
pub use error::{BillingError, Result};
