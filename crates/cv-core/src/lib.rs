pub mod config;
pub mod error;
pub mod types;

pub use config::VaultConfig;
pub use error::{CoreError, CoreResult};
pub use types::{Expiry, Permission, RequestId};
