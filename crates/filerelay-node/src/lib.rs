pub mod command;
pub mod error;
pub mod handler;
pub mod registry;
pub mod socket;
pub mod timeout;
pub mod transfer;

pub use error::RelayError;
pub use handler::{RelayConfig, RelayState};
