pub mod types;
pub mod config;
pub mod error;
pub mod signer;
pub mod registry;
pub mod pending;
pub mod broker;
pub mod spy;
pub mod channels;

pub use types::*;
pub use config::*;
pub use error::*;
pub use signer::*;
