pub mod anthropic;
pub mod errors;
pub mod openai;

pub use errors::{GatewayError, Result};
