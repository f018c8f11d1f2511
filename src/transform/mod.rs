//! Dialect translation for request bodies, responses and outbound headers.

pub mod headers;
pub mod model;
pub mod request;
pub mod response;

pub use headers::{base_headers, with_credentials};
pub use model::{ensure_stream_usage, rewrite_model_field};
pub use request::{anthropic_to_openai, openai_to_anthropic};
pub use response::{anthropic_to_openai_response, openai_to_anthropic_response};
