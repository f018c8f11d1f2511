pub mod loader;
pub mod models;

pub use loader::load_config;
pub use models::{
    ApiFormat, Channel, ChannelModel, ChannelStatus, Config, GatewayConfig, LoggingConfig,
    ServerConfig, Token, VisibilityMode,
};
