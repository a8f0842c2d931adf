pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod parser;
pub mod provider;
pub mod providers;
pub mod request;
pub mod resolver;
pub mod stream;
pub mod telemetry;
