pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod sse;
pub mod upstream;
