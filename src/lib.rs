pub mod config;
pub mod credentials;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod refresher;
pub mod rooms;
pub mod upstream;
