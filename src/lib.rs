pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod source;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wire;
