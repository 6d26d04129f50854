pub mod auth;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod rules;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
