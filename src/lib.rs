pub mod auth;
pub mod config;
pub mod dates;
pub mod engine;
pub mod kvlog;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod reminder;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wire;
