pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod snapshot;
pub mod sweeper;
pub mod tenant;
