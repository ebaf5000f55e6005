pub mod config;
pub mod event;
pub mod feed;
pub mod logging;
pub mod monitor;
pub mod store;
