pub mod alerts;
pub mod cloud;
pub mod config;
pub mod control;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod models;
pub mod monitor;
pub mod reading_cache;
pub mod simulator;
