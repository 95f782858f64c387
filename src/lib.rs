pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod kafka;
pub mod models;
pub mod processor;
pub mod replica;
pub mod store;
pub mod sweeper;
