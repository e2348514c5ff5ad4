pub mod checkpoints;
pub mod clean;
pub mod config;
pub mod prune;
pub mod subject;
