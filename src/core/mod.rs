//! Core modules: change and verdict types, the pipeline, plan lifecycle,
//! checkpoints, and the store/broker plumbing they share.

pub mod broker;
pub mod change;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod plan_store;
pub mod registry;
pub mod schemas;
pub mod store;
pub mod time;
pub mod trace;
pub mod vcs;
