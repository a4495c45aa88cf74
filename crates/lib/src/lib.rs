//! cairn-lib: Core of the cairn infrastructure orchestrator
//!
//! This crate provides everything between a parsed project and the real
//! world:
//! - `scope`: evaluates the project tree into a resource graph, resolving
//!   references in any declaration order
//! - `diff`: compares persisted resources against the evaluated ones
//! - `execute`: applies changes in dependency order through providers
//! - `workflow`: staged, resumable replacement of resources
//! - `state`: persisted resources, file backends and the state lock

pub mod apply;
pub mod config;
pub mod consts;
pub mod context;
pub mod diff;
pub mod diffable;
pub mod execute;
pub mod providers;
pub mod scope;
pub mod state;
pub mod ui;
pub mod value;
pub mod workflow;
