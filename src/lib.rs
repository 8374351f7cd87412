//! rtable - a chain-replicated table client
//!
//! Rows are written head to tail along a chain of table stores and read
//! from the tail. The chain layout lives in a configuration replicated by
//! majority quorum across independent blob locations.

pub mod cli;
pub mod configuration;
pub mod observability;
pub mod quorum;
pub mod replica;
pub mod row;
pub mod settings;
pub mod view;
