//! Core of the resource tree: model, storage and the three engines

pub mod access;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod icon;
pub mod identity;
pub mod ids;
pub mod node;
pub mod path;
pub mod permission;
pub mod query;
pub mod registry;
pub mod role;
pub mod store;
pub mod tree;
pub mod validation;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;
