//! Infrastructure layer: event stores, command dispatch, read models,
//! the projector and configuration.

pub mod command_dispatcher;
pub mod config;
pub mod db;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
