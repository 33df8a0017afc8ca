// src/lib.rs - Multi-material unit host library
//
// Layer-triggered material changes for a resin printer: a monitor loop
// polls the printer, fires the drain/fill sequence at recipe layers, and
// exposes a command/event surface over HTTP.

pub mod commands;
pub mod config;
pub mod events;
pub mod hardware;
pub mod orchestrator;
pub mod printer;
pub mod recipe;
pub mod sequencer;
pub mod sync;
pub mod web;

pub use config::{Config, load_config};
pub use orchestrator::{LinkFactory, Orchestrator, OrchestratorState, StateSnapshot};
pub use recipe::{Material, Recipe};
