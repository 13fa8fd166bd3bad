#[macro_use]
extern crate tracing;

pub mod actions;
pub mod auth;
pub mod color;
pub mod config;
pub mod controller;
pub mod events;
pub mod hub;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod utils;
pub mod web;
