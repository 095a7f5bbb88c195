//! Food validation service
//!
//! Accepts food photos over HTTP, queues them in Redis and classifies them
//! against vegetarian, Swaminarayan, Jain, vegan and Upvas dietary rules with
//! a vision-capable language model. The gateway (`food-validator`) and the
//! `worker` binary share this library.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
