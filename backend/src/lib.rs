pub mod classifier;
pub mod config;
pub mod routes;
pub mod tasks;
pub mod trials;
pub mod views;
