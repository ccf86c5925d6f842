pub mod configuration;
pub mod db;
pub mod forms;
pub mod helpers;
mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod services;
pub mod startup;
pub mod streaming;
pub mod telemetry;
pub mod webhooks;
pub mod workers;
