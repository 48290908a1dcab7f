pub mod auth;
pub mod configuration;
pub mod deadline;
pub mod error;
pub mod logger;
pub mod memory;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod startup;
pub mod telemetry;
pub mod users;
pub mod validators;
