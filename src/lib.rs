pub mod auth;
pub mod configuration;
pub mod database;
pub mod errors;
pub mod oauth;
pub mod routes;
pub mod tasks;
pub mod utilities;
pub mod webhook;
