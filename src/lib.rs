// Library for tests to access modules

pub mod aggregation;
pub mod auth;
pub mod config;
pub mod docker_repo;
pub mod error;
pub mod models;
pub mod relay;
pub mod routes;
