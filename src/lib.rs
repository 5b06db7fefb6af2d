pub mod affiliate;
pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod models;
pub mod rate_limit;
pub mod redirect;
pub mod storage;
pub mod tracking;
