pub mod authoring;
pub mod blob;
pub mod catalog;
pub mod category;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod notify;
pub mod progression;
pub mod quiz;
pub mod routes;
pub mod state;
pub mod store;
