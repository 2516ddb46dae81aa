pub mod analysis;
pub mod directory;
pub mod error;
pub mod finetune;
pub mod handler_utils;
pub mod models;
pub mod routes;
pub mod server;
pub mod testing;
