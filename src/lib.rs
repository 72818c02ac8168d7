pub mod app;
pub mod config;
pub mod country;
pub mod docstore;
pub mod domain;
pub mod error;
pub mod mongo;
pub mod output;
pub mod resolver;
pub mod scheduler;
pub mod sdmx;
pub mod store;
pub mod unsd;
pub mod upsert;
