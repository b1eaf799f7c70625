pub mod app;
pub mod audit;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod kb;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod resolver;
