//! HTTP front end for the confined script execution pipeline.

pub mod audit;
pub mod cli;
pub mod server;
