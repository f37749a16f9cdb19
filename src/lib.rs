// src/lib.rs — Library root for ampsizer

pub mod analysis;
pub mod cli;
pub mod core;
pub mod infra;
pub mod provider;
pub mod sim;
pub mod store;
pub mod util;
