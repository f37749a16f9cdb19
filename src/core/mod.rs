// src/core/mod.rs — Core iteration engine

pub mod applier;
pub mod convergence;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod types;
pub mod validator;
