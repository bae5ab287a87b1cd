//! # Execution agents: thread-per-frame loops and worker processes.

mod agent;
pub(crate) mod process;
mod worker;

pub use worker::{register_routine, register_routine_sync, routine_registered, worker_main};

pub(crate) use agent::{start_agent, AgentHandle, AgentSeed};
