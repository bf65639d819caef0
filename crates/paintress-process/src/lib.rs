//! Process management for the agent and git subcommands: spawning,
//! merged-stream capture, timeout, and group kill.

pub mod git;
pub mod stream;

pub use git::{GitRunner, SystemGit};
pub use stream::{
    check_agent_installed, spawn_agent, stream_to_sinks, AgentExit, ChunkSink, StreamedOutput,
};
