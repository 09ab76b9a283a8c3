//! Poll scheduling.

pub mod service;

pub use service::{
    ChannelOutcome, ChannelReport, ChannelSummary, CycleReport, OrchestratorConfig,
    PollOrchestrator,
};
