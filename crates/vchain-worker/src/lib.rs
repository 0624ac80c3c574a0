//! Chained video generation worker.
//!
//! This crate provides:
//! - Segment planning through an LLM (OpenAI or Gemini)
//! - Sequential segment generation with last-frame continuity
//! - Chain orchestration with a retry-once failure policy
//! - Terminal-state notifications and work directory reclaim
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod planner;
pub mod poll;
pub mod reclaim;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod video_api;

pub use config::{OpenAiConfig, PlannerConfig, PlannerProvider, PollConfig, WorkerConfig};
pub use error::{ChainError, WorkerResult};
pub use gemini::GeminiClient;
pub use generator::{chain_progress, ContinuitySegmentGenerator, GenerationConfig, SegmentObserver, SegmentTask};
pub use llm::{OpenAiChatClient, PlanningLlm};
pub use logging::ChainLogger;
pub use notifier::{ChainEvent, ChainNotifier, NoopNotifier, WebhookNotifier};
pub use orchestrator::{ChainDeps, ChainOrchestrator};
pub use planner::SegmentPlanner;
pub use poll::{PollTicker, Tick};
pub use reclaim::DiskReclaimer;
pub use video_api::{OpenAiVideoClient, VideoGenerationApi};
