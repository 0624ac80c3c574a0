//! Structured chain logging utilities.
//!
//! Provides consistent, structured logging for chain processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vchain_models::{ChainId, ChainStatus};

/// Chain logger with the chain id and current stage attached to every line.
#[derive(Debug, Clone)]
pub struct ChainLogger {
    chain_id: String,
    stage: &'static str,
}

impl ChainLogger {
    /// Create a logger for a chain, starting in its current status.
    pub fn new(chain_id: &ChainId, status: ChainStatus) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            stage: status.as_str(),
        }
    }

    /// Switch to a new pipeline stage and log the transition.
    pub fn enter(&mut self, status: ChainStatus) {
        info!(
            chain_id = %self.chain_id,
            from = self.stage,
            to = status.as_str(),
            "Chain stage changed"
        );
        self.stage = status.as_str();
    }

    /// Log the start of chain processing.
    pub fn log_start(&self, message: &str) {
        info!(chain_id = %self.chain_id, stage = self.stage, "Chain started: {}", message);
    }

    /// Log a progress update.
    pub fn log_progress(&self, message: &str) {
        info!(chain_id = %self.chain_id, stage = self.stage, "Chain progress: {}", message);
    }

    /// Log a tolerated problem.
    pub fn log_warning(&self, message: &str) {
        warn!(chain_id = %self.chain_id, stage = self.stage, "Chain warning: {}", message);
    }

    /// Log a failure.
    pub fn log_error(&self, message: &str) {
        error!(chain_id = %self.chain_id, stage = self.stage, "Chain error: {}", message);
    }

    /// Log successful completion.
    pub fn log_completion(&self, message: &str) {
        info!(chain_id = %self.chain_id, stage = self.stage, "Chain completed: {}", message);
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Create a tracing span for this chain.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("chain", chain_id = %self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_logger_tracks_stage() {
        let id = ChainId::from_string("chain-123");
        let mut logger = ChainLogger::new(&id, ChainStatus::Queued);
        assert_eq!(logger.chain_id(), "chain-123");
        assert_eq!(logger.stage(), "queued");

        logger.enter(ChainStatus::Planning);
        assert_eq!(logger.stage(), "planning");
    }
}
