//! Ordered clip concatenation with a re-encode fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::toolkit::MediaToolkit;

/// How the final file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatStrategy {
    /// One input, copied byte for byte
    SingleCopy,
    /// Concat demuxer without re-encoding
    StreamCopy,
    /// Normalizing re-encode after a codec mismatch
    Reencode,
}

impl ConcatStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatStrategy::SingleCopy => "single_copy",
            ConcatStrategy::StreamCopy => "stream_copy",
            ConcatStrategy::Reencode => "reencode",
        }
    }
}

/// Result of a successful concat.
#[derive(Debug, Clone)]
pub struct ConcatOutcome {
    pub output: PathBuf,
    pub strategy: ConcatStrategy,
    /// Fast-path failure that triggered the fallback
    pub fallback_reason: Option<String>,
}

/// Joins segment files in order.
#[derive(Clone)]
pub struct Concatenator {
    toolkit: Arc<dyn MediaToolkit>,
}

impl Concatenator {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    /// Concatenate `inputs` into `output`.
    ///
    /// Stream copy is tried first. Only a codec-mismatch failure falls back
    /// to re-encoding; every other failure is returned unchanged.
    pub async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<ConcatOutcome> {
        match inputs {
            [] => Err(MediaError::NoInputs),
            [single] => {
                self.toolkit.copy_file(single, output).await?;
                Ok(ConcatOutcome {
                    output: output.to_path_buf(),
                    strategy: ConcatStrategy::SingleCopy,
                    fallback_reason: None,
                })
            }
            _ => match self.toolkit.concat_copy(inputs, output).await {
                Ok(()) => Ok(ConcatOutcome {
                    output: output.to_path_buf(),
                    strategy: ConcatStrategy::StreamCopy,
                    fallback_reason: None,
                }),
                Err(e) if e.is_codec_mismatch() => {
                    let reason = e.detail();
                    warn!(
                        inputs = inputs.len(),
                        "Stream-copy concat hit a codec mismatch, re-encoding: {}", reason
                    );
                    self.toolkit.concat_reencode(inputs, output).await?;
                    info!(inputs = inputs.len(), output = %output.display(), "Concat fallback succeeded");
                    Ok(ConcatOutcome {
                        output: output.to_path_buf(),
                        strategy: ConcatStrategy::Reencode,
                        fallback_reason: Some(reason),
                    })
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeFailure, FakeToolkit, ToolkitCall};
    use tempfile::TempDir;

    async fn write_inputs(dir: &TempDir, n: usize) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for i in 1..=n {
            let p = dir.path().join(format!("seg-{:02}.mp4", i));
            tokio::fs::write(&p, format!("clip-{}", i)).await.unwrap();
            paths.push(p);
        }
        paths
    }

    #[tokio::test]
    async fn test_zero_inputs() {
        let dir = TempDir::new().unwrap();
        let concat = Concatenator::new(Arc::new(FakeToolkit::new()));
        let err = concat.concat(&[], &dir.path().join("final.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::NoInputs));
    }

    #[tokio::test]
    async fn test_single_input_is_byte_identical_copy() {
        let dir = TempDir::new().unwrap();
        let inputs = write_inputs(&dir, 1).await;
        let fake = Arc::new(FakeToolkit::new());
        let concat = Concatenator::new(fake.clone());
        let output = dir.path().join("final.mp4");

        let outcome = concat.concat(&inputs, &output).await.unwrap();
        assert_eq!(outcome.strategy, ConcatStrategy::SingleCopy);
        assert_eq!(
            tokio::fs::read(&inputs[0]).await.unwrap(),
            tokio::fs::read(&output).await.unwrap()
        );
        assert!(fake
            .calls()
            .iter()
            .all(|c| !matches!(c, ToolkitCall::ConcatCopy { .. } | ToolkitCall::ConcatReencode { .. })));
    }

    #[tokio::test]
    async fn test_compatible_inputs_use_stream_copy() {
        let dir = TempDir::new().unwrap();
        let inputs = write_inputs(&dir, 3).await;
        let fake = Arc::new(FakeToolkit::new());
        let concat = Concatenator::new(fake.clone());

        let outcome = concat.concat(&inputs, &dir.path().join("final.mp4")).await.unwrap();
        assert_eq!(outcome.strategy, ConcatStrategy::StreamCopy);
        assert_eq!(fake.calls(), vec![ToolkitCall::ConcatCopy { inputs: inputs.clone() }]);
    }

    #[tokio::test]
    async fn test_codec_mismatch_falls_back_to_reencode() {
        let dir = TempDir::new().unwrap();
        let inputs = write_inputs(&dir, 2).await;
        let fake = Arc::new(FakeToolkit::new().fail_concat_copy(FakeFailure::CodecMismatch));
        let concat = Concatenator::new(fake.clone());

        let outcome = concat.concat(&inputs, &dir.path().join("final.mp4")).await.unwrap();
        assert_eq!(outcome.strategy, ConcatStrategy::Reencode);
        assert!(outcome.fallback_reason.is_some());
        assert_eq!(
            fake.calls(),
            vec![
                ToolkitCall::ConcatCopy { inputs: inputs.clone() },
                ToolkitCall::ConcatReencode { inputs: inputs.clone() },
            ]
        );
    }

    #[tokio::test]
    async fn test_other_failures_do_not_fall_back() {
        let dir = TempDir::new().unwrap();
        let inputs = write_inputs(&dir, 2).await;
        let fake = Arc::new(FakeToolkit::new().fail_concat_copy(FakeFailure::Other));
        let concat = Concatenator::new(fake.clone());

        let err = concat.concat(&inputs, &dir.path().join("final.mp4")).await.unwrap_err();
        assert!(!err.is_codec_mismatch());
        assert_eq!(fake.calls().len(), 1);
    }
}
