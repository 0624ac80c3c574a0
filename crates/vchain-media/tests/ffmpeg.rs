//! FFmpeg integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::process::Command;

use vchain_media::{probe_video, ConcatStrategy, Concatenator, FfmpegToolkit, FrameExtractor};

/// Render a short synthetic clip with `ffmpeg -f lavfi`.
async fn render_clip(path: &Path, color: &str, with_audio: bool, codec: &str) {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
        .args(["-f", "lavfi", "-i", &format!("color=c={}:s=320x180:r=30:d=2", color)]);
    if with_audio {
        cmd.args(["-f", "lavfi", "-i", "sine=frequency=440:duration=2"]);
    }
    cmd.args(["-c:v", codec, "-pix_fmt", "yuv420p"]);
    if with_audio {
        cmd.args(["-c:a", "aac", "-shortest"]);
    }
    cmd.arg(path);
    let status = cmd.status().await.expect("Failed to spawn ffmpeg");
    assert!(status.success(), "ffmpeg could not render {}", path.display());
}

async fn clips(dir: &TempDir, specs: &[(&str, bool, &str)]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for (i, (color, audio, codec)) in specs.iter().enumerate() {
        let path = dir.path().join(format!("seg-{:02}.mp4", i + 1));
        render_clip(&path, color, *audio, codec).await;
        paths.push(path);
    }
    paths
}

/// Test last-frame extraction on a real clip.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_extract_last_frame() {
    let dir = TempDir::new().unwrap();
    let inputs = clips(&dir, &[("red", true, "libx264")]).await;

    let extractor = FrameExtractor::new(Arc::new(FfmpegToolkit::new()));
    let frame = extractor.extract_last_frame(&inputs[0]).await.unwrap();

    let bytes = tokio::fs::read(&frame).await.unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8], "frame is a JPEG");
}

/// Test stream-copy concat of compatible clips.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_concat_compatible_clips() {
    let dir = TempDir::new().unwrap();
    let inputs = clips(&dir, &[("red", true, "libx264"), ("blue", true, "libx264")]).await;
    let output = dir.path().join("final.mp4");

    let outcome = Concatenator::new(Arc::new(FfmpegToolkit::new()))
        .concat(&inputs, &output)
        .await
        .unwrap();

    assert_eq!(outcome.strategy, ConcatStrategy::StreamCopy);
    let info = probe_video(&output).await.unwrap();
    assert!((info.duration - 4.0).abs() < 0.5, "duration was {}", info.duration);
}

/// Test the re-encode fallback on clips with different codecs and audio layouts.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_concat_mismatched_clips() {
    let dir = TempDir::new().unwrap();
    let inputs = clips(&dir, &[("green", true, "libx264"), ("white", false, "mpeg4")]).await;
    let output = dir.path().join("final.mp4");

    let outcome = Concatenator::new(Arc::new(FfmpegToolkit::new()))
        .concat(&inputs, &output)
        .await
        .unwrap();

    println!("Concat strategy: {:?} ({:?})", outcome.strategy, outcome.fallback_reason);
    let info = probe_video(&output).await.unwrap();
    assert!(info.duration > 3.0);
}
