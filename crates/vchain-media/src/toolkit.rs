//! Narrow media interface used by the chain pipeline, and its FFmpeg
//! implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils;
use crate::probe::{probe_video, VideoInfo};

/// Media operations the chain pipeline needs.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Decode one frame near the end of `video` into a JPEG at `output`.
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> MediaResult<()>;

    /// Join same-codec files by stream copy.
    async fn concat_copy(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()>;

    /// Join heterogeneous files through a normalizing re-encode.
    async fn concat_reencode(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()>;

    /// Duration of a clip in seconds.
    async fn duration(&self, video: &Path) -> MediaResult<f64>;

    /// Plain byte copy.
    async fn copy_file(&self, src: &Path, dst: &Path) -> MediaResult<()> {
        fs_utils::copy_file(src, dst).await
    }
}

/// Output settings for the re-encode fallback.
#[derive(Debug, Clone)]
pub struct ReencodeProfile {
    pub fps: u32,
    pub video_codec: String,
    pub crf: u8,
    pub preset: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
}

impl Default for ReencodeProfile {
    fn default() -> Self {
        Self {
            fps: 30,
            video_codec: "libx264".to_string(),
            crf: 18,
            preset: "medium".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 48_000,
        }
    }
}

/// FFmpeg-backed [`MediaToolkit`].
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    /// Seconds before end-of-stream to seek for the continuity frame
    pub last_frame_offset_secs: f64,
    /// JPEG quality scale (2 = high)
    pub jpeg_quality: u8,
    pub reencode: ReencodeProfile,
    /// Per-command timeout
    pub timeout_secs: u64,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            last_frame_offset_secs: 0.1,
            jpeg_quality: 2,
            reencode: ReencodeProfile::default(),
            timeout_secs: 900,
        }
    }
}

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.timeout_secs)
    }

    /// Command that grabs one frame shortly before the end of `video`.
    pub fn last_frame_command(&self, video: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(video, output)
            .seek_from_end(self.last_frame_offset_secs)
            .single_frame()
            .output_arg("-q:v")
            .output_arg(self.jpeg_quality.to_string())
            .output_arg("-update")
            .output_arg("1")
    }

    /// Concat-demuxer stream copy driven by a list file.
    pub fn concat_copy_command(&self, list_file: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(list_file, output)
            .input_args(["-f", "concat", "-safe", "0"])
            .codec_copy()
            .faststart()
            .log_level("warning")
    }

    /// One-pass re-encode joining every input pairwise as `[i:v][i:a]`.
    ///
    /// `inputs` carries each file with its probe result. Inputs without
    /// audio get a silent `anullsrc` input of the same duration so the
    /// concat filter always sees one audio pad per segment.
    pub fn concat_reencode_command(
        &self,
        inputs: &[(PathBuf, VideoInfo)],
        output: &Path,
    ) -> MediaResult<FfmpegCommand> {
        let (first_path, first_info) = inputs.first().ok_or(MediaError::NoInputs)?;
        let profile = &self.reencode;
        let (width, height) = even_dimensions(first_info.width, first_info.height);

        let mut cmd = FfmpegCommand::new(first_path, output);
        for (path, _) in inputs.iter().skip(1) {
            cmd = cmd.add_input(path);
        }

        // Silent audio inputs are appended after the real files.
        let mut audio_pads = Vec::with_capacity(inputs.len());
        let mut next_input = inputs.len();
        for (i, (_, info)) in inputs.iter().enumerate() {
            if info.has_audio() {
                audio_pads.push(format!("{}:a", i));
            } else {
                cmd = cmd
                    .add_lavfi_input(format!(
                        "anullsrc=channel_layout=stereo:sample_rate={}",
                        profile.audio_sample_rate
                    ))
                    .duration(info.duration.max(0.1));
                audio_pads.push(format!("{}:a", next_input));
                next_input += 1;
            }
        }

        let mut graph = String::new();
        for i in 0..inputs.len() {
            graph.push_str(&format!(
                "[{i}:v]fps={fps},scale={w}:{h}:force_original_aspect_ratio=decrease,\
                 pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,format={pix}[v{i}];",
                i = i,
                fps = profile.fps,
                w = width,
                h = height,
                pix = profile.pixel_format,
            ));
            graph.push_str(&format!(
                "[{pad}]aresample={rate},aformat=channel_layouts=stereo[a{i}];",
                pad = audio_pads[i],
                rate = profile.audio_sample_rate,
                i = i,
            ));
        }
        for i in 0..inputs.len() {
            graph.push_str(&format!("[v{i}][a{i}]", i = i));
        }
        graph.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", inputs.len()));

        Ok(cmd
            .filter_complex(graph)
            .map("[outv]")
            .map("[outa]")
            .frame_rate(profile.fps)
            .video_codec(&profile.video_codec)
            .preset(&profile.preset)
            .crf(profile.crf)
            .pixel_format(&profile.pixel_format)
            .audio_codec(&profile.audio_codec)
            .audio_bitrate(&profile.audio_bitrate)
            .faststart())
    }
}

/// libx264 with yuv420p needs even dimensions.
fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    let w = if width == 0 { 1280 } else { width };
    let h = if height == 0 { 720 } else { height };
    (w - w % 2, h - h % 2)
}

/// Body of a concat-demuxer list file.
pub fn concat_list_body(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            // Single quotes inside a quoted path are written as '\''
            let escaped = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Removes the concat list file when dropped.
struct ListFileGuard(PathBuf);

impl Drop for ListFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove concat list {}: {}", self.0.display(), e);
            }
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> MediaResult<()> {
        let info = probe_video(video).await?;
        if info.duration <= 0.0 {
            return Err(MediaError::InvalidVideo(format!(
                "{} has zero duration",
                video.display()
            )));
        }

        let cmd = self.last_frame_command(video, output);
        self.runner().run(&cmd).await?;
        fs_utils::ensure_non_empty(output).await?;

        debug!("Extracted last frame {} -> {}", video.display(), output.display());
        Ok(())
    }

    async fn concat_copy(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }

        let list_path = output.with_extension(format!("{}.concat.txt", uuid::Uuid::new_v4().simple()));
        let _guard = ListFileGuard(list_path.clone());
        tokio::fs::write(&list_path, concat_list_body(inputs)).await?;

        let cmd = self.concat_copy_command(&list_path, output);
        self.runner().run(&cmd).await.map_err(|e| match e {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => MediaError::ffmpeg_failed("Concat failed", stderr, exit_code),
            other => other,
        })?;

        info!(inputs = inputs.len(), output = %output.display(), "Stream-copy concat completed");
        Ok(())
    }

    async fn concat_reencode(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        if inputs.is_empty() {
            return Err(MediaError::NoInputs);
        }

        let mut probed = Vec::with_capacity(inputs.len());
        let mut total_ms = 0i64;
        for path in inputs {
            let info = probe_video(path).await?;
            total_ms += (info.duration * 1000.0) as i64;
            probed.push((path.clone(), info));
        }

        let cmd = self.concat_reencode_command(&probed, output)?;
        self.runner()
            .run_with_progress(&cmd, move |p| {
                debug!("Re-encode concat progress: {:.0}%", p.percentage(total_ms));
            })
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed {
                    stderr, exit_code, ..
                } => MediaError::ffmpeg_failed("Re-encode concat failed", stderr, exit_code),
                other => other,
            })?;

        info!(inputs = inputs.len(), output = %output.display(), "Re-encode concat completed");
        Ok(())
    }

    async fn duration(&self, video: &Path) -> MediaResult<f64> {
        Ok(probe_video(video).await?.duration)
    }
}
