//! Frame-by-frame video decoding
//!
//! The pipelines read frames through [`VideoSource`] so tests can feed
//! in-memory frames. The production source pipes raw RGB24 out of FFmpeg.

use crate::backend::Frame;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// An opened video that yields decoded frames in order
#[async_trait]
pub trait VideoSource: Send {
    /// Next frame, or `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the decoder. Safe to call more than once.
    fn release(&mut self);
}

#[async_trait]
pub trait VideoOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag
    fn rotation(&self) -> i64 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .map(|r| r.round() as i64)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0)
    }
}

/// Probe the size of the frames ffmpeg will emit for the first video stream.
///
/// ffmpeg applies the display rotation while decoding, so a quarter turn
/// swaps the stored width and height.
pub async fn probe_frame_dimensions(path: &Path) -> Result<(u32, u32)> {
    debug!(source = %path.display(), "probing video dimensions");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_dimensions(&output_str)
}

fn parse_dimensions(output: &str) -> Result<(u32, u32)> {
    let probe: ProbeOutput = serde_json::from_str(output).context("unexpected ffprobe output format")?;
    let Some(stream) = probe.streams.first() else {
        bail!("no video stream found");
    };
    if stream.width == 0 || stream.height == 0 {
        bail!("video reports empty frame size {}x{}", stream.width, stream.height);
    }
    if stream.rotation().rem_euclid(180) == 90 {
        Ok((stream.height, stream.width))
    } else {
        Ok((stream.width, stream.height))
    }
}

/// Decodes with an `ffmpeg` child process writing RGB24 to stdout
pub struct FfmpegVideoSource {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
    frame_buf: Vec<u8>,
}

impl FfmpegVideoSource {
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("video file {} does not exist", path.display());
        }
        let (width, height) = probe_frame_dimensions(path).await?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg")?;

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;

        debug!(source = %path.display(), width, height, "video opened");

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            width,
            height,
            frame_buf: vec![0; width as usize * height as usize * 3],
        })
    }
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        match stdout.read_exact(&mut self.frame_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("failed to read frame from ffmpeg"),
        }

        let frame = Frame::from_raw(self.width, self.height, self.frame_buf.clone())
            .context("ffmpeg frame has the wrong size")?;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                // Already exited at end of stream
                debug!(error = %e, "ffmpeg kill skipped");
            }
            match child.try_wait() {
                Ok(Some(status)) if !status.success() => {
                    debug!(?status, "ffmpeg exited");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to reap ffmpeg"),
            }
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct FfmpegVideoOpener;

#[async_trait]
impl VideoOpener for FfmpegVideoOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(FfmpegVideoSource::open(path).await?))
    }
}
