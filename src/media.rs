use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::{
    errors::{Result, SegMaskError},
    traits::MediaAdapter,
    types::{EncodeSettings, Frame, MediaAsset, MediaKind, OutputMedia},
};

const SOURCE_PREFIX: &str = "frame";
const MASKED_PREFIX: &str = "masked_frame";
/// yuv420p subsamples chroma 2x2, so libx264 rejects odd widths and heights.
const EVEN_DIMENSIONS: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// Settings for [`FfmpegMedia`].
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Zero-padding width of frame file names. Indices wider than this are
    /// written and read at their natural width, never truncated.
    pub frame_digits: usize,
    pub keep_workspace: bool,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            frame_digits: 3,
            keep_workspace: false,
        }
    }
}

/// [`MediaAdapter`] that shells out to `ffmpeg`/`ffprobe` and keeps frames as PNG
/// files in a temporary workspace.
#[derive(Debug)]
pub struct FfmpegMedia {
    options: FfmpegOptions,
    workspace: Option<TempDir>,
}

impl FfmpegMedia {
    pub const fn new(options: FfmpegOptions) -> Self {
        Self {
            options,
            workspace: None,
        }
    }

    /// Directory holding the current run's frames, if extraction has started.
    pub fn workspace_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(TempDir::path)
    }

    fn require_workspace(&self) -> Result<&Path> {
        self.workspace_dir()
            .ok_or_else(|| SegMaskError::extraction("frames have not been extracted"))
    }

    fn frame_path(&self, prefix: &str, index: usize) -> Result<PathBuf> {
        Ok(self
            .require_workspace()?
            .join(frame_file_name(prefix, index, self.options.frame_digits)))
    }

    fn sequence_pattern(&self, workspace: &Path, prefix: &str) -> PathBuf {
        workspace.join(format!(
            "{}_%0{}d.png",
            prefix, self.options.frame_digits
        ))
    }

    fn run_tool(&self, tool: &Path, operation: &str, command: &mut Command) -> Result<Output> {
        tracing::debug!("Running {:?}", command);
        let output = command.output().map_err(|e| SegMaskError::MediaTool {
            tool: tool.display().to_string(),
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(SegMaskError::MediaTool {
                tool: tool.display().to_string(),
                operation: operation.to_string(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output)
    }
}

impl Default for FfmpegMedia {
    fn default() -> Self {
        Self::new(FfmpegOptions::default())
    }
}

impl MediaAdapter for FfmpegMedia {
    fn probe(&mut self, asset: &MediaAsset) -> Result<Option<String>> {
        let ffprobe = self.options.ffprobe.clone();
        let output = self.run_tool(
            &ffprobe,
            "probe",
            Command::new(&ffprobe)
                .args(["-v", "error", "-select_streams", "v:0"])
                .args(["-show_entries", "stream=r_frame_rate,avg_frame_rate"])
                .args(["-of", "json"])
                .arg(asset.path()),
        )?;
        Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn extract_frames(&mut self, asset: &MediaAsset, quality: u32) -> Result<()> {
        self.release();
        let workspace = tempfile::Builder::new()
            .prefix("segmask-")
            .tempdir()
            .map_err(|e| SegMaskError::FileSystem {
                path: std::env::temp_dir(),
                operation: "create frame workspace".to_string(),
                source: e,
            })?;
        let pattern = self.sequence_pattern(workspace.path(), SOURCE_PREFIX);
        self.workspace = Some(workspace);

        let ffmpeg = self.options.ffmpeg.clone();
        self.run_tool(
            &ffmpeg,
            "frame extraction",
            Command::new(&ffmpeg)
                .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
                .arg(asset.path())
                .arg("-qscale:v")
                .arg(quality.to_string())
                .arg(&pattern),
        )?;
        Ok(())
    }

    fn frame_count(&self) -> Result<Option<usize>> {
        let workspace = self.require_workspace()?;
        let indices: BTreeSet<usize> = WalkDir::new(workspace)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|name| parse_frame_index(SOURCE_PREFIX, name))
            })
            .collect();

        // Only a gap-free run starting at 1 counts.
        let count = (1..).take_while(|i| indices.contains(i)).count();
        Ok(Some(count))
    }

    fn frame_exists(&self, index: usize) -> bool {
        self.frame_path(SOURCE_PREFIX, index)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let path = self.frame_path(SOURCE_PREFIX, index)?;
        let image = image::open(&path).map_err(|e| SegMaskError::ImageProcessing {
            path: path.display().to_string(),
            operation: "decode frame".to_string(),
            source: Box::new(e),
        })?;
        Ok(Frame::new(index, image.into_rgba8()))
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self.frame_path(MASKED_PREFIX, frame.index)?;
        frame
            .image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| SegMaskError::ImageProcessing {
                path: path.display().to_string(),
                operation: "store masked frame".to_string(),
                source: Box::new(e),
            })
    }

    fn encode(
        &mut self,
        frame_count: usize,
        settings: &EncodeSettings,
        output: &Path,
    ) -> Result<OutputMedia> {
        let workspace = self
            .workspace_dir()
            .ok_or_else(|| {
                SegMaskError::encoding("locate masked frames", "frames have not been extracted")
            })?
            .to_path_buf();
        let pattern = self.sequence_pattern(&workspace, MASKED_PREFIX);
        ensure_parent_dir(output)?;

        let ffmpeg = self.options.ffmpeg.clone();
        self.run_tool(
            &ffmpeg,
            "encode",
            Command::new(&ffmpeg)
                .args(["-hide_banner", "-loglevel", "error", "-y"])
                .arg("-framerate")
                .arg(settings.frame_rate.to_string())
                .args(["-start_number", "1", "-i"])
                .arg(&pattern)
                .arg("-frames:v")
                .arg(frame_count.to_string())
                .args(["-vf", EVEN_DIMENSIONS])
                .arg("-c:v")
                .arg(&settings.codec)
                .arg("-pix_fmt")
                .arg(&settings.pixel_format)
                .arg(output),
        )
        .map_err(|e| SegMaskError::encoding(format!("encode {}", output.display()), e))?;

        Ok(OutputMedia {
            path: output.to_path_buf(),
            kind: MediaKind::Video,
            frame_count,
            frame_rate: Some(settings.frame_rate),
        })
    }

    fn read_image(&self, asset: &MediaAsset) -> Result<Frame> {
        let image = image::open(asset.path()).map_err(|e| SegMaskError::ImageProcessing {
            path: asset.path().display().to_string(),
            operation: "decode image".to_string(),
            source: Box::new(e),
        })?;
        Ok(Frame::new(1, image.into_rgba8()))
    }

    fn write_image(&mut self, frame: &Frame, output: &Path) -> Result<OutputMedia> {
        let format = ImageFormat::from_path(output).unwrap_or(ImageFormat::Png);
        let image = DynamicImage::ImageRgba8(frame.image.clone());
        // JPEG has no alpha channel.
        let image = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.into_rgb8()),
            _ => image,
        };

        ensure_parent_dir(output)?;
        image
            .save_with_format(output, format)
            .map_err(|e| SegMaskError::encoding(format!("save {}", output.display()), e))?;

        Ok(OutputMedia {
            path: output.to_path_buf(),
            kind: MediaKind::Image,
            frame_count: 1,
            frame_rate: None,
        })
    }

    fn release(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            if self.options.keep_workspace {
                let path = workspace.keep();
                tracing::info!("Keeping frame workspace at {}", path.display());
            } else if let Err(e) = workspace.close() {
                tracing::warn!("Failed to remove frame workspace: {}", e);
            }
        }
    }
}

fn ensure_parent_dir(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SegMaskError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;
    }
    Ok(())
}

/// `frame_file_name("frame", 7, 3)` is `frame_007.png`; `1000` stays `frame_1000.png`.
pub fn frame_file_name(prefix: &str, index: usize, digits: usize) -> String {
    format!("{}_{:0width$}.png", prefix, index, width = digits)
}

fn parse_frame_index(prefix: &str, file_name: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".png")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Pull the frame-rate rational out of `ffprobe -of json` output.
///
/// `r_frame_rate` is preferred; `0/0` means ffprobe could not tell.
pub fn parse_probe_output(json: &str) -> Option<String> {
    let parsed: ProbeOutput = serde_json::from_str(json).ok()?;
    let stream = parsed.streams.into_iter().next()?;
    [stream.r_frame_rate, stream.avg_frame_rate]
        .into_iter()
        .flatten()
        .find(|rate| rate.trim() != "0/0" && !rate.trim().is_empty())
}
