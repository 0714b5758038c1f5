use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::errors::Result;
use crate::media::FfmpegOptions;
use crate::pipeline::PipelineOptions;
use crate::types::{
    BackgroundColor, CompositeParameters, Interpolation, MediaAsset, MediaKind, ModelOverrides,
    MAX_THRESHOLD, MIN_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KindSelection {
    /// Decide by file extension
    #[default]
    Auto,
    Image,
    Video,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image or video to process
    pub input: PathBuf,

    /// Output file. Defaults to `<input stem>_masked.mp4` or `<input stem>_masked.png`
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(short, long)]
    pub model_path: PathBuf,

    /// Foreground probability cut-off
    #[arg(short, long, default_value_t = 0.5, value_parser = check_threshold)]
    pub threshold: f32,

    #[arg(short, long, value_enum, default_value_t = BackgroundColor::Green)]
    pub color: BackgroundColor,

    #[arg(long, value_enum, default_value_t = KindSelection::Auto)]
    pub kind: KindSelection,

    #[arg(long)]
    pub model_width: Option<u32>,

    #[arg(long)]
    pub model_height: Option<u32>,

    #[arg(long)]
    pub input_name: Option<String>,

    #[arg(long)]
    pub output_name: Option<String>,

    #[arg(long, value_enum, default_value_t = Interpolation::Bilinear)]
    pub interpolation: Interpolation,

    /// Zero-padding width of extracted frame file names
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=9))]
    pub frame_digits: u8,

    /// Bound for counting frames one by one when a direct count is unavailable
    #[arg(long, default_value_t = 999)]
    pub max_probe_frames: usize,

    /// ffmpeg `-qscale:v` used when extracting frames
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=31))]
    pub quality: u32,

    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[arg(long, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Keep the extracted frames after the run
    #[arg(long)]
    pub keep_workspace: bool,

    /// Write the first frame's mask as a grayscale PNG
    #[arg(long)]
    pub mask_preview: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    /// Open the input file, detecting its kind unless one was forced.
    pub fn media_asset(&self) -> Result<MediaAsset> {
        let kind = match self.kind {
            KindSelection::Auto => None,
            KindSelection::Image => Some(MediaKind::Image),
            KindSelection::Video => Some(MediaKind::Video),
        };
        MediaAsset::open(&self.input, kind)
    }

    pub fn output_path(&self, kind: MediaKind) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let extension = match kind {
            MediaKind::Video => "mp4",
            MediaKind::Image => "png",
        };
        self.input
            .with_file_name(format!("{}_masked.{}", stem, extension))
    }

    pub fn composite_parameters(&self) -> Result<CompositeParameters> {
        CompositeParameters::new(self.threshold, self.color)
    }

    pub fn model_overrides(&self) -> ModelOverrides {
        ModelOverrides {
            width: self.model_width,
            height: self.model_height,
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            interpolation: self.interpolation,
            extraction_quality: self.quality,
            max_probe_frames: self.max_probe_frames,
            mask_preview: self.mask_preview.clone(),
            ..PipelineOptions::new(&self.model_path)
        }
    }

    pub fn ffmpeg_options(&self) -> FfmpegOptions {
        FfmpegOptions {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            frame_digits: usize::from(self.frame_digits),
            keep_workspace: self.keep_workspace,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn check_threshold(s: &str) -> std::result::Result<f32, String> {
    let threshold: f32 = s
        .parse()
        .map_err(|_| format!("`{}` is not a number", s))?;
    if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold) {
        return Err(format!(
            "{} is out of range. Threshold must be within [{}, {}]",
            threshold, MIN_THRESHOLD, MAX_THRESHOLD
        ));
    }
    Ok(threshold)
}
