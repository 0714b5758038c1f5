use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use image::{ImageFormat, Rgba, RgbaImage};
use ndarray::Array4;

use crate::errors::{Result, SegMaskError};

/// Lowest threshold the user may pick.
pub const MIN_THRESHOLD: f32 = 0.2;
/// Highest threshold the user may pick.
pub const MAX_THRESHOLD: f32 = 0.8;

/// `[1, modelH, modelW, 3]`, channel-last, values in `[0, 1]`.
pub type InputTensor = Array4<f32>;

/// Raw model output, one foreground probability per model-resolution pixel.
pub type MaskField = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Guess the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" => Some(Self::Image),
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// The file a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    path: PathBuf,
    kind: MediaKind,
}

impl MediaAsset {
    /// Select an input file. `kind` overrides detection by extension.
    pub fn open(path: impl Into<PathBuf>, kind: Option<MediaKind>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() || !path.is_file() {
            return Err(SegMaskError::InputMissing { path });
        }
        let kind = match kind.or_else(|| MediaKind::from_path(&path)) {
            Some(kind) => kind,
            None => {
                return Err(SegMaskError::validation(
                    "input",
                    format!("{} is neither a supported image nor video", path.display()),
                ))
            }
        };
        Ok(Self { path, kind })
    }

    /// Build an asset without touching the filesystem.
    pub fn new_unchecked(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// One decoded bitmap at source resolution. `index` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub image: RgbaImage,
}

impl Frame {
    pub const fn new(index: usize, image: RgbaImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A mask resampled to its frame's pixel grid, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsampledMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl UpsampledMask {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(SegMaskError::validation(
                "mask",
                format!(
                    "has {} values, expected {} for {}x{}",
                    values.len(),
                    expected,
                    width,
                    height
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackgroundColor {
    #[default]
    Green,
    Blue,
    /// Only meaningful for still images; video is encoded without alpha.
    Transparent,
}

impl BackgroundColor {
    pub const fn rgba(self) -> Rgba<u8> {
        match self {
            Self::Green => Rgba([0, 255, 0, 255]),
            Self::Blue => Rgba([0, 0, 255, 255]),
            Self::Transparent => Rgba([0, 0, 0, 0]),
        }
    }
}

/// Threshold and replacement color, fixed for the duration of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeParameters {
    threshold: f32,
    color: BackgroundColor,
}

impl CompositeParameters {
    pub fn new(threshold: f32, color: BackgroundColor) -> Result<Self> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold) {
            return Err(SegMaskError::validation(
                "threshold",
                format!(
                    "must be within [{}, {}], got {}",
                    MIN_THRESHOLD, MAX_THRESHOLD, threshold
                ),
            ));
        }
        Ok(Self { threshold, color })
    }

    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    pub const fn color(&self) -> BackgroundColor {
        self.color
    }

    /// Transparency cannot survive the yuv420p video encode.
    pub fn check_media_kind(&self, kind: MediaKind) -> Result<()> {
        if kind == MediaKind::Video && self.color == BackgroundColor::Transparent {
            return Err(SegMaskError::validation(
                "color",
                "transparent is only available for still images",
            ));
        }
        Ok(())
    }

    /// Formats that cannot store alpha would turn transparent pixels opaque.
    pub fn check_output(&self, output: &Path) -> Result<()> {
        if self.color != BackgroundColor::Transparent {
            return Ok(());
        }
        match ImageFormat::from_path(output) {
            Ok(format @ (ImageFormat::Jpeg | ImageFormat::Pnm)) => Err(SegMaskError::validation(
                "color",
                format!(
                    "transparent cannot be written as {:?} ({})",
                    format,
                    output.display()
                ),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for CompositeParameters {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            color: BackgroundColor::Green,
        }
    }
}

/// Whole frames per second, always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameRate(u32);

impl FrameRate {
    pub const FALLBACK: Self = Self(30);

    pub const fn new(fps: u32) -> Option<Self> {
        if fps == 0 {
            None
        } else {
            Some(Self(fps))
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mask upsampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Interpolation {
    #[default]
    Bilinear,
    Nearest,
}

/// Binding names and input resolution of a loaded model, resolved at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelContract {
    pub input_name: String,
    pub output_name: String,
    pub width: u32,
    pub height: u32,
}

/// User-supplied values that win over what the model declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
}

/// Codec settings for reassembling masked frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub frame_rate: FrameRate,
    pub codec: String,
    pub pixel_format: String,
}

impl EncodeSettings {
    pub fn h264(frame_rate: FrameRate) -> Self {
        Self {
            frame_rate,
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
        }
    }
}

/// Handle to the file a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub frame_count: usize,
    pub frame_rate: Option<FrameRate>,
}
