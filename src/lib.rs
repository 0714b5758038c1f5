pub mod compositor;
pub mod config;
pub mod errors;
pub mod frame_rate;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod progress;
pub mod traits;
pub mod types;

pub mod mocks;

pub use config::Config;
pub use errors::{Result, SegMaskError};
pub use media::{FfmpegMedia, FfmpegOptions};
pub use model::{OrtInference, OrtSession};
pub use pipeline::{Phase, Pipeline, PipelineOptions, PipelineRun};
pub use progress::{
    LogObserver, NoopObserver, PipelineEvent, ProgressBarObserver, ProgressObserver,
};
pub use traits::*;
pub use types::*;
