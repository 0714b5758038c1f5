use std::path::Path;

use crate::errors::Result;
use crate::types::{
    EncodeSettings, Frame, InputTensor, MaskField, MediaAsset, ModelContract, OutputMedia,
};

/// Loads a segmentation model.
///
/// The orchestrator calls [`InferenceAdapter::load`] exactly once per run and
/// reuses the returned session for every frame.
pub trait InferenceAdapter {
    type Session: InferenceSession;

    fn load(&mut self, model_path: &Path) -> Result<Self::Session>;
}

/// A loaded model.
pub trait InferenceSession {
    /// Binding names and input resolution declared by the model.
    fn contract(&self) -> &ModelContract;

    /// Run the model once. Outputs come back in the model's declaration order.
    fn run(&self, inputs: &[(&str, &InputTensor)]) -> Result<Vec<(String, MaskField)>>;
}

/// Decodes, stores and re-encodes media for one run.
///
/// Frame indices are 1-based. Implementations own whatever scratch space the
/// extracted and masked frames live in and drop it in [`MediaAdapter::release`].
pub trait MediaAdapter {
    /// Raw frame-rate rational (`num/den`) of the first video stream, if known.
    fn probe(&mut self, asset: &MediaAsset) -> Result<Option<String>>;

    /// Split the video into still frames at the given quality.
    fn extract_frames(&mut self, asset: &MediaAsset, quality: u32) -> Result<()>;

    /// Number of extracted frames when it can be known without probing.
    fn frame_count(&self) -> Result<Option<usize>> {
        Ok(None)
    }

    fn frame_exists(&self, index: usize) -> bool;

    fn read_frame(&self, index: usize) -> Result<Frame>;

    /// Store a composited frame under its own index.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Reassemble masked frames `1..=frame_count` into `output`.
    fn encode(
        &mut self,
        frame_count: usize,
        settings: &EncodeSettings,
        output: &Path,
    ) -> Result<OutputMedia>;

    /// Decode a still image as frame 1.
    fn read_image(&self, asset: &MediaAsset) -> Result<Frame>;

    fn write_image(&mut self, frame: &Frame, output: &Path) -> Result<OutputMedia>;

    /// Discard any scratch space held for the current run.
    fn release(&mut self) {}
}
