//! In-memory media and inference adapters for driving the pipeline in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::errors::{Result, SegMaskError};
use crate::traits::{InferenceAdapter, InferenceSession, MediaAdapter};
use crate::types::{
    EncodeSettings, Frame, InputTensor, MaskField, MediaAsset, MediaKind, ModelContract,
    OutputMedia,
};

/// Media adapter backed by a list of in-memory frames.
#[derive(Debug, Clone, Default)]
pub struct MockMedia {
    pub frames: Vec<RgbaImage>,
    pub frame_rate: Option<String>,
    /// When `false`, [`MediaAdapter::frame_count`] returns `None` and the
    /// orchestrator has to probe.
    pub reports_count: bool,
    pub fail_probe: bool,
    pub fail_encode: bool,

    pub probe_calls: usize,
    pub extract_calls: usize,
    pub frame_exists_calls: Arc<AtomicUsize>,
    pub written: BTreeMap<usize, Frame>,
    pub encoded: Vec<(usize, EncodeSettings, PathBuf)>,
    pub images_written: Vec<PathBuf>,
    pub release_calls: usize,
}

impl MockMedia {
    pub fn video(frames: Vec<RgbaImage>, frame_rate: Option<&str>) -> Self {
        Self {
            frames,
            frame_rate: frame_rate.map(str::to_string),
            reports_count: true,
            ..Self::default()
        }
    }

    pub fn image(image: RgbaImage) -> Self {
        Self {
            frames: vec![image],
            reports_count: true,
            ..Self::default()
        }
    }

    fn frame(&self, index: usize) -> Option<&RgbaImage> {
        index.checked_sub(1).and_then(|i| self.frames.get(i))
    }
}

impl MediaAdapter for MockMedia {
    fn probe(&mut self, _asset: &MediaAsset) -> Result<Option<String>> {
        self.probe_calls += 1;
        if self.fail_probe {
            return Err(SegMaskError::MediaTool {
                tool: "mock".to_string(),
                operation: "probe".to_string(),
                message: "probe failed".to_string(),
            });
        }
        Ok(self.frame_rate.clone())
    }

    fn extract_frames(&mut self, _asset: &MediaAsset, _quality: u32) -> Result<()> {
        self.extract_calls += 1;
        Ok(())
    }

    fn frame_count(&self) -> Result<Option<usize>> {
        Ok(self.reports_count.then_some(self.frames.len()))
    }

    fn frame_exists(&self, index: usize) -> bool {
        self.frame_exists_calls.fetch_add(1, Ordering::Relaxed);
        self.frame(index).is_some()
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        self.frame(index)
            .map(|image| Frame::new(index, image.clone()))
            .ok_or_else(|| SegMaskError::extraction(format!("frame {} missing", index)))
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.written.insert(frame.index, frame.clone());
        Ok(())
    }

    fn encode(
        &mut self,
        frame_count: usize,
        settings: &EncodeSettings,
        output: &Path,
    ) -> Result<OutputMedia> {
        self.encoded
            .push((frame_count, settings.clone(), output.to_path_buf()));
        if self.fail_encode {
            return Err(SegMaskError::encoding("mock encode", "encoder exited with 1"));
        }
        Ok(OutputMedia {
            path: output.to_path_buf(),
            kind: MediaKind::Video,
            frame_count,
            frame_rate: Some(settings.frame_rate),
        })
    }

    fn read_image(&self, _asset: &MediaAsset) -> Result<Frame> {
        self.read_frame(1)
    }

    fn write_image(&mut self, frame: &Frame, output: &Path) -> Result<OutputMedia> {
        self.written.insert(frame.index, frame.clone());
        self.images_written.push(output.to_path_buf());
        Ok(OutputMedia {
            path: output.to_path_buf(),
            kind: MediaKind::Image,
            frame_count: 1,
            frame_rate: None,
        })
    }

    fn release(&mut self) {
        self.release_calls += 1;
    }
}

/// Inference adapter whose model emits a fixed mask.
#[derive(Debug, Clone)]
pub struct MockInference {
    pub contract: ModelContract,
    pub mask: MaskField,
    pub fail_load: bool,
    /// 1-based run call that fails.
    pub fail_on_run: Option<usize>,

    pub load_calls: usize,
    pub loaded_paths: Vec<PathBuf>,
    pub run_calls: Arc<AtomicUsize>,
}

impl MockInference {
    /// A model of `width x height` that outputs `value` everywhere.
    pub fn constant(width: u32, height: u32, value: f32) -> Self {
        Self::with_mask(width, height, vec![value; width as usize * height as usize])
    }

    pub fn with_mask(width: u32, height: u32, mask: MaskField) -> Self {
        Self {
            contract: ModelContract {
                input_name: "input_7".to_string(),
                output_name: "output_0".to_string(),
                width,
                height,
            },
            mask,
            fail_load: false,
            fail_on_run: None,
            load_calls: 0,
            loaded_paths: Vec::new(),
            run_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn runs(&self) -> usize {
        self.run_calls.load(Ordering::Relaxed)
    }
}

impl InferenceAdapter for MockInference {
    type Session = MockSession;

    fn load(&mut self, model_path: &Path) -> Result<MockSession> {
        self.load_calls += 1;
        self.loaded_paths.push(model_path.to_path_buf());
        if self.fail_load {
            return Err(SegMaskError::inference(
                format!("model load: {}", model_path.display()),
                "not a valid model",
            ));
        }
        Ok(MockSession {
            contract: self.contract.clone(),
            mask: self.mask.clone(),
            fail_on_run: self.fail_on_run,
            run_calls: Arc::clone(&self.run_calls),
        })
    }
}

pub struct MockSession {
    contract: ModelContract,
    mask: MaskField,
    fail_on_run: Option<usize>,
    run_calls: Arc<AtomicUsize>,
}

impl InferenceSession for MockSession {
    fn contract(&self) -> &ModelContract {
        &self.contract
    }

    fn run(&self, inputs: &[(&str, &InputTensor)]) -> Result<Vec<(String, MaskField)>> {
        let call = self.run_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_on_run == Some(call) {
            return Err(SegMaskError::inference(
                format!("run {}", call),
                "execution provider error",
            ));
        }

        let expected_shape = [
            1,
            self.contract.height as usize,
            self.contract.width as usize,
            3,
        ];
        match inputs {
            [(name, tensor)]
                if *name == self.contract.input_name && tensor.shape() == expected_shape =>
            {
                Ok(vec![(self.contract.output_name.clone(), self.mask.clone())])
            }
            _ => Err(SegMaskError::inference(
                "bind inputs",
                format!("unexpected inputs for `{}`", self.contract.input_name),
            )),
        }
    }
}

/// `count` solid frames of the given size, each a slightly different shade.
pub fn solid_frames(count: usize, width: u32, height: u32) -> Vec<RgbaImage> {
    (0..count)
        .map(|i| RgbaImage::from_pixel(width, height, Rgba([200, (i % 256) as u8, 40, 255])))
        .collect()
}
