use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::{
    compositor,
    errors::{Result, SegMaskError},
    frame_rate, postprocess, preprocess,
    progress::{PipelineEvent, ProgressObserver},
    traits::{InferenceAdapter, InferenceSession, MediaAdapter},
    types::{
        CompositeParameters, EncodeSettings, Frame, FrameRate, Interpolation, MediaAsset,
        MediaKind, OutputMedia,
    },
};

/// Where a run currently is.
///
/// Video runs walk `Idle -> Probing -> ExtractingFrames -> DetectingFrameRate ->
/// LoadingModel -> ProcessingFrame(1..=N) -> Encoding -> Done`. Still images skip
/// probing, extraction and frame-rate detection. Any step may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    ExtractingFrames,
    DetectingFrameRate,
    LoadingModel,
    ProcessingFrame(usize),
    Encoding,
    Done,
    Failed,
}

impl Phase {
    fn status(self, kind: MediaKind, frame_count: usize) -> String {
        match self {
            Self::Idle => "Waiting for input.".to_string(),
            Self::Probing => "Probing media...".to_string(),
            Self::ExtractingFrames => "Extracting frames...".to_string(),
            Self::DetectingFrameRate => "Detecting frame rate...".to_string(),
            Self::LoadingModel => "Loading model...".to_string(),
            Self::ProcessingFrame(index) => {
                format!("Processing frame {} of {}...", index, frame_count)
            }
            Self::Encoding => match kind {
                MediaKind::Video => "Encoding final video...".to_string(),
                MediaKind::Image => "Saving image...".to_string(),
            },
            Self::Done => match kind {
                MediaKind::Video => "Done! Your masked video is ready.".to_string(),
                MediaKind::Image => "Done! Your masked image is ready.".to_string(),
            },
            Self::Failed => "Failed.".to_string(),
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Run-independent settings of a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub model_path: PathBuf,
    pub interpolation: Interpolation,
    /// ffmpeg `-qscale:v` used when splitting a video into frames.
    pub extraction_quality: u32,
    /// Upper bound for the index-by-index probe used when the media adapter
    /// cannot count extracted frames itself.
    pub max_probe_frames: usize,
    /// Write the first frame's upsampled mask here as grayscale.
    pub mask_preview: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            interpolation: Interpolation::Bilinear,
            extraction_quality: 2,
            max_probe_frames: 999,
            mask_preview: None,
        }
    }
}

/// State of one end-to-end invocation. Only the orchestrator writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    asset: MediaAsset,
    phase: Phase,
    frame_count: usize,
    current_frame: usize,
    status: String,
    progress: u8,
    frame_rate: Option<FrameRate>,
    output: Option<OutputMedia>,
}

impl PipelineRun {
    fn new(asset: MediaAsset) -> Self {
        Self {
            status: Phase::Idle.status(asset.kind(), 0),
            asset,
            phase: Phase::Idle,
            frame_count: 0,
            current_frame: 0,
            progress: 0,
            frame_rate: None,
            output: None,
        }
    }

    pub fn asset(&self) -> &MediaAsset {
        &self.asset
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub const fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Percentage of frames processed, `0..=100`.
    pub const fn progress(&self) -> u8 {
        self.progress
    }

    pub const fn frame_rate(&self) -> Option<FrameRate> {
        self.frame_rate
    }

    pub fn output(&self) -> Option<&OutputMedia> {
        self.output.as_ref()
    }
}

/// `round(index / total * 100)`.
pub fn progress_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((index as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Frame Pipeline Orchestrator.
///
/// Drives one file at a time through decode, preprocessing, inference, mask
/// upsampling, compositing and re-encoding. Frames are processed strictly in
/// order and the model is loaded once per run.
pub struct Pipeline<M: MediaAdapter, I: InferenceAdapter> {
    media: M,
    inference: I,
    options: PipelineOptions,
    last_run: Option<PipelineRun>,
}

impl<M: MediaAdapter, I: InferenceAdapter> Pipeline<M, I> {
    pub const fn new(media: M, inference: I, options: PipelineOptions) -> Self {
        Self {
            media,
            inference,
            options,
            last_run: None,
        }
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn inference(&self) -> &I {
        &self.inference
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// The most recent run. Starting a new run replaces it.
    pub fn last_run(&self) -> Option<&PipelineRun> {
        self.last_run.as_ref()
    }

    /// Process `asset` end to end and write the result to `output`.
    ///
    /// Any failure aborts the whole run: no partial video is assembled and the
    /// media adapter's scratch space is released either way.
    pub fn run(
        &mut self,
        asset: &MediaAsset,
        params: &CompositeParameters,
        output: &Path,
        observer: &mut dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<OutputMedia> {
        self.last_run = None;
        let mut run = PipelineRun::new(asset.clone());

        tracing::info!(
            "Starting {} run on {} (threshold {}, color {:?})",
            asset.kind(),
            asset.path().display(),
            params.threshold(),
            params.color()
        );

        let result = {
            let mut context = RunContext {
                media: &mut self.media,
                inference: &mut self.inference,
                options: &self.options,
                run: &mut run,
                observer,
                cancel,
            };
            let result = params
                .check_media_kind(asset.kind())
                .and_then(|()| params.check_output(output))
                .and_then(|()| match asset.kind() {
                    MediaKind::Video => context.video(asset, params, output),
                    MediaKind::Image => context.image(asset, params, output),
                });
            context.media.release();
            match &result {
                Ok(produced) => context.finish(produced),
                Err(e) => context.fail(e),
            }
            result
        };

        self.last_run = Some(run);
        result
    }
}

struct RunContext<'a, 'o, M: MediaAdapter, I: InferenceAdapter> {
    media: &'a mut M,
    inference: &'a mut I,
    options: &'a PipelineOptions,
    run: &'a mut PipelineRun,
    observer: &'a mut (dyn ProgressObserver + 'o),
    cancel: &'a CancellationToken,
}

impl<M: MediaAdapter, I: InferenceAdapter> RunContext<'_, '_, M, I> {
    fn enter(&mut self, phase: Phase) {
        let status = phase.status(self.run.asset.kind(), self.run.frame_count);
        self.run.phase = phase;
        self.run.status = status.clone();
        if let Phase::ProcessingFrame(index) = phase {
            self.run.current_frame = index;
            tracing::debug!("{}", status);
        } else {
            tracing::info!("{}", status);
        }
        self.observer
            .on_event(&PipelineEvent::PhaseChanged { phase, status });
    }

    fn frame_done(&mut self, index: usize) {
        let total = self.run.frame_count;
        let percent = progress_percent(index, total);
        self.run.progress = percent;
        self.observer.on_event(&PipelineEvent::FrameProcessed {
            index,
            total,
            percent,
        });
    }

    fn finish(&mut self, produced: &OutputMedia) {
        self.enter(Phase::Done);
        self.run.output = Some(produced.clone());
        self.observer
            .on_event(&PipelineEvent::Finished(produced.clone()));
    }

    fn fail(&mut self, error: &SegMaskError) {
        tracing::error!("Run failed during {:?}: {}", self.run.phase, error);
        let status = error.status_message();
        self.run.phase = Phase::Failed;
        self.run.status = status.clone();
        self.run.output = None;
        self.observer.on_event(&PipelineEvent::Failed(status));
    }

    fn check_cancelled(&self, frame: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SegMaskError::Cancelled { frame });
        }
        Ok(())
    }

    fn video(
        &mut self,
        asset: &MediaAsset,
        params: &CompositeParameters,
        output: &Path,
    ) -> Result<OutputMedia> {
        self.enter(Phase::Probing);
        let raw_rate = match self.media.probe(asset) {
            Ok(raw_rate) => raw_rate,
            Err(e) => {
                tracing::warn!("Probing stream metadata failed: {}", e);
                None
            }
        };

        self.enter(Phase::ExtractingFrames);
        self.media
            .extract_frames(asset, self.options.extraction_quality)?;
        let frame_count = self.discover_frame_count()?;
        self.run.frame_count = frame_count;
        tracing::info!("Extracted {} frames", frame_count);

        self.enter(Phase::DetectingFrameRate);
        let detected = frame_rate::detect(raw_rate.as_deref());
        self.run.frame_rate = Some(detected.frame_rate);
        self.observer.on_event(&PipelineEvent::FrameRateDetected {
            frame_rate: detected.frame_rate,
            fallback: detected.fallback,
        });

        self.enter(Phase::LoadingModel);
        let session = self.inference.load(&self.options.model_path)?;

        for index in 1..=frame_count {
            self.check_cancelled(index)?;
            self.enter(Phase::ProcessingFrame(index));
            let frame = self.media.read_frame(index)?;
            let masked = self.process_frame(&session, &frame, params)?;
            self.media.write_frame(&masked)?;
            self.frame_done(index);
        }

        self.enter(Phase::Encoding);
        self.media.encode(
            frame_count,
            &EncodeSettings::h264(detected.frame_rate),
            output,
        )
    }

    fn image(
        &mut self,
        asset: &MediaAsset,
        params: &CompositeParameters,
        output: &Path,
    ) -> Result<OutputMedia> {
        self.run.frame_count = 1;

        self.enter(Phase::LoadingModel);
        let session = self.inference.load(&self.options.model_path)?;

        self.check_cancelled(1)?;
        self.enter(Phase::ProcessingFrame(1));
        let frame = self.media.read_image(asset)?;
        let masked = self.process_frame(&session, &frame, params)?;
        self.frame_done(1);

        self.enter(Phase::Encoding);
        self.media.write_image(&masked, output)
    }

    /// Prefer the adapter's own count; otherwise probe indices from 1 until the
    /// first miss, up to `max_probe_frames`. Frames past the bound fail the run.
    fn discover_frame_count(&mut self) -> Result<usize> {
        let count = match self.media.frame_count()? {
            Some(count) => count,
            None => {
                let bound = self.options.max_probe_frames;
                let count = (1..=bound)
                    .take_while(|&index| self.media.frame_exists(index))
                    .count();
                if count == bound && self.media.frame_exists(bound + 1) {
                    return Err(SegMaskError::extraction(format!(
                        "more than {} frames extracted; raise the frame probe bound",
                        bound
                    )));
                }
                count
            }
        };

        if count == 0 {
            return Err(SegMaskError::extraction("no frames extracted"));
        }
        Ok(count)
    }

    fn process_frame(
        &self,
        session: &I::Session,
        frame: &Frame,
        params: &CompositeParameters,
    ) -> Result<Frame> {
        let contract = session.contract();

        let tensor = preprocess::to_tensor(frame, contract.width, contract.height)?;
        let outputs = session.run(&[(contract.input_name.as_str(), &tensor)])?;
        let mask = outputs
            .into_iter()
            .find(|(name, _)| *name == contract.output_name)
            .map(|(_, mask)| mask)
            .ok_or_else(|| {
                SegMaskError::inference(
                    format!("frame {}", frame.index),
                    format!("model returned no output named `{}`", contract.output_name),
                )
            })?;

        let upsampled = postprocess::upsample(
            &mask,
            contract.width,
            contract.height,
            frame.width(),
            frame.height(),
            self.options.interpolation,
        )?;

        if frame.index == 1 {
            if let Some(path) = &self.options.mask_preview {
                postprocess::mask_to_luma(&upsampled)
                    .save(path)
                    .map_err(|e| SegMaskError::ImageProcessing {
                        path: path.display().to_string(),
                        operation: "save mask preview".to_string(),
                        source: Box::new(e),
                    })?;
            }
        }

        compositor::composite(frame, &upsampled, params)
    }
}
