use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::Phase;
use crate::types::{FrameRate, OutputMedia};

/// Something the orchestrator reports while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PhaseChanged { phase: Phase, status: String },
    FrameRateDetected { frame_rate: FrameRate, fallback: bool },
    FrameProcessed { index: usize, total: usize, percent: u8 },
    Finished(OutputMedia),
    Failed(String),
}

/// Receives run progress. The orchestrator is the only caller.
pub trait ProgressObserver {
    fn on_event(&mut self, event: &PipelineEvent);
}

impl<F: FnMut(&PipelineEvent)> ProgressObserver for F {
    fn on_event(&mut self, event: &PipelineEvent) {
        self(event)
    }
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&mut self, _event: &PipelineEvent) {}
}

/// Mirrors events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::PhaseChanged { status, .. } => tracing::info!("{}", status),
            PipelineEvent::FrameRateDetected {
                frame_rate,
                fallback,
            } => tracing::info!("Frame rate: {} fps (fallback: {})", frame_rate, fallback),
            PipelineEvent::FrameProcessed {
                index,
                total,
                percent,
            } => tracing::debug!("Frame {}/{} ({}%)", index, total, percent),
            PipelineEvent::Finished(output) => {
                tracing::info!("Wrote {}", output.path.display())
            }
            PipelineEvent::Failed(status) => tracing::error!("{}", status),
        }
    }
}

/// Terminal progress bar.
pub struct ProgressBarObserver {
    progress_bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        let progress_bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);
        Self { progress_bar }
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.progress_bar
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::PhaseChanged { phase, status } => {
                if !matches!(phase, Phase::ProcessingFrame(_)) {
                    self.progress_bar.set_message(status.clone());
                }
            }
            PipelineEvent::FrameRateDetected { .. } => {}
            PipelineEvent::FrameProcessed { index, total, .. } => {
                self.progress_bar.set_length(*total as u64);
                self.progress_bar.set_position(*index as u64);
            }
            PipelineEvent::Finished(_) => self.progress_bar.finish_with_message("Done"),
            PipelineEvent::Failed(status) => self.progress_bar.abandon_with_message(status.clone()),
        }
    }
}
