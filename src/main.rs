use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use segmask::{
    Config, FfmpegMedia, LogObserver, OrtInference, Pipeline, PipelineRun, ProgressBarObserver,
    ProgressObserver, SegMaskError,
};

fn main() -> Result<ExitCode> {
    let config = Config::parse();
    init_tracing(config.verbose);

    let asset = config.media_asset()?;
    let params = config.composite_parameters()?;
    let output = config.output_path(asset.kind());
    params.check_media_kind(asset.kind())?;
    params.check_output(&output)?;

    let media = FfmpegMedia::new(config.ffmpeg_options());
    let inference = OrtInference::new(config.model_overrides(), config.device_id);
    let mut pipeline = Pipeline::new(media, inference, config.pipeline_options());

    // The bar carries the phase status; logs take over when verbose.
    let mut observer: Box<dyn ProgressObserver> = if config.verbose {
        Box::new(LogObserver)
    } else {
        Box::new(ProgressBarObserver::new())
    };
    let cancel = CancellationToken::new();

    match pipeline.run(&asset, &params, &output, observer.as_mut(), &cancel) {
        Ok(produced) => {
            if let Some(run) = pipeline.last_run() {
                println!("{}", run.status());
            }
            println!("{}", produced.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::debug!("{:?}", e);
            eprintln!("{}", failure_status(pipeline.last_run(), &e));
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Short status for a failed run. Details only go to the debug log.
fn failure_status(run: Option<&PipelineRun>, error: &SegMaskError) -> String {
    run.map(|run| run.status().to_string())
        .unwrap_or_else(|| error.status_message())
}

/// INFO logs would interleave with the progress bar, so only warnings show
/// unless verbose.
fn log_level(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::WARN
    }
}

fn init_tracing(verbose: bool) {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(log_level(verbose))
            .with_target(false)
            .init(),
    }
}
