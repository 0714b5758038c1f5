use std::path::Path;
use std::sync::atomic::Ordering;

use image::Rgba;
use tokio_util::sync::CancellationToken;

use segmask::mocks::{solid_frames, MockInference, MockMedia};
use segmask::{
    BackgroundColor, CompositeParameters, FrameRate, MediaAsset, MediaKind, NoopObserver,
    OutputMedia, Phase, Pipeline, PipelineEvent, PipelineOptions, SegMaskError,
};

fn clip() -> MediaAsset {
    MediaAsset::new_unchecked("clip.mp4", MediaKind::Video)
}

fn pipeline(media: MockMedia, inference: MockInference) -> Pipeline<MockMedia, MockInference> {
    Pipeline::new(media, inference, PipelineOptions::new("model.onnx"))
}

fn run(
    pipeline: &mut Pipeline<MockMedia, MockInference>,
    params: &CompositeParameters,
) -> segmask::Result<OutputMedia> {
    pipeline.run(
        &clip(),
        params,
        Path::new("clip_masked.mp4"),
        &mut NoopObserver,
        &CancellationToken::new(),
    )
}

#[test]
fn test_model_loaded_once_for_all_frames() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(5, 16, 9), Some("25/1")),
        MockInference::constant(8, 8, 1.0),
    );

    let produced = run(&mut pipeline, &CompositeParameters::default()).unwrap();

    assert_eq!(produced.frame_count, 5);
    assert_eq!(pipeline.inference().load_calls, 1);
    assert_eq!(pipeline.inference().runs(), 5);
    assert_eq!(pipeline.media().written.len(), 5);
    assert_eq!(pipeline.media().encoded.len(), 1);
    assert_eq!(pipeline.media().release_calls, 1);
}

#[test]
fn test_frames_processed_in_order() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(4, 6, 6), Some("30/1")),
        MockInference::constant(6, 6, 1.0),
    );
    let mut processed = Vec::new();
    let mut observer = |event: &PipelineEvent| {
        if let PipelineEvent::FrameProcessed { index, .. } = event {
            processed.push(*index);
        }
    };

    pipeline
        .run(
            &clip(),
            &CompositeParameters::default(),
            Path::new("out.mp4"),
            &mut observer,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(processed, vec![1, 2, 3, 4]);
    // All-foreground mask leaves every frame untouched.
    let media = pipeline.media();
    for (index, frame) in &media.written {
        assert_eq!(frame.image, media.frames[index - 1]);
    }
}

#[test]
fn test_background_frames_are_replaced() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(3, 10, 10), None),
        MockInference::constant(4, 4, 0.0),
    );
    let params = CompositeParameters::new(0.5, BackgroundColor::Blue).unwrap();

    run(&mut pipeline, &params).unwrap();

    for frame in pipeline.media().written.values() {
        assert!(frame.image.pixels().all(|p| *p == Rgba([0, 0, 255, 255])));
    }
}

#[test]
fn test_zero_frames_is_extraction_failure() {
    let mut pipeline = pipeline(
        MockMedia::video(Vec::new(), Some("25/1")),
        MockInference::constant(8, 8, 1.0),
    );

    let result = run(&mut pipeline, &CompositeParameters::default());

    assert!(matches!(result, Err(SegMaskError::ExtractionFailure { .. })));
    assert!(pipeline.media().encoded.is_empty());
    assert_eq!(pipeline.inference().load_calls, 0);
    assert_eq!(pipeline.media().release_calls, 1);

    let last = pipeline.last_run().unwrap();
    assert_eq!(last.phase(), Phase::Failed);
    assert_eq!(last.status(), "No frames extracted.");
}

#[test]
fn test_frame_rate_passed_to_encoder() {
    let cases = [
        (Some("30000/1001"), 30),
        (Some("25/1"), 25),
        (Some("24000/1001"), 24),
        (Some("0/0"), 30),
        (None, 30),
    ];
    for (raw, expected) in cases {
        let mut pipeline = pipeline(
            MockMedia::video(solid_frames(2, 4, 4), raw),
            MockInference::constant(4, 4, 1.0),
        );

        let produced = run(&mut pipeline, &CompositeParameters::default()).unwrap();

        let expected = FrameRate::new(expected);
        assert_eq!(produced.frame_rate, expected, "{:?}", raw);
        let (count, settings, _) = &pipeline.media().encoded[0];
        assert_eq!(*count, 2);
        assert_eq!(Some(settings.frame_rate), expected);
        assert_eq!(settings.codec, "libx264");
        assert_eq!(settings.pixel_format, "yuv420p");
        assert_eq!(pipeline.last_run().unwrap().frame_rate(), expected);
    }
}

#[test]
fn test_probe_failure_falls_back_to_default_rate() {
    let mut media = MockMedia::video(solid_frames(2, 4, 4), Some("60/1"));
    media.fail_probe = true;
    let mut pipeline = pipeline(media, MockInference::constant(4, 4, 1.0));
    let mut fallback = None;
    let mut observer = |event: &PipelineEvent| {
        if let PipelineEvent::FrameRateDetected { fallback: f, .. } = event {
            fallback = Some(*f);
        }
    };

    let produced = pipeline
        .run(
            &clip(),
            &CompositeParameters::default(),
            Path::new("out.mp4"),
            &mut observer,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(produced.frame_rate, Some(FrameRate::FALLBACK));
    assert_eq!(fallback, Some(true));
}

#[test]
fn test_inference_failure_aborts_without_encoding() {
    let mut inference = MockInference::constant(4, 4, 1.0);
    inference.fail_on_run = Some(3);
    let mut pipeline = pipeline(MockMedia::video(solid_frames(5, 4, 4), None), inference);

    let result = run(&mut pipeline, &CompositeParameters::default());

    assert!(matches!(result, Err(SegMaskError::Inference { .. })));
    assert_eq!(pipeline.media().written.len(), 2);
    assert!(pipeline.media().encoded.is_empty());
    assert_eq!(pipeline.media().release_calls, 1);

    let last = pipeline.last_run().unwrap();
    assert_eq!(last.phase(), Phase::Failed);
    assert_eq!(last.current_frame(), 3);
    assert!(last.output().is_none());
}

#[test]
fn test_wrong_mask_size_is_inference_failure() {
    let mut inference = MockInference::constant(4, 4, 1.0);
    inference.mask.truncate(10);
    let mut pipeline = pipeline(MockMedia::video(solid_frames(1, 4, 4), None), inference);

    let result = run(&mut pipeline, &CompositeParameters::default());

    assert!(result.is_err());
    assert!(pipeline.media().encoded.is_empty());
}

#[test]
fn test_encode_failure_reported() {
    let mut media = MockMedia::video(solid_frames(2, 4, 4), None);
    media.fail_encode = true;
    let mut pipeline = pipeline(media, MockInference::constant(4, 4, 1.0));

    let result = run(&mut pipeline, &CompositeParameters::default());

    assert!(matches!(result, Err(SegMaskError::Encoding { .. })));
    assert_eq!(pipeline.media().release_calls, 1);
    assert_eq!(pipeline.last_run().unwrap().phase(), Phase::Failed);
}

#[test]
fn test_cancellation_stops_before_next_frame() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(6, 4, 4), None),
        MockInference::constant(4, 4, 1.0),
    );
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut observer = move |event: &PipelineEvent| {
        if let PipelineEvent::FrameProcessed { index: 2, .. } = event {
            token.cancel();
        }
    };

    let result = pipeline.run(
        &clip(),
        &CompositeParameters::default(),
        Path::new("out.mp4"),
        &mut observer,
        &cancel,
    );

    assert!(matches!(result, Err(SegMaskError::Cancelled { frame: 3 })));
    assert_eq!(pipeline.inference().runs(), 2);
    assert!(pipeline.media().encoded.is_empty());
    assert_eq!(pipeline.media().release_calls, 1);
    assert_eq!(pipeline.last_run().unwrap().status(), "Cancelled.");
}

#[test]
fn test_frame_count_scanned_when_adapter_cannot_count() {
    let mut media = MockMedia::video(solid_frames(4, 4, 4), None);
    media.reports_count = false;
    let mut pipeline = pipeline(media, MockInference::constant(4, 4, 1.0));

    let produced = run(&mut pipeline, &CompositeParameters::default()).unwrap();

    assert_eq!(produced.frame_count, 4);
}

#[test]
fn test_frames_past_scan_bound_fail_the_run() {
    let mut media = MockMedia::video(solid_frames(12, 2, 2), None);
    media.reports_count = false;
    let probes = media.frame_exists_calls.clone();
    let mut options = PipelineOptions::new("model.onnx");
    options.max_probe_frames = 8;
    let mut pipeline = Pipeline::new(media, MockInference::constant(2, 2, 1.0), options);

    let result = run(&mut pipeline, &CompositeParameters::default());

    assert!(matches!(result, Err(SegMaskError::ExtractionFailure { .. })));
    // Eight lookups plus one to notice frames remain past the bound.
    assert_eq!(probes.load(Ordering::Relaxed), 9);
    assert_eq!(pipeline.inference().load_calls, 0);
    assert!(pipeline.media().written.is_empty());
    assert!(pipeline.media().encoded.is_empty());
    assert_eq!(pipeline.media().release_calls, 1);
    assert_eq!(pipeline.last_run().unwrap().phase(), Phase::Failed);
}

#[test]
fn test_frame_scan_exactly_at_bound() {
    let mut media = MockMedia::video(solid_frames(8, 2, 2), None);
    media.reports_count = false;
    let mut options = PipelineOptions::new("model.onnx");
    options.max_probe_frames = 8;
    let mut pipeline = Pipeline::new(media, MockInference::constant(2, 2, 1.0), options);

    let produced = run(&mut pipeline, &CompositeParameters::default()).unwrap();

    assert_eq!(produced.frame_count, 8);
    assert_eq!(pipeline.media().encoded[0].0, 8);
}

#[test]
fn test_transparent_rejected_for_video() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(2, 4, 4), None),
        MockInference::constant(4, 4, 1.0),
    );
    let params = CompositeParameters::new(0.5, BackgroundColor::Transparent).unwrap();

    let result = run(&mut pipeline, &params);

    assert!(matches!(result, Err(SegMaskError::Validation { .. })));
    assert_eq!(pipeline.media().extract_calls, 0);
    assert_eq!(pipeline.inference().load_calls, 0);
}

#[test]
fn test_phases_and_progress_reported() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(3, 4, 4), Some("25/1")),
        MockInference::constant(4, 4, 1.0),
    );
    let mut phases = Vec::new();
    let mut percents = Vec::new();
    let mut finished = false;
    let mut observer = |event: &PipelineEvent| match event {
        PipelineEvent::PhaseChanged { phase, .. } => phases.push(*phase),
        PipelineEvent::FrameProcessed { percent, .. } => percents.push(*percent),
        PipelineEvent::Finished(_) => finished = true,
        _ => {}
    };

    pipeline
        .run(
            &clip(),
            &CompositeParameters::default(),
            Path::new("out.mp4"),
            &mut observer,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(
        phases,
        vec![
            Phase::Probing,
            Phase::ExtractingFrames,
            Phase::DetectingFrameRate,
            Phase::LoadingModel,
            Phase::ProcessingFrame(1),
            Phase::ProcessingFrame(2),
            Phase::ProcessingFrame(3),
            Phase::Encoding,
            Phase::Done,
        ]
    );
    assert_eq!(percents, vec![33, 67, 100]);
    assert!(finished);

    let last = pipeline.last_run().unwrap();
    assert_eq!(last.phase(), Phase::Done);
    assert_eq!(last.progress(), 100);
    assert_eq!(last.frame_count(), 3);
    assert_eq!(last.status(), "Done! Your masked video is ready.");
    assert_eq!(
        last.output().map(|o| o.path.as_path()),
        Some(Path::new("out.mp4"))
    );
}

#[test]
fn test_second_run_starts_fresh() {
    let mut pipeline = pipeline(
        MockMedia::video(solid_frames(2, 4, 4), None),
        MockInference::constant(4, 4, 1.0),
    );

    run(&mut pipeline, &CompositeParameters::default()).unwrap();
    run(&mut pipeline, &CompositeParameters::default()).unwrap();

    assert_eq!(pipeline.inference().load_calls, 2);
    assert_eq!(pipeline.media().extract_calls, 2);
    assert_eq!(pipeline.media().encoded.len(), 2);
}
