// 该文件是 TumorLens （脑瘤识别） 项目的一部分。
// tests/pipeline.rs - 上传处理流程测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod common;

use common::*;
use image::ImageFormat;
use tumorlens::{
  input::{ImageFileInput, UploadError, UploadedImage},
  output::{DetectionRow, DirectoryRecordOutput, Discard, Draw},
  task::{BatchTask, FileOutcome, NO_DETECTION_NOTICE, Task, TaskError, process_upload},
};

#[test]
fn grayscale_jpeg_without_detections_shows_notice() -> anyhow::Result<()> {
  let model = ScriptedModel::new([DetectResult::default()]);
  let draw = Draw::new()?;
  let upload = UploadedImage::new("scan.jpg", gray_jpeg(512));

  let detected = process_upload(&model, &draw, &upload)?;

  assert_eq!(model.seen(), vec![(512, 512)]);
  assert!(detected.rows.is_empty());
  assert_eq!(detected.notice(), Some(NO_DETECTION_NOTICE));
  assert_eq!(detected.download_name, "detected_scan.jpg");
  assert_eq!((detected.width, detected.height), (512, 512));

  assert_eq!(image::guess_format(&detected.annotated_png)?, ImageFormat::Png);
  let annotated = image::load_from_memory(&detected.annotated_png)?;
  assert_eq!((annotated.width(), annotated.height()), (512, 512));
  Ok(())
}

#[test]
fn rgba_png_rows_follow_detector_order() -> anyhow::Result<()> {
  let model = ScriptedModel::new([two_detections()]);
  let draw = Draw::new()?;
  let upload = UploadedImage::new("brain.png", rgba_png(512));

  let detected = process_upload(&model, &draw, &upload)?;

  assert_eq!(detected.notice(), None);
  assert_eq!(
    detected.rows,
    vec![
      DetectionRow {
        class: "Glioma".to_string(),
        confidence: 0.91,
        xmin: 100,
        ymin: 120,
        xmax: 300,
        ymax: 260,
      },
      DetectionRow {
        class: "Meningioma".to_string(),
        confidence: 0.43,
        xmin: 20,
        ymin: 10,
        xmax: 60,
        ymax: 50,
      },
    ]
  );

  let original = image::load_from_memory(&upload.bytes)?.to_rgb8();
  let annotated = image::load_from_memory(&detected.annotated_png)?.to_rgb8();
  assert_eq!(annotated.dimensions(), original.dimensions());
  assert_ne!(annotated, original);
  Ok(())
}

#[test]
fn model_failure_is_reported_for_the_file() -> anyhow::Result<()> {
  let model = ScriptedModel::failing();
  let draw = Draw::new()?;
  let upload = UploadedImage::new("scan.png", rgba_png(64));

  let err = process_upload(&model, &draw, &upload).unwrap_err();
  assert!(matches!(err, TaskError::Inference(_)));
  Ok(())
}

#[test]
fn corrupt_file_does_not_affect_the_next_one() -> anyhow::Result<()> {
  let model = ScriptedModel::new([two_detections()]);
  let draw = Draw::new()?;
  let uploads = vec![
    UploadedImage::new("broken.jpg", b"not an image".to_vec()),
    UploadedImage::new("notes.txt", b"hello".to_vec()),
    UploadedImage::new("good.png", rgba_png(512)),
  ];

  let outcomes = BatchTask::new(&draw).run_task(uploads.into_iter().map(Ok), &model, &Discard)?;

  assert_eq!(outcomes.len(), 3);
  assert!(matches!(
    &outcomes[0],
    FileOutcome::Failed { filename, error: TaskError::Upload(_) } if filename == "broken.jpg"
  ));
  assert!(matches!(
    &outcomes[1],
    FileOutcome::Failed { error: TaskError::Upload(UploadError::UnsupportedExtension(_)), .. }
  ));
  match &outcomes[2] {
    FileOutcome::Detected(detected) => assert_eq!(detected.rows.len(), 2),
    other => panic!("unexpected outcome for {}", other.filename()),
  }
  // 失败的文件不会调用模型
  assert_eq!(model.seen(), vec![(512, 512)]);
  Ok(())
}

#[test]
fn batch_writes_results_to_folder() -> anyhow::Result<()> {
  let dir = tempfile::tempdir()?;
  let inputs = dir.path().join("inputs");
  std::fs::create_dir_all(&inputs)?;
  std::fs::write(inputs.join("a.jpg"), gray_jpeg(128))?;
  std::fs::write(inputs.join("b.png"), rgba_png(128))?;

  let model = ScriptedModel::new([DetectResult::default(), two_detections()]);
  let draw = Draw::new()?;
  let input = ImageFileInput::from_paths([inputs.join("a.jpg"), inputs.join("b.png")]);
  let output = DirectoryRecordOutput::new(dir.path().join("detected"));

  let outcomes = BatchTask::new(&draw).run_task(input, &model, &output)?;
  assert!(outcomes.iter().all(FileOutcome::is_detected));

  let out = dir.path().join("detected");
  let a = std::fs::read(out.join("detected_a.jpg"))?;
  assert_eq!(image::guess_format(&a)?, ImageFormat::Png);

  let rows: Vec<DetectionRow> =
    serde_json::from_slice(&std::fs::read(out.join("detected_a.jpg.json"))?)?;
  assert!(rows.is_empty());
  let rows: Vec<DetectionRow> =
    serde_json::from_slice(&std::fs::read(out.join("detected_b.png.json"))?)?;
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].class, "Glioma");
  Ok(())
}

#[test]
fn missing_input_file_is_reported_and_batch_continues() -> anyhow::Result<()> {
  let dir = tempfile::tempdir()?;
  let good = dir.path().join("good.png");
  std::fs::write(&good, rgba_png(64))?;

  let model = ScriptedModel::new([two_detections()]);
  let draw = Draw::new()?;
  let input = ImageFileInput::from_paths([dir.path().join("missing.png"), good]);

  let outcomes = BatchTask::new(&draw).run_task(input, &model, &Discard)?;

  assert_eq!(outcomes.len(), 2);
  assert!(matches!(
    &outcomes[0],
    FileOutcome::Failed { filename, error: TaskError::Upload(UploadError::Read { .. }) }
      if filename == "missing.png"
  ));
  assert!(outcomes[1].is_detected());
  assert_eq!(model.seen(), vec![(64, 64)]);
  Ok(())
}

#[test]
fn output_failure_is_recorded_per_file() -> anyhow::Result<()> {
  let dir = tempfile::tempdir()?;
  // 输出目录实际是一个普通文件，写入必然失败
  let blocked = dir.path().join("blocked");
  std::fs::write(&blocked, b"")?;

  let model = ScriptedModel::new([two_detections(), DetectResult::default()]);
  let draw = Draw::new()?;
  let uploads = vec![
    Ok(UploadedImage::new("a.png", rgba_png(32))),
    Ok(UploadedImage::new("b.png", rgba_png(32))),
  ];
  let output = DirectoryRecordOutput::new(&blocked);

  let outcomes = BatchTask::new(&draw).run_task(uploads.into_iter(), &model, &output)?;

  assert_eq!(model.seen(), vec![(32, 32), (32, 32)]);
  assert_eq!(outcomes.len(), 2);
  for (outcome, name) in outcomes.iter().zip(["a.png", "b.png"]) {
    assert_eq!(outcome.filename(), name);
    assert!(matches!(
      outcome,
      FileOutcome::Failed { error: TaskError::Output(_), .. }
    ));
  }
  Ok(())
}

#[test]
fn uploads_with_the_same_name_do_not_overwrite_each_other() -> anyhow::Result<()> {
  let dir = tempfile::tempdir()?;
  let model = ScriptedModel::new([two_detections(), DetectResult::default()]);
  let draw = Draw::new()?;
  let uploads = vec![
    Ok(UploadedImage::new("scan.png", rgba_png(512))),
    Ok(UploadedImage::new("scan.png", rgba_png(512))),
  ];
  let output = DirectoryRecordOutput::new(dir.path());

  let outcomes = BatchTask::new(&draw).run_task(uploads.into_iter(), &model, &output)?;
  assert!(outcomes.iter().all(FileOutcome::is_detected));

  let first: Vec<DetectionRow> =
    serde_json::from_slice(&std::fs::read(dir.path().join("detected_scan.png.json"))?)?;
  let second: Vec<DetectionRow> =
    serde_json::from_slice(&std::fs::read(dir.path().join("detected_scan_1.png.json"))?)?;
  assert_eq!(first.len(), 2);
  assert!(second.is_empty());
  Ok(())
}
