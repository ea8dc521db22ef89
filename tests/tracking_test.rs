// 该文件是 Yanxi （燕溪） 项目的一部分。
// tests/tracking_test.rs - 跟踪适配层集成测试
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

use yanxi::{
  model::{BoundingBox, Detection, DetectionBatch},
  tracker::{TrackObject, TrackerConfig, TrackingAdapter},
};

fn batch(detections: &[(f32, f32, f32, f32, u32, f32)]) -> DetectionBatch {
  let mut batch = DetectionBatch::default();
  for &(left, top, right, bottom, class_id, score) in detections {
    batch
      .push(Detection {
        class_id,
        score,
        bbox: BoundingBox::new(left, top, right, bottom),
      })
      .unwrap();
  }
  batch
}

fn adapter() -> TrackingAdapter {
  TrackingAdapter::with_config(TrackerConfig::default())
}

#[test]
fn overlapping_boxes_keep_track_id() {
  let mut tracking = adapter();

  let first = tracking.update(&batch(&[(10.0, 10.0, 50.0, 50.0, 0, 0.9)]), 0).unwrap();
  let second = tracking.update(&batch(&[(12.0, 11.0, 52.0, 51.0, 0, 0.9)]), 1).unwrap();

  assert_eq!(first.len(), 1);
  assert_eq!(second.len(), 1);
  assert_eq!(first[0].track_id, second[0].track_id);
}

#[test]
fn empty_batch_yields_no_tracks() {
  let mut tracking = adapter();
  assert!(tracking.update(&DetectionBatch::default(), 0).unwrap().is_empty());
  assert_eq!(tracking.updates(), 1);
}

#[test]
fn track_input_uses_horizontal_width() {
  let det = Detection {
    class_id: 2,
    score: 0.7,
    bbox: BoundingBox::new(10.0, 20.0, 110.0, 60.0),
  };
  let object = TrackObject::from(&det);

  assert_eq!(object.cx, 60.0);
  assert_eq!(object.cy, 40.0);
  assert_eq!(object.width, 100.0);
  assert_eq!(object.height, 40.0);
  assert_eq!(object.class_id, 2);
}

#[test]
fn first_frame_box_is_returned_unchanged() {
  let mut tracking = adapter();
  let tracks = tracking.update(&batch(&[(10.0, 20.0, 110.0, 60.0, 0, 0.9)]), 0).unwrap();

  let bbox = tracks[0].bbox;
  assert!((bbox.left - 10.0).abs() < 1e-3);
  assert!((bbox.top - 20.0).abs() < 1e-3);
  assert!((bbox.right - 110.0).abs() < 1e-3);
  assert!((bbox.bottom - 60.0).abs() < 1e-3);
}

#[test]
fn class_is_carried_through() {
  let mut tracking = adapter();
  let tracks = tracking.update(&batch(&[(100.0, 100.0, 160.0, 140.0, 2, 0.8)]), 0).unwrap();
  assert_eq!(tracks[0].class_id, 2);
}

#[test]
fn separate_objects_get_distinct_ids() {
  let mut tracking = adapter();
  let detections = [
    (10.0, 10.0, 50.0, 50.0, 0, 0.9),
    (300.0, 200.0, 360.0, 280.0, 0, 0.9),
  ];

  let first = tracking.update(&batch(&detections), 0).unwrap();
  let second = tracking.update(&batch(&detections), 1).unwrap();

  assert_eq!(first.len(), 2);
  assert_ne!(first[0].track_id, first[1].track_id);

  let mut first_ids: Vec<u64> = first.iter().map(|t| t.track_id).collect();
  let mut second_ids: Vec<u64> = second.iter().map(|t| t.track_id).collect();
  first_ids.sort_unstable();
  second_ids.sort_unstable();
  assert_eq!(first_ids, second_ids);
}

#[test]
fn frame_indices_must_be_consecutive() {
  let mut tracking = adapter();
  let empty = DetectionBatch::default();
  assert!(tracking.update(&empty, 1).is_err());
  for index in 0..5 {
    tracking.update(&empty, index).unwrap();
  }
  assert!(tracking.update(&empty, 4).is_err());
  assert_eq!(tracking.updates(), 5);
}
