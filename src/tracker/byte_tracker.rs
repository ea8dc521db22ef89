// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker/byte_tracker.rs - ByteTrack 多目标跟踪
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

use std::collections::HashSet;

use tracing::trace;

use super::{
  Tracker, TrackerConfig, TrackObject, TrackOutput,
  kalman_filter::KalmanFilter,
  matching::{self, AssignmentResult},
  rect::{Rect, iou_batch},
  strack::STrack,
  track_state::TrackState,
};

/// 低于该分数的检测不参与任何关联
const LOW_SCORE_FLOOR: f32 = 0.1;
const SECOND_MATCH_THRESH: f32 = 0.5;
const UNCONFIRMED_MATCH_THRESH: f32 = 0.7;
const DUPLICATE_IOU: f32 = 0.85;

pub struct ByteTracker {
  tracked_stracks: Vec<STrack>,
  lost_stracks: Vec<STrack>,
  frame_id: u32,
  config: TrackerConfig,
  max_time_lost: u32,
  kalman_filter: KalmanFilter,
  /// 每个跟踪器独立编号，从 1 开始
  next_id: u64,
}

impl ByteTracker {
  pub fn new(config: TrackerConfig) -> Self {
    let max_time_lost = (config.frame_rate / 30.0 * config.track_buffer as f32) as u32;
    Self {
      tracked_stracks: Vec::new(),
      lost_stracks: Vec::new(),
      frame_id: 0,
      config,
      max_time_lost,
      kalman_filter: KalmanFilter::default(),
      next_id: 0,
    }
  }

  pub fn config(&self) -> &TrackerConfig {
    &self.config
  }

  /// 丢失多少帧后删除轨迹
  pub fn max_time_lost(&self) -> u32 {
    self.max_time_lost
  }

  fn next_track_id(&mut self) -> u64 {
    self.next_id += 1;
    self.next_id
  }

  fn step(&mut self, objects: &[TrackObject]) -> Vec<STrack> {
    self.frame_id += 1;
    let kf = &self.kalman_filter;

    let mut activated_stracks = Vec::new();
    let mut refind_stracks = Vec::new();
    let mut lost_stracks = Vec::new();

    // 按分数分为高分与低分两组
    let mut detections = Vec::new();
    let mut detections_low = Vec::new();
    for obj in objects {
      let track = STrack::new(
        Rect::from_center(obj.cx, obj.cy, obj.width, obj.height),
        obj.score,
        obj.class_id,
      );
      if obj.score >= self.config.track_thresh {
        detections.push(track);
      } else if obj.score > LOW_SCORE_FLOOR {
        detections_low.push(track);
      }
    }

    let (tracked, mut unconfirmed): (Vec<_>, Vec<_>) = self
      .tracked_stracks
      .drain(..)
      .partition(|t| t.is_activated);
    let mut strack_pool = joint_stracks(tracked, &self.lost_stracks);

    // 第一次关联：高分检测
    for track in strack_pool.iter_mut() {
      track.predict(kf);
    }
    let mut dists = matching::iou_distance(&rects(&strack_pool), &rects(&detections));
    matching::fuse_score(&mut dists, &scores(&detections));
    let AssignmentResult {
      matches,
      unmatched_tracks,
      unmatched_detections,
    } = matching::linear_assignment(&dists, self.config.match_thresh);

    for (itracked, idet) in matches {
      let mut track = strack_pool[itracked].clone();
      if track.state == TrackState::Tracked {
        track.update(&detections[idet], kf, self.frame_id);
        activated_stracks.push(track);
      } else {
        track.re_activate(&detections[idet], kf, self.frame_id);
        refind_stracks.push(track);
      }
    }

    // 第二次关联：未匹配的轨迹与低分检测
    let r_tracked_stracks: Vec<STrack> = unmatched_tracks
      .iter()
      .map(|&idx| &strack_pool[idx])
      .filter(|t| t.state == TrackState::Tracked)
      .cloned()
      .collect();
    let dists_second = matching::iou_distance(&rects(&r_tracked_stracks), &rects(&detections_low));
    let AssignmentResult {
      matches: matches_second,
      unmatched_tracks: unmatched_tracks_second,
      ..
    } = matching::linear_assignment(&dists_second, SECOND_MATCH_THRESH);

    for (itracked, idet) in matches_second {
      let mut track = r_tracked_stracks[itracked].clone();
      track.update(&detections_low[idet], kf, self.frame_id);
      activated_stracks.push(track);
    }
    for idx in unmatched_tracks_second {
      let mut track = r_tracked_stracks[idx].clone();
      track.mark_lost();
      lost_stracks.push(track);
    }

    // 只出现过一帧的未确认轨迹
    let detections_rem: Vec<STrack> = unmatched_detections
      .iter()
      .map(|&idx| detections[idx].clone())
      .collect();
    let mut dists_unconfirmed =
      matching::iou_distance(&rects(&unconfirmed), &rects(&detections_rem));
    matching::fuse_score(&mut dists_unconfirmed, &scores(&detections_rem));
    let AssignmentResult {
      matches: matches_unconfirmed,
      unmatched_tracks: unmatched_unconfirmed,
      unmatched_detections: unmatched_new,
    } = matching::linear_assignment(&dists_unconfirmed, UNCONFIRMED_MATCH_THRESH);

    for (itracked, idet) in matches_unconfirmed {
      unconfirmed[itracked].update(&detections_rem[idet], kf, self.frame_id);
      activated_stracks.push(unconfirmed[itracked].clone());
    }
    for idx in unmatched_unconfirmed {
      unconfirmed[idx].mark_removed();
    }

    // 新建轨迹
    for idx in unmatched_new {
      let mut track = detections_rem[idx].clone();
      if track.score < self.config.high_thresh {
        continue;
      }
      let id = self.next_track_id();
      track.activate(&self.kalman_filter, self.frame_id, id);
      activated_stracks.push(track);
    }

    // 清理丢失过久的轨迹
    for track in self.lost_stracks.drain(..) {
      if self.frame_id - track.end_frame() <= self.max_time_lost {
        lost_stracks.push(track);
      } else {
        trace!("删除轨迹 #{}", track.track_id);
      }
    }

    let tracked_stracks: Vec<STrack> = activated_stracks
      .into_iter()
      .chain(refind_stracks)
      .filter(|t| t.state == TrackState::Tracked)
      .collect();
    let lost_stracks = sub_stracks(lost_stracks, &tracked_stracks);
    let (tracked, lost) = remove_duplicate_stracks(tracked_stracks, lost_stracks);
    self.tracked_stracks = tracked;
    self.lost_stracks = lost;

    self
      .tracked_stracks
      .iter()
      .filter(|t| t.is_activated)
      .cloned()
      .collect()
  }
}

impl Tracker for ByteTracker {
  fn update(&mut self, objects: &[TrackObject]) -> Vec<TrackOutput> {
    self
      .step(objects)
      .into_iter()
      .map(|t| TrackOutput {
        track_id: t.track_id,
        rect: t.rect(),
        score: t.score,
        class_id: t.class_id,
      })
      .collect()
  }
}

fn rects(tracks: &[STrack]) -> Vec<Rect> {
  tracks.iter().map(STrack::rect).collect()
}

fn scores(tracks: &[STrack]) -> Vec<f32> {
  tracks.iter().map(|t| t.score).collect()
}

fn joint_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
  let mut exists: HashSet<u64> = tlista.iter().map(|t| t.track_id).collect();
  let mut res = tlista;
  for t in tlistb {
    if exists.insert(t.track_id) {
      res.push(t.clone());
    }
  }
  res
}

fn sub_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
  let b_ids: HashSet<u64> = tlistb.iter().map(|t| t.track_id).collect();
  tlista
    .into_iter()
    .filter(|t| !b_ids.contains(&t.track_id))
    .collect()
}

/// 跟踪中与丢失的轨迹高度重叠时，保留存活更久的一条
fn remove_duplicate_stracks(
  stracksa: Vec<STrack>,
  stracksb: Vec<STrack>,
) -> (Vec<STrack>, Vec<STrack>) {
  if stracksa.is_empty() || stracksb.is_empty() {
    return (stracksa, stracksb);
  }

  let ious = iou_batch(&rects(&stracksa), &rects(&stracksb));
  let mut dupa = vec![false; stracksa.len()];
  let mut dupb = vec![false; stracksb.len()];

  for ((i, j), &iou) in ious.indexed_iter() {
    if iou > DUPLICATE_IOU {
      let time_a = stracksa[i].frame_id - stracksa[i].start_frame;
      let time_b = stracksb[j].frame_id - stracksb[j].start_frame;
      if time_a > time_b {
        dupb[j] = true;
      } else {
        dupa[i] = true;
      }
    }
  }

  let keep = |list: Vec<STrack>, dup: &[bool]| -> Vec<STrack> {
    list
      .into_iter()
      .zip(dup)
      .filter(|(_, d)| !**d)
      .map(|(t, _)| t)
      .collect()
  };
  (keep(stracksa, &dupa), keep(stracksb, &dupb))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn object(cx: f32, cy: f32, score: f32) -> TrackObject {
    TrackObject {
      cx,
      cy,
      width: 40.0,
      height: 40.0,
      class_id: 0,
      score,
    }
  }

  #[test]
  fn low_score_detection_does_not_start_track() {
    let mut tracker = ByteTracker::new(TrackerConfig::default());
    // 介于 track_thresh 与 high_thresh 之间
    assert!(tracker.update(&[object(30.0, 30.0, 0.25)]).is_empty());
  }

  #[test]
  fn ids_are_per_tracker() {
    let mut a = ByteTracker::new(TrackerConfig::default());
    let mut b = ByteTracker::new(TrackerConfig::default());
    let ta = a.update(&[object(30.0, 30.0, 0.9)]);
    let tb = b.update(&[object(300.0, 300.0, 0.9)]);
    assert_eq!(ta[0].track_id, 1);
    assert_eq!(tb[0].track_id, 1);
  }

  #[test]
  fn lost_track_ages_out() {
    let config = TrackerConfig {
      frame_rate: 30.0,
      track_buffer: 2,
      ..TrackerConfig::default()
    };
    let mut tracker = ByteTracker::new(config);
    assert_eq!(tracker.max_time_lost(), 2);
    tracker.update(&[object(30.0, 30.0, 0.9)]);
    for _ in 0..4 {
      assert!(tracker.update(&[]).is_empty());
    }
    // 原位置再次出现时分配新编号，第二次匹配后确认
    assert!(tracker.update(&[object(30.0, 30.0, 0.9)]).is_empty());
    let tracks = tracker.update(&[object(30.0, 30.0, 0.9)]);
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, 2);
  }
}
