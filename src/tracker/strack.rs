// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker/strack.rs - 单条轨迹
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

use ndarray::{Array1, Array2};

use super::{kalman_filter::KalmanFilter, rect::Rect, track_state::TrackState};

#[derive(Debug, Clone)]
pub struct STrack {
  /// 0 表示尚未分配
  pub track_id: u64,
  pub state: TrackState,
  pub is_activated: bool,
  pub score: f32,
  pub class_id: u32,
  pub frame_id: u32,
  pub start_frame: u32,
  pub tracklet_len: u32,
  mean: Option<Array1<f64>>,
  covariance: Option<Array2<f64>>,
  /// 检测框，滤波器初始化前使用
  tlwh: Rect,
}

fn xyah_f64(rect: &Rect) -> [f64; 4] {
  rect.to_xyah().map(f64::from)
}

impl STrack {
  pub fn new(tlwh: Rect, score: f32, class_id: u32) -> Self {
    Self {
      track_id: 0,
      state: TrackState::New,
      is_activated: false,
      score,
      class_id,
      frame_id: 0,
      start_frame: 0,
      tracklet_len: 0,
      mean: None,
      covariance: None,
      tlwh,
    }
  }

  /// 当前估计的边界框
  pub fn rect(&self) -> Rect {
    match &self.mean {
      Some(mean) => Rect::from_xyah(mean[0] as f32, mean[1] as f32, mean[2] as f32, mean[3] as f32),
      None => self.tlwh,
    }
  }

  pub fn end_frame(&self) -> u32 {
    self.frame_id
  }

  pub fn activate(&mut self, kalman_filter: &KalmanFilter, frame_id: u32, track_id: u64) {
    self.track_id = track_id;

    let (mean, covariance) = kalman_filter.initiate(xyah_f64(&self.tlwh));
    self.mean = Some(mean);
    self.covariance = Some(covariance);
    self.tracklet_len = 0;
    self.state = TrackState::Tracked;
    // 只有第一帧出现的轨迹直接确认，其余需要再匹配一次
    self.is_activated = frame_id == 1;
    self.frame_id = frame_id;
    self.start_frame = frame_id;
  }

  pub fn re_activate(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
    self.correct(detection, kalman_filter);
    self.tracklet_len = 0;
    self.state = TrackState::Tracked;
    self.is_activated = true;
    self.frame_id = frame_id;
    self.score = detection.score;
    self.class_id = detection.class_id;
  }

  pub fn update(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
    self.frame_id = frame_id;
    self.tracklet_len += 1;
    self.correct(detection, kalman_filter);
    self.state = TrackState::Tracked;
    self.is_activated = true;
    self.score = detection.score;
    self.class_id = detection.class_id;
  }

  /// 卡尔曼修正；协方差退化时保留先验
  fn correct(&mut self, detection: &STrack, kalman_filter: &KalmanFilter) {
    if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance)
      && let Some((new_mean, new_cov)) = kalman_filter.update(mean, cov, xyah_f64(&detection.tlwh))
    {
      self.mean = Some(new_mean);
      self.covariance = Some(new_cov);
    }
  }

  pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
    if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
      let mut mean_to_predict = mean.clone();
      if self.state != TrackState::Tracked {
        mean_to_predict[7] = 0.0;
      }
      let (new_mean, new_cov) = kalman_filter.predict(&mean_to_predict, cov);
      self.mean = Some(new_mean);
      self.covariance = Some(new_cov);
    }
  }

  pub fn mark_lost(&mut self) {
    self.state = TrackState::Lost;
  }

  pub fn mark_removed(&mut self) {
    self.state = TrackState::Removed;
  }
}
