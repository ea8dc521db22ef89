// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/tracker/kalman_filter.rs - 边界框卡尔曼滤波
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

//! 状态为 8 维 (cx, cy, a, h, vx, vy, va, vh) 的匀速模型，观测为前 4 维。

use ndarray::{Array1, Array2};

#[derive(Debug, Clone)]
pub struct KalmanFilter {
  motion_mat: Array2<f64>,
  update_mat: Array2<f64>,
  std_weight_position: f64,
  std_weight_velocity: f64,
}

impl Default for KalmanFilter {
  fn default() -> Self {
    Self::new()
  }
}

impl KalmanFilter {
  pub fn new() -> Self {
    let ndim = 4;
    let mut motion_mat = Array2::eye(2 * ndim);
    for i in 0..ndim {
      motion_mat[[i, ndim + i]] = 1.0;
    }

    let mut update_mat = Array2::zeros((ndim, 2 * ndim));
    for i in 0..ndim {
      update_mat[[i, i]] = 1.0;
    }

    Self {
      motion_mat,
      update_mat,
      std_weight_position: 1.0 / 20.0,
      std_weight_velocity: 1.0 / 160.0,
    }
  }

  pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
    let mut mean = Array1::zeros(8);
    for i in 0..4 {
      mean[i] = measurement[i];
    }

    let h = measurement[3];
    let std = [
      2.0 * self.std_weight_position * h,
      2.0 * self.std_weight_position * h,
      1e-2,
      2.0 * self.std_weight_position * h,
      10.0 * self.std_weight_velocity * h,
      10.0 * self.std_weight_velocity * h,
      1e-5,
      10.0 * self.std_weight_velocity * h,
    ];

    (mean, diagonal(&std))
  }

  pub fn predict(&self, mean: &Array1<f64>, covariance: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let h = mean[3];
    let std = [
      self.std_weight_position * h,
      self.std_weight_position * h,
      1e-2,
      self.std_weight_position * h,
      self.std_weight_velocity * h,
      self.std_weight_velocity * h,
      1e-5,
      self.std_weight_velocity * h,
    ];

    let new_mean = self.motion_mat.dot(mean);
    let new_covariance =
      self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + diagonal(&std);
    (new_mean, new_covariance)
  }

  fn project(&self, mean: &Array1<f64>, covariance: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let h = mean[3];
    let std = [
      self.std_weight_position * h,
      self.std_weight_position * h,
      1e-1,
      self.std_weight_position * h,
    ];

    let mean_proj = self.update_mat.dot(mean);
    let covariance_proj =
      self.update_mat.dot(covariance).dot(&self.update_mat.t()) + diagonal(&std);
    (mean_proj, covariance_proj)
  }

  /// 用观测修正状态；新息协方差不可逆时返回 `None`
  pub fn update(
    &self,
    mean: &Array1<f64>,
    covariance: &Array2<f64>,
    measurement: [f64; 4],
  ) -> Option<(Array1<f64>, Array2<f64>)> {
    let (projected_mean, projected_cov) = self.project(mean, covariance);
    let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

    // K = P * H^T * S^-1
    let s_inv = invert_4x4(&projected_cov)?;
    let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

    let new_mean = mean + &kalman_gain.dot(&innovation);
    let new_covariance = covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());
    Some((new_mean, new_covariance))
  }
}

fn diagonal(std: &[f64]) -> Array2<f64> {
  let mut m = Array2::zeros((std.len(), std.len()));
  for (i, s) in std.iter().enumerate() {
    m[[i, i]] = s * s;
  }
  m
}

fn invert_4x4(m: &Array2<f64>) -> Option<Array2<f64>> {
  let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
  let inv = nm.try_inverse()?;
  Some(Array2::from_shape_fn((4, 4), |(i, j)| inv[(i, j)]))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_initiate() {
    let kf = KalmanFilter::new();
    let (mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
    assert_eq!(mean[0], 100.0);
    assert_eq!(mean[7], 0.0);
    assert!(cov[[0, 0]] > 0.0);
  }

  #[test]
  fn update_moves_towards_measurement() {
    let kf = KalmanFilter::new();
    let (mean, cov) = kf.initiate([100.0, 100.0, 1.0, 40.0]);
    let (mean, cov) = kf.predict(&mean, &cov);
    let (mean, _) = kf.update(&mean, &cov, [110.0, 100.0, 1.0, 40.0]).unwrap();
    assert!(mean[0] > 100.0 && mean[0] < 110.0);
  }

  #[test]
  fn singular_innovation_is_rejected() {
    let kf = KalmanFilter::new();
    let mean = Array1::zeros(8);
    let cov = Array2::zeros((8, 8));
    // h = 0 时投影协方差只在第 3 维非零
    assert!(kf.update(&mean, &cov, [0.0; 4]).is_none());
  }
}
