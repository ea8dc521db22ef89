// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::time::Duration;

use crate::tracker::TrackerConfig;

/// 摄像头采集参数
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
  pub width: u32,
  pub height: u32,
  pub fps: u32,
  /// 等待一帧的最长时间，`None` 表示无限等待
  pub acquire_timeout: Option<Duration>,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      width: 800,
      height: 600,
      fps: 20,
      acquire_timeout: None,
    }
  }
}

/// 推理失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferFailurePolicy {
  /// 终止本次运行
  #[default]
  Abort,
  /// 跳过该帧，释放缓冲区后继续；该帧不更新跟踪器
  Skip,
}

/// 绘制内容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
  #[default]
  Tracks,
  Detections,
  Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 检测置信度下限
  pub confidence_threshold: f32,
  pub on_infer_error: InferFailurePolicy,
  /// 处理到该帧数后停止，`None` 表示直到流结束
  pub max_frames: Option<u64>,
  pub render: RenderMode,
  pub tracker: TrackerConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.25,
      on_infer_error: InferFailurePolicy::Abort,
      max_frames: None,
      render: RenderMode::Tracks,
      tracker: TrackerConfig::default(),
    }
  }
}
