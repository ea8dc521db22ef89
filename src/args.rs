// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use yanxi::{
  config::{CaptureConfig, InferFailurePolicy, PipelineConfig, RenderMode},
  tracker::TrackerConfig,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnInferError {
  /// 终止运行
  Abort,
  /// 跳过该帧
  Skip,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
  Tracks,
  Detections,
  Both,
}

/// Yanxi 检测跟踪流水线
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型文件路径
  #[arg(value_name = "MODEL")]
  pub model: String,

  /// 输入来源
  /// - V4L2: /dev/video0 或 v4l2:///dev/video0
  /// - 视频: *.mp4, *.avi, *.mkv 等
  #[arg(value_name = "SOURCE")]
  pub source: String,

  /// 输出地址: null:, folder:///dir, gst://display, gst:///file.mp4
  #[arg(long, default_value = "null:", value_name = "URL")]
  pub output: String,

  /// 最大处理帧数，不指定表示直到流结束
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 推理失败时的处理方式
  #[arg(long, value_enum, default_value_t = OnInferError::Abort)]
  pub on_infer_error: OnInferError,

  /// 绘制内容
  #[arg(long, value_enum, default_value_t = Render::Tracks)]
  pub render: Render,

  /// 标签字体 (TTF)，不指定时只绘制边框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[arg(long, default_value_t = 800)]
  pub capture_width: u32,

  #[arg(long, default_value_t = 600)]
  pub capture_height: u32,

  #[arg(long, default_value_t = 20)]
  pub capture_fps: u32,

  /// 等待一帧的最长时间（毫秒），不指定表示无限等待
  #[arg(long, value_name = "MS")]
  pub acquire_timeout_ms: Option<u64>,

  #[arg(long, default_value_t = 10.0)]
  pub track_frame_rate: f32,

  #[arg(long, default_value_t = 100)]
  pub track_buffer: u32,

  #[arg(long, default_value_t = 0.2)]
  pub track_thresh: f32,

  #[arg(long, default_value_t = 0.3)]
  pub high_thresh: f32,

  #[arg(long, default_value_t = 0.8)]
  pub match_thresh: f32,
}

impl Args {
  pub fn capture_config(&self) -> CaptureConfig {
    CaptureConfig {
      width: self.capture_width,
      height: self.capture_height,
      fps: self.capture_fps,
      acquire_timeout: self.acquire_timeout_ms.map(Duration::from_millis),
    }
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      confidence_threshold: self.confidence,
      on_infer_error: match self.on_infer_error {
        OnInferError::Abort => InferFailurePolicy::Abort,
        OnInferError::Skip => InferFailurePolicy::Skip,
      },
      max_frames: self.max_frames,
      render: match self.render {
        Render::Tracks => RenderMode::Tracks,
        Render::Detections => RenderMode::Detections,
        Render::Both => RenderMode::Both,
      },
      tracker: TrackerConfig {
        frame_rate: self.track_frame_rate,
        track_buffer: self.track_buffer,
        track_thresh: self.track_thresh,
        high_thresh: self.high_thresh,
        match_thresh: self.match_thresh,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_library_defaults() {
    let args = Args::parse_from(["yanxi", "model.rknn", "/dev/video0"]);
    assert_eq!(args.capture_config(), CaptureConfig::default());
    assert_eq!(args.pipeline_config(), PipelineConfig::default());
    assert_eq!(args.output, "null:");
  }

  #[test]
  fn skip_policy_and_timeout_are_parsed() {
    let args = Args::parse_from([
      "yanxi",
      "model.rknn",
      "video.mp4",
      "--on-infer-error",
      "skip",
      "--acquire-timeout-ms",
      "500",
    ]);
    assert_eq!(args.pipeline_config().on_infer_error, InferFailurePolicy::Skip);
    assert_eq!(
      args.capture_config().acquire_timeout,
      Some(Duration::from_millis(500))
    );
  }
}
