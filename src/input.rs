// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/input.rs - 视频帧输入源
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

use thiserror::Error;
use tracing::info;

use crate::{
  config::CaptureConfig,
  frame::{FrameError, RawFrame},
};

mod memory_source;
pub use self::memory_source::MemorySource;

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::V4l2Source;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerFileSource, GStreamerInputError};

#[derive(Error, Debug)]
pub enum AcquireError {
  #[error("设备错误: {0}")]
  Device(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("解码错误: {0}")]
  Decode(String),
  #[error("等待帧超时")]
  Timeout,
  #[error("上一帧尚未释放，无法获取新帧")]
  BufferStillHeld,
  #[error("没有可释放的帧")]
  NothingToRelease,
  #[error("帧数据无效: {0}")]
  InvalidFrame(#[from] FrameError),
  #[error("不支持的输入源: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerInputError),
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// V4L2 摄像头
  LiveDevice,
  /// 视频文件
  FileDecoder,
  /// 内存中的帧序列
  Memory,
}

/// 帧输入源
///
/// 每次只有一帧在外：`acquire` 得到的帧必须先 `release`，才能再次 `acquire`，
/// 否则返回 [`AcquireError::BufferStillHeld`]。`Ok(None)` 表示流正常结束。
pub trait FrameSource {
  fn kind(&self) -> SourceKind;

  fn acquire(&mut self) -> Result<Option<RawFrame<'_>>, AcquireError>;

  fn release(&mut self) -> Result<(), AcquireError>;

  /// 当前是否持有一帧未释放
  fn is_holding(&self) -> bool;

  /// 停止采集，可重复调用
  fn stop(&mut self) -> Result<(), AcquireError> {
    Ok(())
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn acquire(&mut self) -> Result<Option<RawFrame<'_>>, AcquireError> {
    (**self).acquire()
  }

  fn release(&mut self) -> Result<(), AcquireError> {
    (**self).release()
  }

  fn is_holding(&self) -> bool {
    (**self).is_holding()
  }

  fn stop(&mut self) -> Result<(), AcquireError> {
    (**self).stop()
  }
}

const V4L2_PREFIX: &str = "v4l2://";
const DEVICE_PREFIX: &str = "/dev/video";

/// 根据路径判断输入源类型
pub fn source_kind_of(source: &str) -> SourceKind {
  if source.starts_with(DEVICE_PREFIX) || source.starts_with(V4L2_PREFIX) {
    SourceKind::LiveDevice
  } else {
    SourceKind::FileDecoder
  }
}

/// 从路径创建输入源
///
/// `/dev/videoN` 或 `v4l2:///dev/videoN` 打开摄像头，其余路径按视频文件处理。
#[allow(unused_variables)]
pub fn open_source(source: &str, capture: &CaptureConfig) -> Result<Box<dyn FrameSource>, AcquireError> {
  match source_kind_of(source) {
    SourceKind::LiveDevice => {
      let device_path = source.trim_start_matches(V4L2_PREFIX);
      info!("打开 V4L2 设备: {}", device_path);
      #[cfg(feature = "v4l2_input")]
      {
        return Ok(Box::new(V4l2Source::open(device_path, capture)?));
      }
      #[cfg(not(feature = "v4l2_input"))]
      Err(AcquireError::Unsupported(format!(
        "{} (未启用 v4l2_input 特性)",
        device_path
      )))
    }
    _ => {
      info!("打开视频文件: {}", source);
      #[cfg(feature = "gstreamer_input")]
      {
        return Ok(Box::new(GStreamerFileSource::open(source, capture)?));
      }
      #[cfg(not(feature = "gstreamer_input"))]
      Err(AcquireError::Unsupported(format!(
        "{} (未启用 gstreamer_input 特性)",
        source
      )))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_paths_open_live_devices() {
    assert_eq!(source_kind_of("/dev/video0"), SourceKind::LiveDevice);
    assert_eq!(source_kind_of("v4l2:///dev/video2"), SourceKind::LiveDevice);
    assert_eq!(source_kind_of("clips/street.mp4"), SourceKind::FileDecoder);
  }
}
