// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件解码输入
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

//! # GStreamer 视频文件输入模块
//!
//! 打开容器文件，选择第一路视频流并为其创建解码器，每个解码帧转换一次为打包 RGB，
//! 再经 appsink 以解码器持有的缓冲区形式交给流水线。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 背压
//!
//! appsink 只缓存一帧且不丢帧，流水线未释放当前帧时解码线程会阻塞等待。

use std::path::Path;
use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{AcquireError, FrameSource, SourceKind};
use crate::{
  config::CaptureConfig,
  frame::{PixelLayout, RawFrame},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 解码器持有的当前帧
struct HeldSample {
  map: gst::MappedBuffer<gst::buffer::Readable>,
  width: u32,
  height: u32,
  stride: usize,
  layout: PixelLayout,
}

/// 基于 GStreamer 的视频文件输入源
pub struct GStreamerFileSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  timeout: Option<Duration>,
  held: Option<HeldSample>,
  frame_index: u64,
  stopped: bool,
}

impl GStreamerFileSource {
  fn pipeline_description(path: &str) -> String {
    format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink max-buffers=1 drop=false sync=false",
      path
    )
  }

  pub fn open(path: &str, capture: &CaptureConfig) -> Result<Self, GStreamerInputError> {
    if !Path::new(path).is_file() {
      return Err(GStreamerInputError::PipelineError(format!(
        "无法打开视频文件: {}",
        path
      )));
    }

    gst::init()?;

    let description = Self::pipeline_description(path);
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsink,
      timeout: capture.acquire_timeout,
      held: None,
      frame_index: 0,
      stopped: false,
    })
  }

  /// 检查总线上是否有解码错误
  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    while let Some(message) = bus.pop_filtered(&[gst::MessageType::Error]) {
      if let gst::MessageView::Error(err) = message.view() {
        error!("GStreamer 错误: {} ({:?})", err.error(), err.debug());
        return Some(err.error().to_string());
      }
    }
    None
  }

  fn hold_sample(sample: gst::Sample) -> Result<HeldSample, GStreamerInputError> {
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let layout = match video_info.format() {
      gst_video::VideoFormat::Rgb => PixelLayout::Rgb24,
      gst_video::VideoFormat::Bgr => PixelLayout::Bgr24,
      other => return Err(GStreamerInputError::UnsupportedFormat(other)),
    };

    let buffer = sample
      .buffer_owned()
      .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
    let map = buffer.into_mapped_buffer_readable().map_err(|_| {
      GStreamerInputError::PipelineError("Failed to map buffer for reading".to_string())
    })?;

    Ok(HeldSample {
      map,
      width: video_info.width(),
      height: video_info.height(),
      stride: video_info.stride()[0] as usize,
      layout,
    })
  }
}

/// 既无总线错误也未到达 EOS 时取不到帧：只有设置了等待时间才算超时
fn missing_sample_error(timeout: Option<Duration>) -> AcquireError {
  match timeout {
    Some(_) => AcquireError::Timeout,
    None => AcquireError::Decode("pull_sample failed".to_string()),
  }
}

impl Drop for GStreamerFileSource {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FrameSource for GStreamerFileSource {
  fn kind(&self) -> SourceKind {
    SourceKind::FileDecoder
  }

  fn acquire(&mut self) -> Result<Option<RawFrame<'_>>, AcquireError> {
    if self.held.is_some() {
      return Err(AcquireError::BufferStillHeld);
    }
    if self.stopped {
      return Ok(None);
    }

    let sample = match self.timeout {
      Some(timeout) => self
        .appsink
        .try_pull_sample(gst::ClockTime::from_nseconds(timeout.as_nanos() as u64)),
      None => self.appsink.pull_sample().ok(),
    };

    let Some(sample) = sample else {
      if let Some(message) = self.bus_error() {
        return Err(AcquireError::Decode(message));
      }
      if self.appsink.is_eos() {
        info!("视频文件解码结束, 共 {} 帧", self.frame_index);
        return Ok(None);
      }
      return Err(missing_sample_error(self.timeout));
    };

    let held = self.held.insert(Self::hold_sample(sample)?);
    self.frame_index += 1;
    debug!(
      "解码第 {} 帧: {}x{} 行跨度 {}",
      self.frame_index, held.width, held.height, held.stride
    );

    let frame = RawFrame::with_stride(
      held.map.as_slice(),
      held.width,
      held.height,
      held.stride,
      held.layout,
    )?;
    Ok(Some(frame))
  }

  fn release(&mut self) -> Result<(), AcquireError> {
    // 丢弃映射即把缓冲区归还给解码器
    self
      .held
      .take()
      .map(drop)
      .ok_or(AcquireError::NothingToRelease)
  }

  fn is_holding(&self) -> bool {
    self.held.is_some()
  }

  fn stop(&mut self) -> Result<(), AcquireError> {
    self.held.take();
    if !self.stopped {
      self.stopped = true;
      info!("停止 GStreamer 解码管道");
      self
        .pipeline
        .set_state(gst::State::Null)
        .map_err(GStreamerInputError::from)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_sample_is_timeout_only_with_deadline() {
    assert!(matches!(
      missing_sample_error(Some(Duration::from_millis(100))),
      AcquireError::Timeout
    ));
    assert!(matches!(missing_sample_error(None), AcquireError::Decode(_)));
  }
}
