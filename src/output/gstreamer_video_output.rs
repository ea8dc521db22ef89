// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 显示与视频文件输出
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

//! # GStreamer 输出模块
//!
//! ## URL Scheme
//!
//! - `gst://display` 在窗口中实时显示
//! - `gst:///path/to/output.mp4?fps=20` 编码保存为视频文件
//!
//! ## 支持的文件格式
//!
//! - **MP4** (H.264)，未识别的扩展名也按 MP4 处理
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  output::FrameSink,
  tracker::TrackedObject,
};

/// 等待编码器处理完 EOS 的最长时间
const EOS_TIMEOUT_SECS: u64 = 5;

/// GStreamer 输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

pub struct GStreamerVideoOutput<const W: u32, const H: u32> {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: u32,
  frame_count: u64,
  finished: bool,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for GStreamerVideoOutput<W, H> {
  const SCHEME: &'static str = "gst";
}

fn pipeline_description(url: &Url) -> String {
  if url.host_str() == Some("display") {
    return "appsrc name=src ! videoconvert ! autovideosink sync=false".to_string();
  }

  let file_path = url.path();
  let (encoder, muxer) = if file_path.ends_with(".mkv") {
    ("x264enc speed-preset=fast ! h264parse", "matroskamux")
  } else if file_path.ends_with(".avi") {
    ("x264enc ! h264parse", "avimux")
  } else if file_path.ends_with(".webm") {
    ("vp8enc", "webmmux")
  } else {
    (
      "x264enc speed-preset=fast tune=zerolatency ! h264parse",
      "mp4mux",
    )
  };
  format!(
    "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! {} ! filesink location=\"{}\"",
    encoder, muxer, file_path
  )
}

impl<const W: u32, const H: u32> FromUrl for GStreamerVideoOutput<W, H> {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    gst::init()?;

    let fps: u32 = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse().ok())
      .filter(|&fps| fps > 0)
      .unwrap_or(20);

    let description = pipeline_description(url);
    info!("创建输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", W as i32)
      .field("height", H as i32)
      .field("framerate", gst::Fraction::new(fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("输出初始化完成: {}x{} @ {} fps", W, H, fps);

    Ok(Self {
      pipeline,
      appsrc,
      fps,
      frame_count: 0,
      finished: false,
    })
  }
}

impl<const W: u32, const H: u32> GStreamerVideoOutput<W, H> {
  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    let frame_duration = 1_000_000_000 / self.fps as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * frame_duration,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

impl<const W: u32, const H: u32> FrameSink<RgbNhwcFrame<W, H>> for GStreamerVideoOutput<W, H> {
  type Error = GStreamerVideoOutputError;

  fn write_frame(
    &mut self,
    frame: &RgbNhwcFrame<W, H>,
    tracks: &[TrackedObject],
  ) -> Result<(), Self::Error> {
    debug!("输出第 {} 帧, {} 条轨迹", self.frame_count, tracks.len());
    self.push_frame(frame.as_nhwc())
  }

  /// 发送 EOS 并等待文件写完
  fn finish(&mut self) -> Result<(), Self::Error> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("发送 EOS 失败: {:?}", e);
    } else if let Some(bus) = self.pipeline.bus() {
      let timeout = gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS);
      if let Some(message) =
        bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error])
        && let gst::MessageView::Error(err) = message.view()
      {
        warn!("输出管道错误: {} ({:?})", err.error(), err.debug());
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!("输出关闭, 共写入 {} 帧", self.frame_count);
    Ok(())
  }
}

impl<const W: u32, const H: u32> Drop for GStreamerVideoOutput<W, H> {
  fn drop(&mut self) {
    if let Err(e) = FrameSink::<RgbNhwcFrame<W, H>>::finish(self) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
  }
}
