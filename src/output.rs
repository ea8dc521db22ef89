// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame, tracker::TrackedObject};

pub mod draw;

#[cfg(feature = "save_image_file")]
mod directory_record;
#[cfg(feature = "save_image_file")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

/// 接收绘制完成的帧，用于显示或保存
pub trait FrameSink<Frame> {
  type Error: std::error::Error + Send + Sync + 'static;

  fn write_frame(&mut self, frame: &Frame, tracks: &[TrackedObject]) -> Result<(), Self::Error>;

  /// 运行结束时调用一次，之后不再写入
  fn finish(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<Frame, S: FrameSink<Frame> + ?Sized> FrameSink<Frame> for Box<S> {
  type Error = S::Error;

  fn write_frame(&mut self, frame: &Frame, tracks: &[TrackedObject]) -> Result<(), Self::Error> {
    (**self).write_frame(frame, tracks)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    (**self).finish()
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("输出地址无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("不支持的输出方案: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "save_image_file")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 丢弃所有帧，只计数
#[derive(Debug, Default)]
pub struct NullOutput {
  frames: u64,
}

impl NullOutput {
  pub fn frames(&self) -> u64 {
    self.frames
  }
}

impl FromUrlWithScheme for NullOutput {
  const SCHEME: &'static str = "null";
}

impl FromUrl for NullOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(Self::default())
  }
}

impl<Frame> FrameSink<Frame> for NullOutput {
  type Error = OutputError;

  fn write_frame(&mut self, _frame: &Frame, _tracks: &[TrackedObject]) -> Result<(), Self::Error> {
    self.frames += 1;
    Ok(())
  }
}

pub enum OutputWrapper<const W: u32, const H: u32> {
  Null(NullOutput),
  #[cfg(feature = "save_image_file")]
  DirectoryRecordOutput(DirectoryRecordOutput<W, H>),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput<W, H>),
}

impl<const W: u32, const H: u32> OutputWrapper<W, H> {
  pub fn open(url: &str) -> Result<Self, OutputError> {
    let url = Url::parse(url)?;
    info!("打开输出: {}", url);
    Self::from_url(&url)
  }
}

impl<const W: u32, const H: u32> FromUrl for OutputWrapper<W, H> {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme == NullOutput::SCHEME {
      return Ok(OutputWrapper::Null(NullOutput::from_url(url)?));
    }
    #[cfg(feature = "save_image_file")]
    {
      if scheme == DirectoryRecordOutput::<W, H>::SCHEME {
        let output = DirectoryRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
    }
    #[cfg(feature = "gstreamer_output")]
    {
      if scheme == GStreamerVideoOutput::<W, H>::SCHEME {
        let output = GStreamerVideoOutput::from_url(url)?;
        return Ok(OutputWrapper::GStreamerVideoOutput(output));
      }
    }
    Err(OutputError::SchemeMismatch(scheme.to_string()))
  }
}

impl<const W: u32, const H: u32> FrameSink<RgbNhwcFrame<W, H>> for OutputWrapper<W, H> {
  type Error = OutputError;

  fn write_frame(
    &mut self,
    frame: &RgbNhwcFrame<W, H>,
    tracks: &[TrackedObject],
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Null(output) => output.write_frame(frame, tracks),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .write_frame(frame, tracks)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output
        .write_frame(frame, tracks)
        .map_err(OutputError::from),
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Null(output) => FrameSink::<RgbNhwcFrame<W, H>>::finish(output),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::DirectoryRecordOutput(output) => output.finish().map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.finish().map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn null_scheme_is_recognised() {
    let output = OutputWrapper::<4, 4>::open("null:").unwrap();
    assert!(matches!(output, OutputWrapper::Null(_)));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let err = OutputWrapper::<4, 4>::open("ftp://host/x").err().unwrap();
    assert!(matches!(err, OutputError::SchemeMismatch(s) if s == "ftp"));
  }

  #[test]
  fn null_output_counts_frames() {
    let mut output = NullOutput::default();
    let frame = RgbNhwcFrame::<4, 4>::default();
    output.write_frame(&frame, &[]).unwrap();
    output.write_frame(&frame, &[]).unwrap();
    assert_eq!(output.frames(), 2);
  }
}
