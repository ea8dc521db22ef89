// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::pin::Pin;

use tracing::{debug, info, warn};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;

use super::{AcquireError, FrameSource, SourceKind};
use crate::{
  config::CaptureConfig,
  frame::{PixelLayout, RawFrame},
};

/// 只申请一个映射缓冲区：缓冲区不归还，驱动就无法产出下一帧
const MMAP_BUFFER_COUNT: u32 = 1;

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  _device: Pin<Box<Device>>,
  width: u32,
  height: u32,
  stride: usize,
  /// 映射缓冲区当前是否在用户态
  held: bool,
  frame_index: u64,
}

fn device_error(step: &str, err: std::io::Error) -> AcquireError {
  AcquireError::Device(format!("{}: {}", step, err))
}

impl V4l2Source {
  /// 打开设备并协商格式、帧率与缓冲区
  pub fn open(device_path: &str, capture: &CaptureConfig) -> Result<Self, AcquireError> {
    let device = Box::pin(
      Device::with_path(device_path)
        .map_err(|e| device_error(&format!("无法打开设备 {}", device_path), e))?,
    );

    let caps = device
      .query_caps()
      .map_err(|e| device_error("无法查询设备能力", e))?;
    debug!("设备: {} ({}), 驱动: {}", caps.card, caps.bus, caps.driver);
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE)
      || !caps.capabilities.contains(Flags::STREAMING)
    {
      return Err(AcquireError::Device(format!(
        "{} 不支持视频流采集",
        device_path
      )));
    }

    // 设置视频格式
    let mut format = device.format().map_err(|e| device_error("无法读取格式", e))?;
    format.width = capture.width;
    format.height = capture.height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| device_error("无法设置格式", e))?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(AcquireError::Device(format!(
        "设备不接受 YUYV 格式，协商结果为 {}",
        format.fourcc
      )));
    }
    if format.width != capture.width || format.height != capture.height {
      warn!(
        "设备将分辨率调整为 {}x{}（请求 {}x{}）",
        format.width, format.height, capture.width, capture.height
      );
    }

    // 设置帧间隔
    let params = device
      .set_params(&Parameters::with_fps(capture.fps))
      .map_err(|e| device_error("无法设置帧率", e))?;
    info!(
      "V4L2 采集参数: {}x{} YUYV, 帧间隔 {}/{} 秒",
      format.width, format.height, params.interval.numerator, params.interval.denominator
    );

    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效
    // 1. device 被 Pin<Box> 固定在堆上，不会移动
    // 2. stream 字段声明在 device 之前，且 Drop 中先 take，先于 device 被 drop
    let device_ref: &Device = &device;
    let mut stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, MMAP_BUFFER_COUNT)
        .map_err(|e| device_error("无法申请映射缓冲区", e))?
    };

    if let Some(timeout) = capture.acquire_timeout {
      stream.set_timeout(timeout);
    }

    let row_bytes = format.width as usize * PixelLayout::Yuyv.bytes_per_pixel();
    Ok(Self {
      stream: Some(stream),
      _device: device,
      width: format.width,
      height: format.height,
      stride: (format.stride as usize).max(row_bytes),
      held: false,
      frame_index: 0,
    })
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl FrameSource for V4l2Source {
  fn kind(&self) -> SourceKind {
    SourceKind::LiveDevice
  }

  fn acquire(&mut self) -> Result<Option<RawFrame<'_>>, AcquireError> {
    if self.held {
      return Err(AcquireError::BufferStillHeld);
    }

    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| AcquireError::Device("采集流已停止".to_string()))?;

    // 首次调用时入队并启动采集，此后每次调用先把上一次释放的缓冲区重新入队再出队
    let (buffer, meta) = stream.next().map_err(|e| match e.kind() {
      std::io::ErrorKind::TimedOut => AcquireError::Timeout,
      _ => device_error("无法出队缓冲区", e),
    })?;
    self.held = true;
    self.frame_index += 1;
    debug!(
      "出队第 {} 帧, 序号 {}, 有效字节 {}",
      self.frame_index, meta.sequence, meta.bytesused
    );

    let frame = RawFrame::with_stride(
      buffer,
      self.width,
      self.height,
      self.stride,
      PixelLayout::Yuyv,
    )?;
    Ok(Some(frame))
  }

  fn release(&mut self) -> Result<(), AcquireError> {
    if !self.held {
      return Err(AcquireError::NothingToRelease);
    }
    // 归还后缓冲区内容不再可靠；下一次出队前由流重新入队
    self.held = false;
    Ok(())
  }

  fn is_holding(&self) -> bool {
    self.held
  }

  fn stop(&mut self) -> Result<(), AcquireError> {
    self.held = false;
    if let Some(mut stream) = self.stream.take() {
      info!("停止 V4L2 采集");
      stream.stop().map_err(|e| device_error("无法停止采集", e))?;
    }
    Ok(())
  }
}
