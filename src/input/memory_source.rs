// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/input/memory_source.rs - 内存帧输入源
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

use std::collections::VecDeque;

use tracing::debug;

use super::{AcquireError, FrameSource, SourceKind};
use crate::frame::{PixelLayout, RawFrame};

/// 按顺序回放一组内存中帧的输入源
pub struct MemorySource {
  width: u32,
  height: u32,
  layout: PixelLayout,
  pending: VecDeque<Vec<u8>>,
  held: Option<Vec<u8>>,
  released: u64,
}

impl MemorySource {
  pub fn new(width: u32, height: u32, layout: PixelLayout, frames: Vec<Vec<u8>>) -> Self {
    Self {
      width,
      height,
      layout,
      pending: frames.into(),
      held: None,
      released: 0,
    }
  }

  /// 已释放的帧数
  pub fn released(&self) -> u64 {
    self.released
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl FrameSource for MemorySource {
  fn kind(&self) -> SourceKind {
    SourceKind::Memory
  }

  fn acquire(&mut self) -> Result<Option<RawFrame<'_>>, AcquireError> {
    if self.held.is_some() {
      return Err(AcquireError::BufferStillHeld);
    }

    let Some(data) = self.pending.pop_front() else {
      debug!("内存输入源已结束");
      return Ok(None);
    };

    let data = self.held.insert(data);
    let frame = RawFrame::new(data, self.width, self.height, self.layout)?;
    Ok(Some(frame))
  }

  fn release(&mut self) -> Result<(), AcquireError> {
    self
      .held
      .take()
      .map(|_| self.released += 1)
      .ok_or(AcquireError::NothingToRelease)
  }

  fn is_holding(&self) -> bool {
    self.held.is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn source(frames: usize) -> MemorySource {
    MemorySource::new(2, 2, PixelLayout::Rgb24, vec![vec![7u8; 12]; frames])
  }

  #[test]
  fn acquire_blocks_until_release() {
    let mut source = source(2);
    assert!(source.acquire().unwrap().is_some());
    assert!(matches!(
      source.acquire(),
      Err(AcquireError::BufferStillHeld)
    ));
    source.release().unwrap();
    assert!(source.acquire().unwrap().is_some());
  }

  #[test]
  fn end_of_stream_is_not_an_error() {
    let mut source = source(1);
    source.acquire().unwrap();
    source.release().unwrap();
    assert!(source.acquire().unwrap().is_none());
    assert_eq!(source.released(), 1);
  }

  #[test]
  fn release_without_frame_fails() {
    let mut source = source(1);
    assert!(matches!(
      source.release(),
      Err(AcquireError::NothingToRelease)
    ));
  }
}
