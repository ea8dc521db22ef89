// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 把绘制后的帧按日期目录保存为 PNG，并在同名 `.txt` 中记录轨迹。
//!
//! 地址形如 `folder:///data/record`，默认只保存有轨迹的帧，加 `?always` 保存每一帧。

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use image::ExtendedColorType;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::coco_label,
  output::FrameSink,
  tracker::TrackedObject,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub struct DirectoryRecordOutput<const W: u32, const H: u32> {
  directory: PathBuf,
  frame_counter: u64,
  saved: u64,
  always: bool,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for DirectoryRecordOutput<W, H> {
  const SCHEME: &'static str = "folder";
}

impl<const W: u32, const H: u32> FromUrl for DirectoryRecordOutput<W, H> {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(Path::new(uri.path()), always))
  }
}

impl<const W: u32, const H: u32> DirectoryRecordOutput<W, H> {
  pub fn new(directory: &Path, always: bool) -> Self {
    Self {
      directory: directory.to_path_buf(),
      frame_counter: 0,
      saved: 0,
      always,
    }
  }

  pub fn saved(&self) -> u64 {
    self.saved
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:06}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }
}

fn record_line(track: &TrackedObject) -> String {
  format!(
    "{}, {}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
    track.track_id,
    coco_label(track.class_id),
    track.score,
    track.bbox.left,
    track.bbox.top,
    track.bbox.right,
    track.bbox.bottom
  )
}

impl<const W: u32, const H: u32> FrameSink<RgbNhwcFrame<W, H>> for DirectoryRecordOutput<W, H> {
  type Error = DirectoryRecordOutputError;

  fn write_frame(
    &mut self,
    frame: &RgbNhwcFrame<W, H>,
    tracks: &[TrackedObject],
  ) -> Result<(), Self::Error> {
    self.frame_counter += 1;
    if !self.always && tracks.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    image::save_buffer(&path, frame.as_nhwc(), W, H, ExtendedColorType::Rgb8)?;
    let records: Vec<String> = tracks.iter().map(record_line).collect();
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
    self.saved += 1;
    debug!("保存帧: {}", path.display());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!(
      "目录记录结束: 共 {} 帧, 保存 {} 帧到 {}",
      self.frame_counter,
      self.saved,
      self.directory.display()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("yanxi-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
  }

  #[test]
  fn frames_without_tracks_are_skipped() {
    let dir = scratch_dir("skip");
    let mut output = DirectoryRecordOutput::<4, 4>::new(&dir, false);
    output.write_frame(&RgbNhwcFrame::default(), &[]).unwrap();
    assert_eq!(output.saved(), 0);
    assert!(!dir.exists());
  }

  #[test]
  fn tracked_frame_is_saved_with_record() {
    let dir = scratch_dir("save");
    let mut output = DirectoryRecordOutput::<4, 4>::new(&dir, false);
    let track = TrackedObject {
      track_id: 7,
      bbox: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
      score: 0.9,
      class_id: 0,
    };
    output.write_frame(&RgbNhwcFrame::default(), &[track]).unwrap();
    assert_eq!(output.saved(), 1);
    assert_eq!(record_line(&track), "7, person, 0.9000, 0.0, 0.0, 2.0, 2.0");
    let _ = std::fs::remove_dir_all(&dir);
  }
}
