// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 模型与后处理
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
use tracing::debug;

use crate::model::{BoundingBox, Detection, DetectionBatch, MAX_DETECTIONS};

pub const YOLOV8_INPUT_W: u32 = 640;
pub const YOLOV8_INPUT_H: u32 = 640;
pub const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_DFL_LEN: usize = 16;
const YOLOV8_STRIDES: [usize; 3] = [8, 16, 32];
/// 每个检测头 2 个输出（回归、分类）或 3 个输出（额外的分数和）
const YOLOV8_OUTPUTS_PER_HEAD: [usize; 2] = [2, 3];

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("输出张量数量 {0} 无效, 应为 6 或 9")]
  OutputCount(usize),
  #[error("第 {index} 个输出大小为 {actual}, 期望 {expected}")]
  TensorSize {
    index: usize,
    expected: usize,
    actual: usize,
  },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
  pub input_width: u32,
  pub input_height: u32,
  pub box_threshold: f32,
  pub nms_threshold: f32,
  pub max_detections: usize,
}

impl Default for DecodeParams {
  fn default() -> Self {
    Self {
      input_width: YOLOV8_INPUT_W,
      input_height: YOLOV8_INPUT_H,
      box_threshold: 0.25,
      nms_threshold: 0.45,
      max_detections: MAX_DETECTIONS,
    }
  }
}

/// 把三个检测头的原始输出解码为输入分辨率像素坐标下的检测结果
///
/// 每个头依次为 `[1, 64, h, w]` 的 DFL 回归、`[1, 80, h, w]` 的分类置信度，
/// 以及可选的 `[1, 1, h, w]` 分数和。结果经过按类别的 NMS，按分数从高到低排列。
pub fn decode(outputs: &[&[f32]], params: &DecodeParams) -> Result<DetectionBatch, DecodeError> {
  let per_head = YOLOV8_OUTPUTS_PER_HEAD
    .into_iter()
    .find(|n| n * YOLOV8_STRIDES.len() == outputs.len())
    .ok_or(DecodeError::OutputCount(outputs.len()))?;

  let mut candidates = Vec::new();
  for (head, stride) in YOLOV8_STRIDES.into_iter().enumerate() {
    let grid_w = params.input_width as usize / stride;
    let grid_h = params.input_height as usize / stride;
    let spatial = grid_w * grid_h;

    let base = head * per_head;
    let reg = checked(outputs, base, 4 * YOLOV8_DFL_LEN * spatial)?;
    let cls = checked(outputs, base + 1, YOLOV8_CLASS_NUM * spatial)?;
    let score_sum = match per_head {
      3 => Some(checked(outputs, base + 2, spatial)?),
      _ => None,
    };

    for idx in 0..spatial {
      // 分数和低于阈值时该格点不可能有合格类别
      if score_sum.is_some_and(|sum| sum[idx] < params.box_threshold) {
        continue;
      }

      let (class_id, score) = (0..YOLOV8_CLASS_NUM)
        .map(|c| (c, cls[c * spatial + idx]))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
      if score < params.box_threshold {
        continue;
      }

      let mut dist = [0.0f32; 4];
      for (side, d) in dist.iter_mut().enumerate() {
        *d = dfl_expectation(|bin| reg[(side * YOLOV8_DFL_LEN + bin) * spatial + idx]);
      }

      let gx = (idx % grid_w) as f32 + 0.5;
      let gy = (idx / grid_w) as f32 + 0.5;
      let s = stride as f32;
      candidates.push(Detection {
        class_id: class_id as u32,
        score,
        bbox: BoundingBox::new(
          (gx - dist[0]) * s,
          (gy - dist[1]) * s,
          (gx + dist[2]) * s,
          (gy + dist[3]) * s,
        ),
      });
    }
  }

  debug!("NMS 前候选框 {} 个", candidates.len());
  Ok(nms(candidates, params.nms_threshold, params.max_detections))
}

fn checked<'a>(outputs: &[&'a [f32]], index: usize, expected: usize) -> Result<&'a [f32], DecodeError> {
  let tensor = outputs[index];
  if tensor.len() != expected {
    return Err(DecodeError::TensorSize {
      index,
      expected,
      actual: tensor.len(),
    });
  }
  Ok(tensor)
}

/// 对 16 个分箱做 softmax 后求期望距离
fn dfl_expectation(bin: impl Fn(usize) -> f32) -> f32 {
  let max = (0..YOLOV8_DFL_LEN).map(&bin).fold(f32::MIN, f32::max);
  let (mut sum, mut acc) = (0.0f32, 0.0f32);
  for i in 0..YOLOV8_DFL_LEN {
    let e = (bin(i) - max).exp();
    sum += e;
    acc += e * i as f32;
  }
  acc / sum
}

/// 按类别做非极大值抑制
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32, limit: usize) -> DetectionBatch {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut batch = DetectionBatch::with_capacity(limit);
  let mut suppressed = vec![false; candidates.len()];
  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    if batch.push(candidates[i]).is_err() {
      break;
    }
    for j in (i + 1)..candidates.len() {
      if !suppressed[j]
        && candidates[j].class_id == candidates[i].class_id
        && candidates[i].bbox.iou(&candidates[j].bbox) > iou_threshold
      {
        suppressed[j] = true;
      }
    }
  }
  batch
}

#[cfg(feature = "rknpu_model")]
pub use self::rknn::{Yolov8, Yolov8Builder, Yolov8Error};

#[cfg(feature = "rknpu_model")]
mod rknn {
  use rknpu::{Context, InitFlags, TensorType};
  use thiserror::Error;
  use tracing::{debug, error, info};
  use url::Url;

  use super::{DecodeError, DecodeParams, decode};
  use crate::{
    FromUrl,
    frame::AsNhwcFrame,
    model::{DetectionBatch, Model},
  };

  const YOLOV8_NUM_INPUTS: u32 = 1;
  const YOLOV8_SCHEME: &str = "yolov8";

  #[derive(Error, Debug)]
  pub enum Yolov8Error {
    #[error("模型加载错误: {0}")]
    ModelLoadError(#[from] std::io::Error),
    #[error("模型无效: {0}, 错误: {1}")]
    ModelInvalid(String, rknpu::Error),
    #[error("RKNN 错误: {0}")]
    RknnError(#[from] rknpu::Error),
    #[error("模型路径错误: {0}")]
    ModelPathError(String),
    #[error("后处理错误: {0}")]
    Decode(#[from] DecodeError),
  }

  impl Yolov8Error {
    fn invalid(msg: &str, e: rknpu::Error) -> Self {
      Yolov8Error::ModelInvalid(msg.to_string(), e)
    }
  }

  pub struct Yolov8<Frame> {
    context: Context,
    num_outputs: usize,
    params: DecodeParams,
    _phantom: std::marker::PhantomData<Frame>,
  }

  pub struct Yolov8Builder {
    model_path: String,
    flags: InitFlags,
    params: DecodeParams,
  }

  impl FromUrl for Yolov8Builder {
    type Error = Yolov8Error;

    fn from_url(url: &Url) -> Result<Self, Self::Error> {
      if url.scheme() != YOLOV8_SCHEME {
        return Err(Yolov8Error::ModelPathError(format!(
          "模型路径必须使用 {} 方案",
          YOLOV8_SCHEME
        )));
      }
      Ok(Self::new(url.path()))
    }
  }

  impl Yolov8Builder {
    pub fn new(model_path: &str) -> Self {
      Self {
        model_path: model_path.to_string(),
        flags: InitFlags::default(),
        params: DecodeParams::default(),
      }
    }

    pub fn flags(mut self, flags: InitFlags) -> Self {
      self.flags = flags;
      self
    }

    pub fn box_threshold(mut self, threshold: f32) -> Self {
      self.params.box_threshold = threshold;
      self
    }

    pub fn build<Frame>(self) -> Result<Yolov8<Frame>, Yolov8Error> {
      info!("加载模型文件: {}", self.model_path);
      let model_data = std::fs::read(&self.model_path)?;
      debug!(
        "模型文件大小: {:.2} MB",
        model_data.len() as f64 / (1024.0 * 1024.0)
      );

      info!("创建 RKNN 推理上下文");
      let context = Context::new(&model_data, self.flags)?;

      match context.sdk_version() {
        Ok(version) => {
          if let Ok(api_ver) = version.api_version() {
            debug!("模型 API 版本: {}", api_ver);
          }
          if let Ok(drv_ver) = version.driver_version() {
            debug!("模型驱动版本: {}", drv_ver);
          }
        }
        Err(e) => {
          error!("查询 SDK 版本失败: {}", e);
          return Err(Yolov8Error::invalid("无法查询 SDK 版本", e));
        }
      }

      let num_inputs = context
        .num_inputs()
        .map_err(|e| Yolov8Error::invalid("无法获取输入数量", e))?;
      let num_outputs = context
        .num_outputs()
        .map_err(|e| Yolov8Error::invalid("无法获取输出数量", e))?;

      if num_inputs != YOLOV8_NUM_INPUTS {
        let msg = format!(
          "预期模型输入数量为 {}, 实际为 {}",
          YOLOV8_NUM_INPUTS, num_inputs
        );
        error!("{}", msg);
        return Err(Yolov8Error::invalid(&msg, rknpu::Error::InvalidModel));
      }
      if num_outputs != 6 && num_outputs != 9 {
        let msg = format!("预期模型输出数量为 6 或 9, 实际为 {}", num_outputs);
        error!("{}", msg);
        return Err(Yolov8Error::invalid(&msg, rknpu::Error::InvalidModel));
      }
      info!("模型加载完成, 输入 {} 个, 输出 {} 个", num_inputs, num_outputs);

      Ok(Yolov8 {
        context,
        num_outputs: num_outputs as usize,
        params: self.params,
        _phantom: std::marker::PhantomData,
      })
    }
  }

  impl<Frame: AsNhwcFrame> Model for Yolov8<Frame> {
    type Input = Frame;
    type Error = Yolov8Error;

    fn infer(&self, input: &Self::Input) -> Result<DetectionBatch, Self::Error> {
      self.context.set_input(
        0,
        input.as_nhwc(),
        rknpu::TensorFormat::NHWC,
        TensorType::UInt8,
      )?;
      self.context.run()?;

      let output = self.context.get_outputs()?;
      let tensors = (0..self.num_outputs)
        .map(|idx| output.get_f32(idx))
        .collect::<Result<Vec<_>, _>>()?;

      let batch = decode(&tensors, &self.params)?;
      debug!("检测到 {} 个物体", batch.len());
      Ok(batch)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 构造一组全空的输出，按 (头, 格点) 写入一个目标
  fn empty_outputs(with_sum: bool) -> Vec<Vec<f32>> {
    let mut outputs = Vec::new();
    for stride in YOLOV8_STRIDES {
      let spatial = (640 / stride) * (640 / stride);
      outputs.push(vec![0.0; 4 * YOLOV8_DFL_LEN * spatial]);
      outputs.push(vec![0.0; YOLOV8_CLASS_NUM * spatial]);
      if with_sum {
        outputs.push(vec![0.0; spatial]);
      }
    }
    outputs
  }

  /// 在第 0 个头的格点 idx 放置一个类别为 class、距离均为 dist 的目标
  fn place(outputs: &mut [Vec<f32>], idx: usize, class: usize, score: f32, dist: usize) {
    let spatial = 80 * 80;
    for side in 0..4 {
      outputs[0][(side * YOLOV8_DFL_LEN + dist) * spatial + idx] = 50.0;
    }
    outputs[1][class * spatial + idx] = score;
  }

  fn run(outputs: &[Vec<f32>]) -> Result<DetectionBatch, DecodeError> {
    let refs: Vec<&[f32]> = outputs.iter().map(|o| o.as_slice()).collect();
    decode(&refs, &DecodeParams::default())
  }

  #[test]
  fn empty_outputs_yield_no_detection() {
    assert!(run(&empty_outputs(false)).unwrap().is_empty());
  }

  #[test]
  fn single_cell_is_decoded_to_pixels() {
    let mut outputs = empty_outputs(false);
    // 格点 (x = 10, y = 5)，四边距离 2 个步长
    place(&mut outputs, 5 * 80 + 10, 3, 0.9, 2);
    let batch = run(&outputs).unwrap();
    assert_eq!(batch.len(), 1);

    let det = batch.as_slice()[0];
    assert_eq!(det.class_id, 3);
    assert!((det.score - 0.9).abs() < 1e-6);
    assert!((det.bbox.left - 68.0).abs() < 1e-3);
    assert!((det.bbox.top - 28.0).abs() < 1e-3);
    assert!((det.bbox.right - 100.0).abs() < 1e-3);
    assert!((det.bbox.bottom - 60.0).abs() < 1e-3);
  }

  #[test]
  fn overlapping_same_class_is_suppressed() {
    let mut outputs = empty_outputs(false);
    place(&mut outputs, 5 * 80 + 10, 0, 0.9, 4);
    place(&mut outputs, 5 * 80 + 11, 0, 0.6, 4);
    place(&mut outputs, 5 * 80 + 12, 1, 0.5, 4);
    let batch = run(&outputs).unwrap();

    let classes: Vec<u32> = batch.iter().map(|d| d.class_id).collect();
    assert_eq!(classes, vec![0, 1]);
  }

  #[test]
  fn score_sum_filters_cells() {
    let mut outputs = empty_outputs(true);
    place(&mut outputs, 0, 0, 0.9, 1);
    assert!(run(&outputs).unwrap().is_empty());

    outputs[2][0] = 0.9;
    assert_eq!(run(&outputs).unwrap().len(), 1);
  }

  #[test]
  fn wrong_output_count_is_rejected() {
    let outputs = vec![vec![0.0f32; 4]; 4];
    assert_eq!(run(&outputs), Err(DecodeError::OutputCount(4)));
  }

  #[test]
  fn nms_respects_limit() {
    let candidates = (0..10)
      .map(|i| Detection {
        class_id: 0,
        score: 0.5 + i as f32 * 0.01,
        bbox: BoundingBox::new(i as f32 * 100.0, 0.0, i as f32 * 100.0 + 10.0, 10.0),
      })
      .collect();
    let batch = nms(candidates, 0.45, 3);
    assert_eq!(batch.len(), 3);
    assert!((batch.as_slice()[0].score - 0.59).abs() < 1e-6);
  }
}
