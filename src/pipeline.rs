// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/pipeline.rs - 采集、推理、跟踪流水线
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

//! 单线程、单帧在途的流水线：
//!
//! ```text
//! acquire → convert → infer → track → render → sink → release
//! ```
//!
//! 第 N 帧释放之前不会开始转换第 N+1 帧。无论是流结束、收到停止信号还是某一阶段出错，
//! 都走同一条收尾路径：释放仍持有的缓冲区、停止输入源、关闭输出、释放推理引擎。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{InferFailurePolicy, PipelineConfig, RenderMode},
  convert::{ConvertError, FrameConverter},
  frame::RgbNhwcFrame,
  inference::{InferError, InferenceAdapter},
  input::{AcquireError, FrameSource},
  model::Model,
  output::{
    FrameSink,
    draw::{Draw, detection_annotations, track_annotations},
  },
  tracker::{ByteTracker, TrackError, Tracker, TrackingAdapter},
};

/// 收到中断后强制退出前的等待时间
const FORCE_EXIT_GRACE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("初始化失败 (setup): {0}")]
  Setup(#[source] ConvertError),
  #[error("采集失败 (acquisition): {0}")]
  Acquire(#[from] AcquireError),
  #[error("推理失败 (inference): {0}")]
  Inference(#[from] InferError),
  #[error("跟踪失败 (tracking): {0}")]
  Tracking(#[from] TrackError),
  #[error("输出失败 (output): {0}")]
  Output(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("收尾失败 (teardown): {0}")]
  Teardown(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("流水线已停止, 不能再次运行")]
  AlreadyStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Running,
  /// 正常结束，正在收尾
  Draining,
  /// 出错，正在收尾
  Faulted,
  Stopped,
}

/// 主循环退出的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopExit {
  #[default]
  EndOfStream,
  Interrupted,
  FrameLimit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
  /// 取到的帧数
  pub frames_acquired: u64,
  /// 完成推理与跟踪的帧数
  pub frames_processed: u64,
  /// 推理失败后跳过的帧数
  pub frames_skipped: u64,
  pub detections: u64,
  pub inference_total: Duration,
  pub exit: LoopExit,
}

impl PipelineReport {
  pub fn mean_inference(&self) -> Duration {
    let calls = self.frames_processed + self.frames_skipped;
    if calls == 0 {
      Duration::ZERO
    } else {
      let nanos = self.inference_total.as_nanos() / calls as u128;
      Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
  }
}

/// 外部停止信号，在每次循环开始时检查
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn raise(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_raised(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 把 Ctrl-C 接到该信号上；若收尾 30 秒内没有完成则强制退出
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let signal = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      signal.raise();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_GRACE);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

/// 一次运行的全部状态：推理引擎、跟踪器与复用的转换缓冲区
pub struct PipelineContext<M, T, const W: u32, const H: u32> {
  inference: Option<InferenceAdapter<M, W, H>>,
  tracking: TrackingAdapter<T>,
  buffer: Option<RgbNhwcFrame<W, H>>,
  converter: FrameConverter<W, H>,
  draw: Draw,
}

impl<M, T, const W: u32, const H: u32> PipelineContext<M, T, W, H>
where
  M: Model<Input = RgbNhwcFrame<W, H>>,
  T: Tracker,
{
  pub fn new(model: M, tracker: T, confidence_threshold: f32, draw: Draw) -> Result<Self, PipelineError> {
    let converter = FrameConverter::<W, H>::new();
    let buffer = RgbNhwcFrame::<W, H>::default();
    converter.validate(&buffer).map_err(PipelineError::Setup)?;
    info!("初始化流水线: 推理分辨率 {}x{}, 置信度阈值 {}", W, H, confidence_threshold);

    Ok(Self {
      inference: Some(InferenceAdapter::new(model, confidence_threshold)),
      tracking: TrackingAdapter::new(tracker),
      buffer: Some(buffer),
      converter,
      draw,
    })
  }
}

impl<M, T, const W: u32, const H: u32> PipelineContext<M, T, W, H> {
  /// 释放推理引擎与缓冲区；可重复调用，返回本次是否释放了资源
  pub fn teardown(&mut self) -> bool {
    let engine = self.inference.take();
    let buffer = self.buffer.take();
    let released = engine.is_some() || buffer.is_some();
    if engine.is_some() {
      info!("释放推理引擎");
    }
    drop(engine);
    drop(buffer);
    released
  }

  pub fn is_torn_down(&self) -> bool {
    self.inference.is_none() && self.buffer.is_none()
  }

  pub fn tracking(&self) -> &TrackingAdapter<T> {
    &self.tracking
  }

  pub fn inference(&self) -> Option<&InferenceAdapter<M, W, H>> {
    self.inference.as_ref()
  }
}

impl<M, T, const W: u32, const H: u32> Drop for PipelineContext<M, T, W, H> {
  fn drop(&mut self) {
    self.teardown();
  }
}

pub struct Pipeline<M, T, const W: u32, const H: u32> {
  context: PipelineContext<M, T, W, H>,
  config: PipelineConfig,
  state: PipelineState,
  stop: StopSignal,
}

impl<M, const W: u32, const H: u32> Pipeline<M, ByteTracker, W, H>
where
  M: Model<Input = RgbNhwcFrame<W, H>>,
{
  /// 用配置中的参数创建 ByteTrack 跟踪器
  pub fn with_model(model: M, config: PipelineConfig, draw: Draw) -> Result<Self, PipelineError> {
    let tracker = ByteTracker::new(config.tracker.clone());
    let context = PipelineContext::new(model, tracker, config.confidence_threshold, draw)?;
    Ok(Self::new(context, config))
  }
}

impl<M, T, const W: u32, const H: u32> Pipeline<M, T, W, H>
where
  M: Model<Input = RgbNhwcFrame<W, H>>,
  T: Tracker,
{
  pub fn new(context: PipelineContext<M, T, W, H>, config: PipelineConfig) -> Self {
    Self {
      context,
      config,
      state: PipelineState::Idle,
      stop: StopSignal::new(),
    }
  }

  pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_signal(&self) -> StopSignal {
    self.stop.clone()
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn context(&self) -> &PipelineContext<M, T, W, H> {
    &self.context
  }

  /// 运行到流结束、停止信号、帧数上限或出错为止，之后流水线不可再用
  pub fn run<S, O>(&mut self, source: &mut S, sink: &mut O) -> Result<PipelineReport, PipelineError>
  where
    S: FrameSource + ?Sized,
    O: FrameSink<RgbNhwcFrame<W, H>>,
  {
    if self.state != PipelineState::Idle {
      return Err(PipelineError::AlreadyStopped);
    }
    self.state = PipelineState::Running;
    info!("开始处理, 输入源类型: {:?}", source.kind());

    let mut report = PipelineReport::default();
    let outcome = self.run_loop(source, sink, &mut report);
    self.state = match &outcome {
      Ok(exit) => {
        info!("主循环结束: {:?}", exit);
        PipelineState::Draining
      }
      Err(e) => {
        error!("流水线出错: {}", e);
        PipelineState::Faulted
      }
    };

    let teardown = self.shutdown(source, sink);
    self.state = PipelineState::Stopped;

    let exit = outcome?;
    teardown?;
    report.exit = exit;
    info!(
      "处理完成: 取帧 {} 处理 {} 跳过 {}, 检测 {} 个, 平均推理 {:.2?}",
      report.frames_acquired,
      report.frames_processed,
      report.frames_skipped,
      report.detections,
      report.mean_inference()
    );
    Ok(report)
  }

  fn run_loop<S, O>(
    &mut self,
    source: &mut S,
    sink: &mut O,
    report: &mut PipelineReport,
  ) -> Result<LoopExit, PipelineError>
  where
    S: FrameSource + ?Sized,
    O: FrameSink<RgbNhwcFrame<W, H>>,
  {
    loop {
      if self.stop.is_raised() {
        info!("收到停止信号, 退出主循环");
        return Ok(LoopExit::Interrupted);
      }
      if self
        .config
        .max_frames
        .is_some_and(|max| report.frames_acquired >= max)
      {
        info!("达到指定帧数 {}, 退出主循环", report.frames_acquired);
        return Ok(LoopExit::FrameLimit);
      }

      let PipelineContext {
        inference,
        tracking,
        buffer,
        converter,
        draw,
      } = &mut self.context;
      let (Some(inference), Some(buffer)) = (inference.as_mut(), buffer.as_mut()) else {
        return Err(InferError::Released.into());
      };

      let Some(frame) = source.acquire()? else {
        return Ok(LoopExit::EndOfStream);
      };
      report.frames_acquired += 1;
      debug!(
        "第 {} 帧: {}x{} {:?}",
        report.frames_acquired,
        frame.width(),
        frame.height(),
        frame.layout()
      );
      converter.convert(&frame, buffer);

      let batch = match inference.infer(buffer) {
        Ok(batch) => batch,
        Err(e) if self.config.on_infer_error == InferFailurePolicy::Skip => {
          warn!("第 {} 帧推理失败, 跳过: {}", report.frames_acquired, e);
          report.inference_total += inference.last_elapsed();
          report.frames_skipped += 1;
          source.release()?;
          continue;
        }
        Err(e) => return Err(e.into()),
      };
      report.inference_total += inference.last_elapsed();
      report.detections += batch.len() as u64;
      for det in batch.iter() {
        debug!("检测: {} {:.3} {:?}", det.label(), det.score, det.bbox);
      }

      let tracks = tracking.update(&batch, report.frames_processed)?;
      report.frames_processed += 1;
      for track in &tracks {
        debug!("轨迹 #{}: {:.3} {:?}", track.track_id, track.score, track.bbox);
      }

      let annotations = match self.config.render {
        RenderMode::Tracks => track_annotations(&tracks),
        RenderMode::Detections => detection_annotations(&batch),
        RenderMode::Both => {
          let mut annotations = detection_annotations(&batch);
          annotations.extend(track_annotations(&tracks));
          annotations
        }
      };
      draw.draw(buffer, &annotations);

      sink
        .write_frame(buffer, &tracks)
        .map_err(|e| PipelineError::Output(Box::new(e)))?;
      source.release()?;
    }
  }

  /// 收尾：每一步都会执行，返回遇到的第一个错误
  fn shutdown<S, O>(&mut self, source: &mut S, sink: &mut O) -> Result<(), PipelineError>
  where
    S: FrameSource + ?Sized,
    O: FrameSink<RgbNhwcFrame<W, H>>,
  {
    let mut first_error: Option<PipelineError> = None;

    if source.is_holding() {
      debug!("释放仍持有的缓冲区");
      if let Err(e) = source.release() {
        warn!("释放缓冲区失败: {}", e);
        first_error.get_or_insert(PipelineError::Teardown(Box::new(e)));
      }
    }
    if let Err(e) = source.stop() {
      warn!("停止输入源失败: {}", e);
      first_error.get_or_insert(PipelineError::Teardown(Box::new(e)));
    }
    if let Err(e) = sink.finish() {
      warn!("关闭输出失败: {}", e);
      first_error.get_or_insert(PipelineError::Teardown(Box::new(e)));
    }
    self.context.teardown();

    first_error.map_or(Ok(()), Err)
  }
}
