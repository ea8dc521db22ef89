// 该文件是 Yanxi （燕溪） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yanxi::{
  input::open_source,
  output::{OutputWrapper, draw::Draw},
  pipeline::StopSignal,
};

use args::Args;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.source);
  info!("输出地址: {}", args.output);

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::new(),
  };

  let stop = StopSignal::new();
  stop.install_ctrlc()?;

  run(&args, draw, stop)
}

#[cfg(feature = "rknpu_model")]
fn run(args: &Args, draw: Draw, stop: StopSignal) -> Result<()> {
  use yanxi::{
    frame::RgbNhwcFrame,
    model::{
      Yolov8Builder,
      yolov8::{YOLOV8_INPUT_H, YOLOV8_INPUT_W},
    },
    pipeline::Pipeline,
    tracker::ByteTracker,
  };

  const W: u32 = YOLOV8_INPUT_W;
  const H: u32 = YOLOV8_INPUT_H;

  let model = Yolov8Builder::new(&args.model)
    .box_threshold(args.confidence)
    .build::<RgbNhwcFrame<W, H>>()?;
  let mut pipeline = Pipeline::<_, ByteTracker, W, H>::with_model(model, args.pipeline_config(), draw)?
    .with_stop_signal(stop);

  let mut source = open_source(&args.source, &args.capture_config())?;
  let mut sink = OutputWrapper::<W, H>::open(&args.output)?;

  let report = pipeline.run(&mut source, &mut sink)?;
  info!("退出原因: {:?}", report.exit);
  Ok(())
}

#[cfg(not(feature = "rknpu_model"))]
fn run(args: &Args, _draw: Draw, _stop: StopSignal) -> Result<()> {
  // 先检查输入与输出地址，便于在没有 NPU 的主机上排查参数
  let _source = open_source(&args.source, &args.capture_config())?;
  let _sink = OutputWrapper::<640, 640>::open(&args.output)?;
  info!("流水线参数: {:?}", args.pipeline_config());
  anyhow::bail!("未启用 rknpu_model 特性, 无法加载模型 {}", args.model)
}
