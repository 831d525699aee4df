// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/bin/kouzhao.rs - 实时口罩检测叠加程序
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use kouzhao::{
  FromUrl,
  codec::TensorCodec,
  config::DetectorConfig,
  filter::DetectionFilter,
  input::InputWrapper,
  model::RecordedOutputs,
  output::{ImageSurface, OverlayRenderer, SaveImageFileOutput, load_font},
  task::{DetectionLoop, IntervalClock, LoopOptions},
};

/// Kouzhao 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源 (image:///path.png, v4l:///dev/video0)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 模型输出来源 (replay:///path/outputs.json)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 置信度阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
  /// 标签字体 (TTF/OTF)
  #[arg(long, value_name = "FONT")]
  pub font: PathBuf,
  /// 叠加预览图输出路径
  #[arg(long, value_name = "OVERLAY")]
  pub overlay: Option<PathBuf>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("模型输出来源: {}", args.model);

  let mut config = match &args.config {
    Some(path) => DetectorConfig::from_json_file(path)?,
    None => DetectorConfig::default(),
  };
  if let Some(threshold) = args.threshold {
    config.threshold = threshold;
  }
  config.validate()?;
  info!(
    "置信度阈值: {}, 显示尺寸: {}x{}, 刷新率: {} Hz",
    config.threshold, config.display.width, config.display.height, config.refresh_hz
  );

  let source = InputWrapper::from_url(&args.input)?;
  let backend = RecordedOutputs::from_url(&args.model)?;

  let mut surface = ImageSurface::new(config.display, load_font(&args.font)?);
  if let Some(path) = &args.overlay {
    info!("叠加预览输出: {}", path.display());
    surface = surface.with_output(SaveImageFileOutput::new(path));
  }

  let codec = TensorCodec::new(config.output_slots);
  let filter = DetectionFilter::new(config.threshold, Arc::new(config.classes.clone()))?;
  let renderer = OverlayRenderer::new(surface, config.style.clone());
  let options = LoopOptions::default()
    .with_max_cycles(args.frame_number)
    .with_max_consecutive_failures(config.max_consecutive_failures);

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = shutdown_tx.send(true);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let mut clock = IntervalClock::from_refresh_rate(config.refresh_hz).with_shutdown(shutdown_rx);
  let mut detection_loop = DetectionLoop::new(source, backend, codec, filter, renderer, options);
  let summary = detection_loop.run(&mut clock).await?;

  info!(
    "任务完成: {} 个周期, {} 个检测结果, 作用域 {}/{}",
    summary.cycles, summary.detections, summary.ledger.closed, summary.ledger.opened
  );
  Ok(())
}
