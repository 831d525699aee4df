// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/task.rs - 检测循环调度
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

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
  sync::{
    mpsc::{self, error::TrySendError},
    watch,
  },
  time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
  codec::{CodecError, TensorCodec},
  filter::{DetectionFilter, FilterError},
  frame::FrameError,
  input::{FrameSource, SourceError},
  model::{InferenceBackend, InferenceError},
  output::{OverlayRenderer, RenderError, Surface},
  scope::{LedgerSnapshot, ScopeLedger, TensorScope},
};

const FALLBACK_PERIOD: Duration = Duration::from_micros(16_667);

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("帧源错误: {0}")]
  Source(#[from] SourceError),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("编解码错误: {0}")]
  Codec(#[from] CodecError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error("过滤错误: {0}")]
  Filter(#[from] FilterError),
  #[error("渲染错误: {0}")]
  Render(#[from] RenderError),
  #[error("连续 {count} 个周期失败，放弃")]
  TooManyFailures { count: u32 },
}

impl TaskError {
  /// 推理与渲染错误只跳过当前周期，其余错误停止循环。
  pub fn is_fatal(&self) -> bool {
    !matches!(self, TaskError::Inference(_) | TaskError::Render(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
  #[default]
  Idle,
  Capturing,
  Encoding,
  Inferring,
  Decoding,
  Rendering,
  Scheduled,
}

impl LoopState {
  pub fn successor(self) -> LoopState {
    match self {
      LoopState::Idle => LoopState::Capturing,
      LoopState::Capturing => LoopState::Encoding,
      LoopState::Encoding => LoopState::Inferring,
      LoopState::Inferring => LoopState::Decoding,
      LoopState::Decoding => LoopState::Rendering,
      LoopState::Rendering => LoopState::Scheduled,
      LoopState::Scheduled => LoopState::Capturing,
    }
  }

  /// 只允许走到下一个状态；周期中途失败时可以直接跳到 `Scheduled`。
  pub fn can_advance_to(self, next: LoopState) -> bool {
    next == self.successor()
      || (next == LoopState::Scheduled
        && !matches!(self, LoopState::Idle | LoopState::Scheduled))
  }
}

/// 显示时钟，每个节拍驱动一个检测周期。返回 `None` 表示外部要求停止。
#[async_trait]
pub trait DisplayClock: Send {
  async fn next_frame(&mut self) -> Option<Instant>;
}

/// 按刷新率产生节拍；错过的节拍顺延，不会补发。
#[derive(Debug)]
pub struct IntervalClock {
  interval: Interval,
  shutdown: Option<watch::Receiver<bool>>,
}

impl IntervalClock {
  pub fn from_period(period: Duration) -> Self {
    let period = if period.is_zero() {
      warn!("节拍周期为零，改用 {:?}", FALLBACK_PERIOD);
      FALLBACK_PERIOD
    } else {
      period
    };
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Self {
      interval,
      shutdown: None,
    }
  }

  pub fn from_refresh_rate(refresh_hz: f64) -> Self {
    let period = Duration::try_from_secs_f64(refresh_hz.recip()).unwrap_or_else(|_| {
      warn!("刷新率 {} 无效，改用 {:?}", refresh_hz, FALLBACK_PERIOD);
      FALLBACK_PERIOD
    });
    Self::from_period(period)
  }

  /// 信号变为 `true`（或发送端消失）后时钟结束。
  pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
    self.shutdown = Some(shutdown);
    self
  }

  pub fn period(&self) -> Duration {
    self.interval.period()
  }
}

#[async_trait]
impl DisplayClock for IntervalClock {
  async fn next_frame(&mut self) -> Option<Instant> {
    let Self { interval, shutdown } = self;
    let Some(shutdown) = shutdown else {
      return Some(interval.tick().await);
    };

    if *shutdown.borrow() {
      return None;
    }
    loop {
      tokio::select! {
        tick = interval.tick() => return Some(tick),
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            info!("显示时钟收到停止信号");
            return None;
          }
        }
      }
    }
  }
}

/// 外部注入节拍的时钟与发送端，例如合成器的垂直同步回调。
pub fn tick_channel(capacity: usize) -> (TickSender, TickClock) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (TickSender { tx }, TickClock { rx, coalesced: 0 })
}

#[derive(Debug, Clone)]
pub struct TickSender {
  tx: mpsc::Sender<Instant>,
}

impl TickSender {
  pub fn tick(&self) -> bool {
    self.tick_at(Instant::now())
  }

  /// 不阻塞。队列已满时这次节拍被丢弃，返回 `false` 仅表示时钟已关闭。
  pub fn tick_at(&self, at: Instant) -> bool {
    match self.tx.try_send(at) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) => {
        trace!("节拍队列已满，丢弃节拍");
        true
      }
      Err(TrySendError::Closed(_)) => false,
    }
  }
}

#[derive(Debug)]
pub struct TickClock {
  rx: mpsc::Receiver<Instant>,
  coalesced: u64,
}

impl TickClock {
  /// 因周期过慢而被合并掉的节拍数
  pub fn coalesced(&self) -> u64 {
    self.coalesced
  }
}

#[async_trait]
impl DisplayClock for TickClock {
  async fn next_frame(&mut self) -> Option<Instant> {
    let mut latest = self.rx.recv().await?;
    while let Ok(tick) = self.rx.try_recv() {
      self.coalesced += 1;
      latest = tick;
    }
    Some(latest)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopOptions {
  /// 完成这么多个周期后退出
  pub max_cycles: Option<u64>,
  pub max_consecutive_failures: Option<u32>,
}

impl LoopOptions {
  pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
    self.max_cycles = max_cycles;
    self
  }

  pub fn with_max_consecutive_failures(mut self, limit: Option<u32>) -> Self {
    self.max_consecutive_failures = limit;
    self
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
  pub cycles: u64,
  pub completed: u64,
  pub skipped: u64,
  pub detections: u64,
  pub ledger: LedgerSnapshot,
}

/// 检测循环：采集、编码、推理、解码过滤、渲染，然后等待下一个显示节拍。
///
/// 每个周期都在 `&mut self` 上执行完毕才会取下一个节拍，因此周期之间不会重叠。
pub struct DetectionLoop<S, M, D> {
  source: S,
  backend: M,
  codec: TensorCodec,
  filter: DetectionFilter,
  renderer: OverlayRenderer<D>,
  options: LoopOptions,
  state: LoopState,
  ledger: Arc<ScopeLedger>,
  next_cycle: u64,
  consecutive_failures: u32,
}

impl<S, M, D> DetectionLoop<S, M, D>
where
  S: FrameSource,
  M: InferenceBackend,
  D: Surface,
{
  pub fn new(
    source: S,
    backend: M,
    codec: TensorCodec,
    filter: DetectionFilter,
    renderer: OverlayRenderer<D>,
    options: LoopOptions,
  ) -> Self {
    Self {
      source,
      backend,
      codec,
      filter,
      renderer,
      options,
      state: LoopState::Idle,
      ledger: ScopeLedger::new(),
      next_cycle: 0,
      consecutive_failures: 0,
    }
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  pub fn ledger(&self) -> Arc<ScopeLedger> {
    self.ledger.clone()
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn backend(&self) -> &M {
    &self.backend
  }

  pub fn renderer(&self) -> &OverlayRenderer<D> {
    &self.renderer
  }

  fn transition(&mut self, next: LoopState) {
    debug_assert!(
      self.state.can_advance_to(next),
      "非法状态转换: {:?} -> {:?}",
      self.state,
      next
    );
    trace!("状态转换: {:?} -> {:?}", self.state, next);
    self.state = next;
  }

  fn abort_cycle(&mut self) {
    if self.state != LoopState::Scheduled {
      self.transition(LoopState::Scheduled);
    }
  }

  /// 同时等待帧源与模型就绪，任一失败立即返回。
  pub async fn wait_ready(&mut self) -> Result<(), TaskError> {
    info!("等待帧源与模型就绪...");
    let source = &mut self.source;
    let backend = &mut self.backend;
    tokio::try_join!(
      async move { source.ready().await.map_err(TaskError::from) },
      async move { backend.ready().await.map_err(TaskError::from) },
    )?;
    info!("帧源与模型均已就绪");
    Ok(())
  }

  /// 执行一个完整周期，返回绘制的检测结果个数。
  ///
  /// 出错时周期提前结束，状态回到 `Scheduled`，可以直接开始下一个周期。
  pub async fn run_cycle(&mut self) -> Result<usize, TaskError> {
    let result = self.cycle_inner().await;
    if result.is_err() {
      self.abort_cycle();
    }
    result
  }

  // 张量作用域在编码前打开；出错时所有张量随作用域一起释放
  async fn cycle_inner(&mut self) -> Result<usize, TaskError> {
    let cycle = self.next_cycle;
    self.next_cycle += 1;
    let started = Instant::now();

    self.transition(LoopState::Capturing);
    let frame = self.source.current_frame()?;
    let display = self.renderer.size();

    let scope = TensorScope::open(self.ledger.clone(), cycle);
    self.transition(LoopState::Encoding);
    let input = scope.adopt(self.codec.encode(&frame)?);

    self.transition(LoopState::Inferring);
    let raw = scope.adopt(self.backend.infer(&input).await?);
    drop(input);
    let inferred = started.elapsed();

    self.transition(LoopState::Decoding);
    let proposals = self.codec.decode(&raw, display)?;
    drop(raw);
    let detections = self.filter.filter(&proposals)?;

    self.transition(LoopState::Rendering);
    self.renderer.render(&detections);
    self.renderer.present(&frame)?;
    scope.close();

    self.transition(LoopState::Scheduled);
    debug!(
      "第 {} 周期完成: {} 个候选框, {} 个检测结果, 推理 {:.2?} / 总计 {:.2?}",
      cycle,
      proposals.len(),
      detections.len(),
      inferred,
      started.elapsed()
    );
    Ok(detections.len())
  }

  /// 等待就绪后按时钟节拍循环，直到时钟结束、达到周期上限或遇到致命错误。
  pub async fn run<C: DisplayClock>(&mut self, clock: &mut C) -> Result<LoopSummary, TaskError> {
    self.wait_ready().await?;
    info!("开始检测循环...");

    let mut summary = LoopSummary::default();
    while let Some(tick) = clock.next_frame().await {
      trace!("节拍延迟 {:.2?}", tick.elapsed());
      summary.cycles += 1;

      match self.run_cycle().await {
        Ok(count) => {
          summary.completed += 1;
          summary.detections += count as u64;
          self.consecutive_failures = 0;
        }
        Err(e) if !e.is_fatal() => {
          summary.skipped += 1;
          self.consecutive_failures += 1;
          warn!("跳过第 {} 周期: {}", self.next_cycle - 1, e);

          if let Some(limit) = self.options.max_consecutive_failures
            && self.consecutive_failures >= limit
          {
            error!("连续 {} 个周期失败，停止检测循环", self.consecutive_failures);
            return Err(TaskError::TooManyFailures {
              count: self.consecutive_failures,
            });
          }
        }
        Err(e) => {
          error!("致命错误，停止检测循环: {}", e);
          return Err(e);
        }
      }

      if let Some(max_cycles) = self.options.max_cycles
        && summary.cycles >= max_cycles
      {
        info!("达到指定周期数 {}, 退出检测循环", max_cycles);
        break;
      }
    }

    summary.ledger = self.ledger.snapshot();
    info!(
      "检测循环结束: {} 个周期, 完成 {}, 跳过 {}",
      summary.cycles, summary.completed, summary.skipped
    );
    Ok(summary)
  }
}
