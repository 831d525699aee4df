// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/scope.rs - 单帧张量作用域
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

use std::{
  ops::Deref,
  sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
};

use tracing::{error, trace};

/// 张量占用的字节数，用于作用域记账。
pub trait TensorFootprint {
  fn footprint(&self) -> usize;
}

/// 所有作用域共享的计数器。
#[derive(Debug, Default)]
pub struct ScopeLedger {
  opened: AtomicU64,
  closed: AtomicU64,
  adopted: AtomicU64,
  released: AtomicU64,
  live_bytes: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
  pub opened: u64,
  pub closed: u64,
  pub adopted: u64,
  pub released: u64,
  pub live_bytes: usize,
}

impl LedgerSnapshot {
  /// 所有作用域都已关闭，所有张量都已释放。
  pub fn is_balanced(&self) -> bool {
    self.opened == self.closed && self.adopted == self.released && self.live_bytes == 0
  }
}

impl ScopeLedger {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn snapshot(&self) -> LedgerSnapshot {
    LedgerSnapshot {
      opened: self.opened.load(Ordering::Acquire),
      closed: self.closed.load(Ordering::Acquire),
      adopted: self.adopted.load(Ordering::Acquire),
      released: self.released.load(Ordering::Acquire),
      live_bytes: self.live_bytes.load(Ordering::Acquire),
    }
  }
}

/// 一个周期内的张量作用域。
///
/// 在编码前打开，在渲染结束后关闭。通过 [`TensorScope::adopt`] 交给作用域的
/// 张量借用作用域本身，因此一定先于作用域释放；作用域在任何退出路径上
/// （包括推理失败的 `?` 提前返回）都会被 drop 并记一次关闭。
#[derive(Debug)]
pub struct TensorScope {
  cycle: u64,
  ledger: Arc<ScopeLedger>,
  live: AtomicUsize,
}

impl TensorScope {
  pub fn open(ledger: Arc<ScopeLedger>, cycle: u64) -> Self {
    ledger.opened.fetch_add(1, Ordering::AcqRel);
    trace!("打开第 {} 周期的张量作用域", cycle);
    Self {
      cycle,
      ledger,
      live: AtomicUsize::new(0),
    }
  }

  /// 当前仍存活的张量个数
  pub fn live(&self) -> usize {
    self.live.load(Ordering::Acquire)
  }

  pub fn adopt<T: TensorFootprint>(&self, tensor: T) -> Scoped<'_, T> {
    let bytes = tensor.footprint();
    self.live.fetch_add(1, Ordering::AcqRel);
    self.ledger.adopted.fetch_add(1, Ordering::AcqRel);
    self.ledger.live_bytes.fetch_add(bytes, Ordering::AcqRel);
    Scoped {
      tensor,
      bytes,
      scope: self,
    }
  }

  pub fn close(self) {
    drop(self);
  }
}

impl Drop for TensorScope {
  fn drop(&mut self) {
    let live = self.live();
    if live > 0 {
      error!("第 {} 周期的张量作用域关闭时仍有 {} 个张量未释放", self.cycle, live);
    }
    self.ledger.closed.fetch_add(1, Ordering::AcqRel);
    trace!("关闭第 {} 周期的张量作用域", self.cycle);
  }
}

/// 归属于某个 [`TensorScope`] 的张量。
#[derive(Debug)]
pub struct Scoped<'s, T: TensorFootprint> {
  tensor: T,
  bytes: usize,
  scope: &'s TensorScope,
}

impl<T: TensorFootprint> Deref for Scoped<'_, T> {
  type Target = T;

  fn deref(&self) -> &Self::Target {
    &self.tensor
  }
}

impl<T: TensorFootprint> Drop for Scoped<'_, T> {
  fn drop(&mut self) {
    self.scope.live.fetch_sub(1, Ordering::AcqRel);
    self.scope.ledger.released.fetch_add(1, Ordering::AcqRel);
    self
      .scope
      .ledger
      .live_bytes
      .fetch_sub(self.bytes, Ordering::AcqRel);
  }
}
