// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/filter.rs - 置信度过滤与类别标签
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

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::{Proposal, ScreenBox};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
  #[error("未知类别 {class_id}: 类别表只有 {catalog_len} 项")]
  UnknownClass { class_id: i64, catalog_len: usize },
  #[error("置信度阈值无效: {0}, 应在 0.0 - 1.0 之间")]
  InvalidThreshold(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassColor {
  Red,
  Blue,
  Black,
  Green,
  Yellow,
  Cyan,
  Magenta,
  White,
  Orange,
}

impl ClassColor {
  pub fn rgba(&self) -> [u8; 4] {
    match self {
      ClassColor::Red => [255, 0, 0, 255],
      ClassColor::Blue => [0, 0, 255, 255],
      ClassColor::Black => [0, 0, 0, 255],
      ClassColor::Green => [0, 128, 0, 255],
      ClassColor::Yellow => [255, 255, 0, 255],
      ClassColor::Cyan => [0, 255, 255, 255],
      ClassColor::Magenta => [255, 0, 255, 255],
      ClassColor::White => [255, 255, 255, 255],
      ClassColor::Orange => [255, 165, 0, 255],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
  pub name: String,
  pub color: ClassColor,
}

impl ClassEntry {
  pub fn new(name: &str, color: ClassColor) -> Self {
    Self {
      name: name.to_string(),
      color,
    }
  }
}

/// 类别表，下标从 1 开始。启动时加载一次，之后只读。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCatalog {
  entries: Vec<ClassEntry>,
}

impl ClassCatalog {
  pub fn new(entries: Vec<ClassEntry>) -> Self {
    Self { entries }
  }

  /// 口罩检测模型的类别表
  pub fn masks() -> Self {
    Self::new(vec![
      ClassEntry::new("MaskWhite", ClassColor::Red),
      ClassEntry::new("MaskBlue", ClassColor::Blue),
      ClassEntry::new("NoMask", ClassColor::Black),
    ])
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn lookup(&self, class_id: i64) -> Result<&ClassEntry, FilterError> {
    usize::try_from(class_id)
      .ok()
      .and_then(|id| id.checked_sub(1))
      .and_then(|index| self.entries.get(index))
      .ok_or(FilterError::UnknownClass {
        class_id,
        catalog_len: self.entries.len(),
      })
  }
}

impl Default for ClassCatalog {
  fn default() -> Self {
    Self::masks()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: i64,
  pub label: String,
  pub color: ClassColor,
  pub score: f32,
  /// 保留 4 位小数的置信度
  pub score_text: String,
  pub bbox: ScreenBox,
}

impl Detection {
  /// 标签文本，例如 `MaskBlue 85.34%`
  pub fn caption(&self) -> String {
    format!("{} {:.2}%", self.label, round_to_4(self.score) * 100.0)
  }
}

fn round_to_4(score: f32) -> f64 {
  (score as f64 * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
pub struct DetectionFilter {
  threshold: f32,
  catalog: Arc<ClassCatalog>,
}

impl DetectionFilter {
  pub fn new(threshold: f32, catalog: Arc<ClassCatalog>) -> Result<Self, FilterError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(FilterError::InvalidThreshold(threshold));
    }
    Ok(Self { threshold, catalog })
  }

  /// 保留置信度严格大于阈值的候选框，顺序与输入一致。
  ///
  /// 只对保留下来的候选框查类别表；类别越界说明模型与类别表版本不一致，直接报错。
  pub fn filter(&self, proposals: &[Proposal]) -> Result<Vec<Detection>, FilterError> {
    let mut detections = Vec::new();

    for proposal in proposals.iter().filter(|p| p.score > self.threshold) {
      let entry = self.catalog.lookup(proposal.class_id)?;
      detections.push(Detection {
        class_id: proposal.class_id,
        label: entry.name.clone(),
        color: entry.color,
        score: proposal.score,
        score_text: format!("{:.4}", round_to_4(proposal.score)),
        bbox: proposal.bbox,
      });
    }

    debug!(
      "{} 个候选框中 {} 个高于阈值 {}",
      proposals.len(),
      detections.len(),
      self.threshold
    );
    Ok(detections)
  }
}
