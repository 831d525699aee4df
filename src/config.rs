// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/config.rs - 检测配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  codec::{DisplaySize, OutputSlots},
  filter::ClassCatalog,
  output::OverlayStyle,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 检测循环的全部配置，所有字段都有默认值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  /// 置信度阈值 (0.0 - 1.0)，严格大于才保留
  pub threshold: f32,
  pub output_slots: OutputSlots,
  pub classes: ClassCatalog,
  pub display: DisplaySize,
  /// 显示刷新率，决定 [`crate::task::IntervalClock`] 的节拍
  pub refresh_hz: f64,
  pub style: OverlayStyle,
  /// 连续多少次可恢复错误后放弃；为空表示一直重试
  pub max_consecutive_failures: Option<u32>,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      threshold: 0.85,
      output_slots: OutputSlots::default(),
      classes: ClassCatalog::masks(),
      display: DisplaySize::default(),
      refresh_hz: 60.0,
      style: OverlayStyle::default(),
      max_consecutive_failures: None,
    }
  }
}

impl DetectorConfig {
  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值 {} 不在 0.0 - 1.0 之间",
        self.threshold
      )));
    }
    if self.classes.is_empty() {
      return Err(ConfigError::Invalid("类别表为空".to_string()));
    }
    if !self.output_slots.is_distinct() {
      return Err(ConfigError::Invalid(format!(
        "输出位置重复: {:?}",
        self.output_slots
      )));
    }
    if self.display.width == 0 || self.display.height == 0 {
      return Err(ConfigError::Invalid(format!(
        "显示尺寸无效: {}x{}",
        self.display.width, self.display.height
      )));
    }
    if !(self.refresh_hz.is_finite() && self.refresh_hz > 0.0) {
      return Err(ConfigError::Invalid(format!(
        "刷新率无效: {}",
        self.refresh_hz
      )));
    }
    if self.style.font_size <= 0.0 {
      return Err(ConfigError::Invalid(format!(
        "字体大小无效: {}",
        self.style.font_size
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::filter::ClassColor;

  #[test]
  fn defaults_match_mask_model() {
    let config = DetectorConfig::default();
    assert_eq!(config.threshold, 0.85);
    assert_eq!(
      config.output_slots,
      OutputSlots {
        scores: 1,
        boxes: 7,
        classes: 5
      }
    );
    assert_eq!(config.classes.len(), 3);
    assert_eq!(config.display, DisplaySize::new(600, 500));
    assert_eq!(config.style.font_size, 16.0);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let config = DetectorConfig::from_json_str(
      r#"{
        "threshold": 0.6,
        "output_slots": {"scores": 0, "boxes": 1, "classes": 2},
        "classes": [{"name": "Person", "color": "green"}],
        "style": {"font_size": 20.0}
      }"#,
    )
    .unwrap();

    assert_eq!(config.threshold, 0.6);
    assert_eq!(config.output_slots.boxes, 1);
    assert_eq!(config.classes.lookup(1).unwrap().color, ClassColor::Green);
    assert_eq!(config.style.font_size, 20.0);
    assert_eq!(config.style.line_width, 4);
    assert_eq!(config.refresh_hz, 60.0);
  }

  #[test]
  fn rejects_invalid_values() {
    for content in [
      r#"{"threshold": 1.2}"#,
      r#"{"classes": []}"#,
      r#"{"output_slots": {"scores": 1, "boxes": 1, "classes": 2}}"#,
      r#"{"display": {"width": 0, "height": 500}}"#,
      r#"{"refresh_hz": 0.0}"#,
    ] {
      assert!(
        matches!(
          DetectorConfig::from_json_str(content),
          Err(ConfigError::Invalid(_))
        ),
        "{content}"
      );
    }
  }

  #[test]
  fn reports_malformed_json() {
    assert!(matches!(
      DetectorConfig::from_json_str("{"),
      Err(ConfigError::JsonError(_))
    ));
  }
}
