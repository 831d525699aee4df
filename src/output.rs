// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output.rs - 叠加层渲染
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::{
  codec::{DisplaySize, ScreenBox},
  filter::{ClassColor, Detection},
  frame::Frame,
};

/// 叠加层的绘制目标，尺寸与视频显示尺寸一致。
pub trait Surface: Send {
  fn size(&self) -> DisplaySize;
  fn clear(&mut self);
  fn stroke_rect(&mut self, rect: ScreenBox, color: ClassColor, line_width: u32);
  fn fill_rect(&mut self, rect: ScreenBox, color: ClassColor);
  /// `(x, y)` 为文本左上角
  fn fill_text(&mut self, text: &str, x: f32, y: f32, color: ClassColor, font_size: f32);
  fn measure_text(&self, text: &str, font_size: f32) -> f32;

  /// 把当前叠加层与对应的视频帧一起呈现出去。
  fn present(&mut self, _frame: &Frame) -> Result<(), RenderError> {
    Ok(())
  }
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "save_image_file")]
pub use self::draw::{ImageSurface, load_font};

#[derive(Error, Debug)]
pub enum RenderError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("字体加载错误: {0}")]
  FontError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
  pub font_size: f32,
  pub line_width: u32,
  pub label_padding: f32,
  pub label_background: ClassColor,
  pub label_text: ClassColor,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      font_size: 16.0,
      line_width: 4,
      label_padding: 4.0,
      label_background: ClassColor::Cyan,
      label_text: ClassColor::Black,
    }
  }
}

pub struct OverlayRenderer<S> {
  surface: S,
  style: OverlayStyle,
}

impl<S: Surface> OverlayRenderer<S> {
  pub fn new(surface: S, style: OverlayStyle) -> Self {
    Self { surface, style }
  }

  pub fn size(&self) -> DisplaySize {
    self.surface.size()
  }

  pub fn style(&self) -> &OverlayStyle {
    &self.style
  }

  pub fn surface(&self) -> &S {
    &self.surface
  }

  /// 清空画布后分两遍绘制：先画所有边框和标签底色，再画所有文字，
  /// 保证文字不会被后面检测框的标签底色盖住。
  pub fn render(&mut self, detections: &[Detection]) {
    let style = &self.style;
    self.surface.clear();

    let captions: Vec<String> = detections.iter().map(Detection::caption).collect();

    for (detection, caption) in detections.iter().zip(&captions) {
      let bbox = detection.bbox;
      self
        .surface
        .stroke_rect(bbox, detection.color, style.line_width);

      let text_width = self.surface.measure_text(caption, style.font_size);
      let background = ScreenBox::new(
        bbox.x,
        bbox.y,
        text_width + style.label_padding,
        style.font_size + style.label_padding,
      );
      self.surface.fill_rect(background, style.label_background);
    }

    for (detection, caption) in detections.iter().zip(&captions) {
      self.surface.fill_text(
        caption,
        detection.bbox.x,
        detection.bbox.y,
        style.label_text,
        style.font_size,
      );
    }

    trace!("绘制 {} 个检测结果", detections.len());
  }

  pub fn present(&mut self, frame: &Frame) -> Result<(), RenderError> {
    self.surface.present(frame)
  }
}
