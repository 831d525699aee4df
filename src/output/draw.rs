// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/draw.rs - 基于图像缓冲区的叠加层画布
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::info;

use crate::{
  codec::{DisplaySize, ScreenBox},
  filter::ClassColor,
  frame::Frame,
  output::{RenderError, SaveImageFileOutput, Surface},
};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

pub fn load_font(path: &Path) -> Result<FontArc, RenderError> {
  let data = std::fs::read(path)?;
  let font = FontArc::try_from_vec(data).map_err(|e| RenderError::FontError(e.to_string()))?;
  info!("加载字体: {}", path.display());
  Ok(font)
}

// 超过线宽上限的部分按上限裁剪
const MAX_LINE_WIDTH: u32 = 4096;

/// 屏幕框转为像素矩形；负宽高先翻转，面积为零时返回 `None`。
///
/// 角点裁剪到画布外扩 `margin` 像素的范围内，模型给出越界的坐标时不会溢出。
fn pixel_rect(rect: ScreenBox, bounds: (u32, u32), margin: u32) -> Option<Rect> {
  let rect = rect.normalized();
  let margin = i64::from(margin.min(MAX_LINE_WIDTH));
  let max_x = i64::from(bounds.0) + margin;
  let max_y = i64::from(bounds.1) + margin;

  let left = (rect.x.floor() as i64).clamp(-margin, max_x);
  let top = (rect.y.floor() as i64).clamp(-margin, max_y);
  let right = ((rect.x + rect.width).ceil() as i64).clamp(-margin, max_x);
  let bottom = ((rect.y + rect.height).ceil() as i64).clamp(-margin, max_y);

  if right <= left || bottom <= top {
    return None;
  }
  Some(Rect::at(left as i32, top as i32).of_size((right - left) as u32, (bottom - top) as u32))
}

/// 线宽以路径为中心，一半在框内一半在框外。
pub fn stroke_box(canvas: &mut RgbaImage, rect: ScreenBox, color: Rgba<u8>, line_width: u32) {
  let line_width = line_width.min(MAX_LINE_WIDTH);
  let Some(rect) = pixel_rect(rect, canvas.dimensions(), line_width) else {
    return;
  };

  let half = (line_width / 2) as i32;
  for step in 0..line_width as i32 {
    let inset = step - half;
    let width = rect.width() as i32 - 2 * inset;
    let height = rect.height() as i32 - 2 * inset;
    if width <= 0 || height <= 0 {
      break;
    }
    let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(width as u32, height as u32);
    draw_hollow_rect_mut(canvas, ring, color);
  }
}

pub fn fill_box(canvas: &mut RgbaImage, rect: ScreenBox, color: Rgba<u8>) {
  if let Some(rect) = pixel_rect(rect, canvas.dimensions(), 0) {
    draw_filled_rect_mut(canvas, rect, color);
  }
}

/// 透明 RGBA 画布，`present` 时与视频帧合成后交给输出。
pub struct ImageSurface {
  canvas: RgbaImage,
  font: FontArc,
  output: Option<SaveImageFileOutput>,
}

impl ImageSurface {
  pub fn new(size: DisplaySize, font: FontArc) -> Self {
    Self {
      canvas: RgbaImage::from_pixel(size.width, size.height, TRANSPARENT),
      font,
      output: None,
    }
  }

  pub fn with_output(mut self, output: SaveImageFileOutput) -> Self {
    self.output = Some(output);
    self
  }
}

impl Surface for ImageSurface {
  fn size(&self) -> DisplaySize {
    DisplaySize::new(self.canvas.width(), self.canvas.height())
  }

  fn clear(&mut self) {
    for pixel in self.canvas.pixels_mut() {
      *pixel = TRANSPARENT;
    }
  }

  fn stroke_rect(&mut self, rect: ScreenBox, color: ClassColor, line_width: u32) {
    stroke_box(&mut self.canvas, rect, Rgba(color.rgba()), line_width);
  }

  fn fill_rect(&mut self, rect: ScreenBox, color: ClassColor) {
    fill_box(&mut self.canvas, rect, Rgba(color.rgba()));
  }

  fn fill_text(&mut self, text: &str, x: f32, y: f32, color: ClassColor, font_size: f32) {
    draw_text_mut(
      &mut self.canvas,
      Rgba(color.rgba()),
      x.round() as i32,
      y.round() as i32,
      PxScale::from(font_size),
      &self.font,
      text,
    );
  }

  fn measure_text(&self, text: &str, font_size: f32) -> f32 {
    let (width, _) = text_size(PxScale::from(font_size), &self.font, text);
    width as f32
  }

  fn present(&mut self, frame: &Frame) -> Result<(), RenderError> {
    if let Some(output) = &self.output {
      output.save_composite(frame, &self.canvas)?;
    }
    Ok(())
  }
}
