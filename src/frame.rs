// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/frame.rs - HWC 帧定义
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

use chrono::{DateTime, Local};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {height}x{width}x{channels}")]
  EmptyShape {
    height: usize,
    width: usize,
    channels: usize,
  },
}

/// 一帧采集到的图像，按行优先的 HWC 顺序存放 `u8` 像素。
///
/// 像素数据通过 `Arc` 共享，快照之间不会复制，也不会被修改。
#[derive(Debug, Clone)]
pub struct Frame {
  data: Arc<[u8]>,
  height: usize,
  width: usize,
  channels: usize,
  captured_at: DateTime<Local>,
}

impl Frame {
  pub fn new(
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if height == 0 || width == 0 || channels == 0 {
      return Err(FrameError::EmptyShape {
        height,
        width,
        channels,
      });
    }

    let expected = height * width * channels;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into(),
      height,
      width,
      channels,
      captured_at: Local::now(),
    })
  }

  pub fn with_captured_at(mut self, captured_at: DateTime<Local>) -> Self {
    self.captured_at = captured_at;
    self
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn shape(&self) -> (usize, usize, usize) {
    (self.height, self.width, self.channels)
  }

  pub fn captured_at(&self) -> DateTime<Local> {
    self.captured_at
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(feature = "image")]
impl From<&image::RgbImage> for Frame {
  fn from(image: &image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.as_raw().as_slice().into(),
      height: height as usize,
      width: width as usize,
      channels: RGB_CHANNELS,
      captured_at: Local::now(),
    }
  }
}

#[cfg(feature = "image")]
impl Frame {
  /// 转为 RGB 图像；仅支持三通道帧。
  pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
    if self.channels != RGB_CHANNELS {
      return None;
    }
    image::RgbImage::from_raw(self.width as u32, self.height as u32, self.data.to_vec())
  }
}
