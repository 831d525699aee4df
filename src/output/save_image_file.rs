// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/save_image_file.rs - 保存叠加预览图
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

use std::path::{Path, PathBuf};

use image::{
  DynamicImage, RgbaImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法合成 {0} 通道的帧")]
  UnsupportedFrame(usize),
}

/// 每次呈现时覆盖写同一个文件，作为实时预览。
#[derive(Debug, Clone)]
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 帧缩放到叠加层尺寸后，把叠加层盖在上面保存。
  pub fn compose(frame: &Frame, overlay: &RgbaImage) -> Result<RgbaImage, SaveImageFileError> {
    let base = frame
      .to_rgb_image()
      .ok_or(SaveImageFileError::UnsupportedFrame(frame.channels()))?;
    let mut base = DynamicImage::ImageRgb8(base).to_rgba8();

    let (width, height) = overlay.dimensions();
    if base.dimensions() != (width, height) {
      base = imageops::resize(&base, width, height, FilterType::Triangle);
    }
    imageops::overlay(&mut base, overlay, 0, 0);
    Ok(base)
  }

  pub fn save_composite(
    &self,
    frame: &Frame,
    overlay: &RgbaImage,
  ) -> Result<(), SaveImageFileError> {
    let image = Self::compose(frame, overlay)?;

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&self.path)?;

    debug!(
      "保存叠加预览到文件: {} (帧时间 {})",
      self.path.display(),
      frame.captured_at().format("%H:%M:%S%.3f")
    );
    Ok(())
  }
}
