// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use async_trait::async_trait;
use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, SourceError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 协议不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 当作静止视频流使用的单张图像。
pub struct ImageFileInput {
  frame: Frame,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 协议不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let image = image.to_rgb8();
    info!(
      "已加载图像 {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(Self::from(image))
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    Self {
      frame: Frame::from(&image),
    }
  }
}

#[async_trait]
impl FrameSource for ImageFileInput {
  async fn ready(&mut self) -> Result<(), SourceError> {
    Ok(())
  }

  fn current_frame(&self) -> Result<Frame, SourceError> {
    Ok(self.frame.clone().with_captured_at(chrono::Local::now()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn serves_decoded_pixels_in_hwc_order() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));

    let input = ImageFileInput::from(image);
    let frame = input.current_frame().unwrap();

    assert_eq!(frame.shape(), (1, 2, 3));
    assert_eq!(frame.as_hwc(), &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("v4l:///dev/video0").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
