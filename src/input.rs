// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input.rs - 视频/图像输入
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
use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 实时视频流，随时给出当前帧的快照。
#[async_trait]
pub trait FrameSource: Send {
  /// 视频流可以提供帧时返回。
  async fn ready(&mut self) -> Result<(), SourceError>;

  /// 最新帧的快照，不会阻塞。
  fn current_frame(&self) -> Result<Frame, SourceError>;
}

mod live_feed;
pub use self::live_feed::{FrameFeed, LiveFrameSource, frame_feed};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lCamera, V4lInputError};

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("采集来源不可用: {0}")]
  Unavailable(String),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("URI 协议不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  Live(LiveFrameSource),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = SourceError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCamera::SCHEME {
        let source = V4lCamera::from_url(url)?.start()?;
        return Ok(InputWrapper::Live(source));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(SourceError::SchemeMismatch)
  }
}

#[async_trait]
impl FrameSource for InputWrapper {
  async fn ready(&mut self) -> Result<(), SourceError> {
    match self {
      InputWrapper::Live(source) => source.ready().await,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.ready().await,
    }
  }

  fn current_frame(&self) -> Result<Frame, SourceError> {
    match self {
      InputWrapper::Live(source) => source.current_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.current_frame(),
    }
  }
}
