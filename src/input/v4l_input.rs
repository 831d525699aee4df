// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use std::thread;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RGB_CHANNELS},
  input::{FrameFeed, LiveFrameSource, frame_feed},
};

const RGB24: &[u8; 4] = b"RGB3";
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 协议不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
}

/// 协商为 RGB24 格式的 V4L2 采集设备。
pub struct V4lCamera {
  device_path: String,
  device: Device,
  width: usize,
  height: usize,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 协议不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0
    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };

    let device = Device::with_path(&device_path)?;
    let mut format = device.format()?;
    format.fourcc = FourCC::new(RGB24);
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(RGB24) {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }

    info!(
      "已打开 {}，{}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    Ok(V4lCamera {
      device_path,
      device,
      width: format.width as usize,
      height: format.height as usize,
    })
  }
}

impl V4lCamera {
  /// 启动采集线程，返回读取其帧的来源。
  pub fn start(self) -> Result<LiveFrameSource, V4lInputError> {
    let (feed, source) = frame_feed();
    thread::Builder::new()
      .name("v4l-capture".to_string())
      .spawn(move || self.capture_loop(feed))?;
    Ok(source)
  }

  fn capture_loop(self, feed: FrameFeed) {
    let mut stream = match Stream::with_buffers(&self.device, Type::VideoCapture, CAPTURE_BUFFERS) {
      Ok(stream) => stream,
      Err(e) => {
        error!("{} 启动采集流失败: {}", self.device_path, e);
        return;
      }
    };

    let frame_len = self.width * self.height * RGB_CHANNELS;
    loop {
      let (buf, _meta) = match stream.next() {
        Ok(captured) => captured,
        Err(e) => {
          error!("{} 采集失败: {}", self.device_path, e);
          break;
        }
      };

      if buf.len() < frame_len {
        warn!("采集缓冲区过短: {} < {}", buf.len(), frame_len);
        continue;
      }

      let frame = match Frame::new(self.height, self.width, RGB_CHANNELS, buf[..frame_len].to_vec()) {
        Ok(frame) => frame,
        Err(e) => {
          error!("{} 的帧无效: {}", self.device_path, e);
          continue;
        }
      };

      if !feed.publish(frame) {
        info!("没有读取端，停止 {} 的采集", self.device_path);
        break;
      }
    }

    feed.release();
  }
}
