// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/live_feed.rs - 实时帧通道
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
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  input::{FrameSource, SourceError},
};

/// 创建采集通道以及读取它的帧来源。
///
/// 发送端归持有设备的一方所有，比如采集线程或解码回调。只保留最新一帧。
pub fn frame_feed() -> (FrameFeed, LiveFrameSource) {
  let (tx, rx) = watch::channel(None);
  (FrameFeed { tx }, LiveFrameSource { rx })
}

#[derive(Debug)]
pub struct FrameFeed {
  tx: watch::Sender<Option<Frame>>,
}

impl FrameFeed {
  /// 替换当前帧。所有读取端都已释放时返回 `false`。
  pub fn publish(&self, frame: Frame) -> bool {
    self.tx.send(Some(frame)).is_ok()
  }

  /// 设备已释放，此后读取端得到 `SourceError::Unavailable`。
  pub fn release(self) {
    info!("采集通道已释放");
    drop(self);
  }
}

#[derive(Debug, Clone)]
pub struct LiveFrameSource {
  rx: watch::Receiver<Option<Frame>>,
}

#[async_trait]
impl FrameSource for LiveFrameSource {
  async fn ready(&mut self) -> Result<(), SourceError> {
    debug!("等待第一帧采集完成");
    let ready = self.rx.wait_for(|frame| frame.is_some()).await.is_ok();
    if ready {
      Ok(())
    } else {
      Err(SourceError::Unavailable(
        "第一帧到达前采集流已关闭".to_string(),
      ))
    }
  }

  fn current_frame(&self) -> Result<Frame, SourceError> {
    if self.rx.has_changed().is_err() {
      return Err(SourceError::Unavailable(
        "采集设备已释放".to_string(),
      ));
    }

    self
      .rx
      .borrow()
      .clone()
      .ok_or_else(|| SourceError::Unavailable("尚未采集到帧".to_string()))
  }
}
