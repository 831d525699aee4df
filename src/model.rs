// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model.rs - 推理后端
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

use crate::codec::{InputTensor, RawOutputSet};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型不可用: {0}")]
  Unavailable(String),
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("推理后端错误: {0}")]
  Backend(String),
}

/// 推理后端。模型本身在外部提供，这里只约定输入张量到输出集合的异步调用。
#[async_trait]
pub trait InferenceBackend: Send {
  /// 模型加载完成后返回，作为启动屏障的一路信号。
  async fn ready(&mut self) -> Result<(), InferenceError> {
    Ok(())
  }

  async fn infer(&mut self, input: &InputTensor) -> Result<RawOutputSet, InferenceError>;
}

mod recorded;
pub use self::recorded::{RecordedOutputs, RecordedOutputsError};
