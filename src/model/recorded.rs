// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/recorded.rs - 回放已录制的模型输出
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
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  codec::{InputTensor, RawOutputSet},
  frame::RGB_CHANNELS,
  model::{InferenceBackend, InferenceError},
};

#[derive(Error, Debug)]
pub enum RecordedOutputsError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("第 {index} 个输出无效: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  InvalidTensor {
    index: usize,
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedTensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedFile {
  /// 录制时模型的输入尺寸 [height, width]
  #[serde(default)]
  input: Option<[usize; 2]>,
  outputs: Vec<RecordedTensor>,
}

/// 每次推理都返回同一组录制好的输出，用于在没有模型运行时的情况下驱动整个循环。
#[derive(Debug, Clone)]
pub struct RecordedOutputs {
  outputs: RawOutputSet,
  input_hw: Option<[usize; 2]>,
  calls: u64,
}

impl FromUrlWithScheme for RecordedOutputs {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for RecordedOutputs {
  type Error = RecordedOutputsError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedOutputsError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    info!("加载录制的模型输出: {}", url.path());
    let content = std::fs::read_to_string(url.path())?;
    debug!("录制文件大小: {:.2} KB", content.len() as f64 / 1024.0);
    Self::from_json_str(&content)
  }
}

impl RecordedOutputs {
  pub fn new(outputs: RawOutputSet) -> Self {
    Self {
      outputs,
      input_hw: None,
      calls: 0,
    }
  }

  pub fn with_input_size(mut self, height: usize, width: usize) -> Self {
    self.input_hw = Some([height, width]);
    self
  }

  pub fn from_json_str(content: &str) -> Result<Self, RecordedOutputsError> {
    let file: RecordedFile = serde_json::from_str(content)?;

    let outputs = file
      .outputs
      .into_iter()
      .enumerate()
      .map(|(index, tensor)| {
        let expected: usize = tensor.shape.iter().product();
        let actual = tensor.data.len();
        let shape = tensor.shape.clone();
        ArrayD::from_shape_vec(IxDyn(&tensor.shape), tensor.data).map_err(|_| {
          RecordedOutputsError::InvalidTensor {
            index,
            shape,
            expected,
            actual,
          }
        })
      })
      .collect::<Result<RawOutputSet, _>>()?;

    debug!("录制输出数量: {}", outputs.len());
    Ok(Self {
      outputs,
      input_hw: file.input,
      calls: 0,
    })
  }

  pub fn calls(&self) -> u64 {
    self.calls
  }
}

#[async_trait]
impl InferenceBackend for RecordedOutputs {
  async fn ready(&mut self) -> Result<(), InferenceError> {
    if self.outputs.is_empty() {
      return Err(InferenceError::Unavailable("录制文件中没有输出".to_string()));
    }
    Ok(())
  }

  async fn infer(&mut self, input: &InputTensor) -> Result<RawOutputSet, InferenceError> {
    let [batch, height, width, channels] = input.shape();
    let expected = match self.input_hw {
      Some([h, w]) => vec![1, h, w, RGB_CHANNELS],
      None => vec![1, height, width, RGB_CHANNELS],
    };
    let actual = vec![batch, height, width, channels];
    if actual != expected {
      return Err(InferenceError::ShapeMismatch { expected, actual });
    }

    self.calls += 1;
    Ok(self.outputs.clone())
  }
}
