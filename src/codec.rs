// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/codec.rs - 张量编解码
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

use std::fmt;

use ndarray::{
  Array4, ArrayD, ArrayView, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis, Dimension,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::{
  frame::{Frame, RGB_CHANNELS},
  scope::TensorFootprint,
};

/// (row, col, channel) 的轴置换。模型期望 HWC，因此是恒等置换。
const HWC_AXES: [usize; 3] = [0, 1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputName {
  Scores,
  Boxes,
  Classes,
}

impl fmt::Display for OutputName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OutputName::Scores => write!(f, "scores"),
      OutputName::Boxes => write!(f, "boxes"),
      OutputName::Classes => write!(f, "classes"),
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
  #[error("不支持的帧形状: {height}x{width}x{channels}, 期望 3 通道 RGB")]
  UnsupportedFrameShape {
    height: usize,
    width: usize,
    channels: usize,
  },
  #[error("模型输出缺失: {name} 位于第 {index} 个输出, 实际只有 {available} 个输出")]
  MissingOutput {
    name: OutputName,
    index: usize,
    available: usize,
  },
  #[error("{name} 输出形状无效: {shape:?}")]
  OutputShape { name: OutputName, shape: Vec<usize> },
  #[error("候选框数量不一致: scores {scores}, boxes {boxes}, classes {classes}")]
  ProposalCountMismatch {
    scores: usize,
    boxes: usize,
    classes: usize,
  },
}

/// 模型输入张量，形状为 (1, H, W, C)。
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  samples: Array4<i32>,
}

impl InputTensor {
  pub fn from_array(samples: Array4<i32>) -> Self {
    Self { samples }
  }

  pub fn shape(&self) -> [usize; 4] {
    let (n, h, w, c) = self.samples.dim();
    [n, h, w, c]
  }

  pub fn view(&self) -> ArrayView4<'_, i32> {
    self.samples.view()
  }
}

impl TensorFootprint for InputTensor {
  fn footprint(&self) -> usize {
    self.samples.len() * std::mem::size_of::<i32>()
  }
}

/// 一次推理返回的原始输出，按模型的输出顺序排列。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutputSet {
  tensors: Vec<ArrayD<f32>>,
}

impl RawOutputSet {
  pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
    Self { tensors }
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&ArrayD<f32>> {
    self.tensors.get(index)
  }

  fn slot<D: Dimension>(
    &self,
    name: OutputName,
    index: usize,
  ) -> Result<ArrayView<'_, f32, D>, CodecError> {
    let tensor = self.tensors.get(index).ok_or(CodecError::MissingOutput {
      name,
      index,
      available: self.tensors.len(),
    })?;

    tensor
      .view()
      .into_dimensionality::<D>()
      .map_err(|_| CodecError::OutputShape {
        name,
        shape: tensor.shape().to_vec(),
      })
  }

  /// 按 [`OutputSlots`] 取出 scores/boxes/classes，并校验形状，只保留第一个批次。
  pub fn bind(&self, slots: &OutputSlots) -> Result<NamedOutputs<'_>, CodecError> {
    let scores: ArrayView2<f32> = self.slot(OutputName::Scores, slots.scores)?;
    let boxes: ArrayView3<f32> = self.slot(OutputName::Boxes, slots.boxes)?;
    let classes: ArrayView2<f32> = self.slot(OutputName::Classes, slots.classes)?;

    if scores.nrows() == 0 {
      return Err(CodecError::OutputShape {
        name: OutputName::Scores,
        shape: scores.shape().to_vec(),
      });
    }
    if boxes.len_of(Axis(0)) == 0 || boxes.len_of(Axis(2)) != 4 {
      return Err(CodecError::OutputShape {
        name: OutputName::Boxes,
        shape: boxes.shape().to_vec(),
      });
    }
    if classes.nrows() == 0 {
      return Err(CodecError::OutputShape {
        name: OutputName::Classes,
        shape: classes.shape().to_vec(),
      });
    }

    let scores = scores.index_axis_move(Axis(0), 0);
    let boxes = boxes.index_axis_move(Axis(0), 0);
    let classes = classes.index_axis_move(Axis(0), 0);

    if scores.len() != boxes.nrows() || scores.len() != classes.len() {
      return Err(CodecError::ProposalCountMismatch {
        scores: scores.len(),
        boxes: boxes.nrows(),
        classes: classes.len(),
      });
    }

    Ok(NamedOutputs {
      scores,
      boxes,
      classes,
    })
  }
}

impl FromIterator<ArrayD<f32>> for RawOutputSet {
  fn from_iter<I: IntoIterator<Item = ArrayD<f32>>>(iter: I) -> Self {
    Self::new(iter.into_iter().collect())
  }
}

impl TensorFootprint for RawOutputSet {
  fn footprint(&self) -> usize {
    self
      .tensors
      .iter()
      .map(|tensor| tensor.len() * std::mem::size_of::<f32>())
      .sum()
  }
}

/// 输出名称到输出位置的映射。不同模型的输出顺序不同，由配置给出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlots {
  pub scores: usize,
  pub boxes: usize,
  pub classes: usize,
}

impl Default for OutputSlots {
  fn default() -> Self {
    Self {
      scores: 1,
      boxes: 7,
      classes: 5,
    }
  }
}

impl OutputSlots {
  pub fn is_distinct(&self) -> bool {
    self.scores != self.boxes && self.scores != self.classes && self.boxes != self.classes
  }
}

/// 单个批次的具名输出视图。
#[derive(Debug, Clone)]
pub struct NamedOutputs<'a> {
  pub scores: ArrayView1<'a, f32>,
  pub boxes: ArrayView2<'a, f32>,
  pub classes: ArrayView1<'a, f32>,
}

/// 视频在屏幕上的显示尺寸，叠加层与之一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
  pub width: u32,
  pub height: u32,
}

impl DisplaySize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl Default for DisplaySize {
  fn default() -> Self {
    Self {
      width: 600,
      height: 500,
    }
  }
}

/// 屏幕像素坐标下的框 (x, y, width, height)。宽高可能为负。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl ScreenBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 把负宽高翻转为正，左上角随之移动，与画布 `strokeRect` 的行为一致。
  pub fn normalized(&self) -> Self {
    let (x, width) = if self.width < 0.0 {
      (self.x + self.width, -self.width)
    } else {
      (self.x, self.width)
    };
    let (y, height) = if self.height < 0.0 {
      (self.y + self.height, -self.height)
    } else {
      (self.y, self.height)
    };
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

/// 解码后、阈值过滤前的一个候选框。
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
  pub score: f32,
  pub class_id: i64,
  /// 模型给出的归一化坐标，顺序为 [y, x, h, w]。
  pub normalized: [f32; 4],
  pub bbox: ScreenBox,
}

#[derive(Debug, Clone, Default)]
pub struct TensorCodec {
  slots: OutputSlots,
}

impl TensorCodec {
  pub fn new(slots: OutputSlots) -> Self {
    Self { slots }
  }

  /// 帧转为 (1, H, W, 3) 的整数张量。
  pub fn encode(&self, frame: &Frame) -> Result<InputTensor, CodecError> {
    let (height, width, channels) = frame.shape();
    let unsupported = CodecError::UnsupportedFrameShape {
      height,
      width,
      channels,
    };

    if channels != RGB_CHANNELS {
      return Err(unsupported);
    }

    let hwc = ArrayView3::from_shape((height, width, channels), frame.as_hwc())
      .map_err(|_| unsupported)?;
    let samples = hwc
      .permuted_axes(HWC_AXES)
      .mapv(i32::from)
      .insert_axis(Axis(0));

    trace!("编码帧 {}x{} -> {:?}", width, height, samples.shape());
    Ok(InputTensor { samples })
  }

  /// 原始输出转为候选框，同时完成归一化坐标到屏幕坐标的转换。
  ///
  /// 角点计算在宽高之间交叉取值，与原模型的坐标约定保持一致：
  /// `x2 = w * display_height`，`y2 = h * display_width`。
  pub fn decode(
    &self,
    raw: &RawOutputSet,
    display: DisplaySize,
  ) -> Result<Vec<Proposal>, CodecError> {
    let outputs = raw.bind(&self.slots)?;
    let display_w = display.width as f32;
    let display_h = display.height as f32;

    let proposals: Vec<Proposal> = outputs
      .scores
      .iter()
      .zip(outputs.classes.iter())
      .zip(outputs.boxes.rows())
      .map(|((&score, &class), row)| {
        let normalized = [row[0], row[1], row[2], row[3]];
        let [y, x, h, w] = normalized;

        let x1 = x * display_w;
        let y1 = y * display_h;
        let x2 = w * display_h;
        let y2 = h * display_w;

        Proposal {
          score,
          class_id: class.round() as i64,
          normalized,
          bbox: ScreenBox::new(x1, y1, x2 - x1, y2 - y1),
        }
      })
      .collect();

    trace!("解码得到 {} 个候选框", proposals.len());
    Ok(proposals)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{IxDyn, arr1};

  fn tensor(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
  }

  /// scores/classes/boxes 放在 0/1/2 三个位置
  fn compact_slots() -> OutputSlots {
    OutputSlots {
      scores: 0,
      classes: 1,
      boxes: 2,
    }
  }

  fn raw_outputs(scores: &[f32], classes: &[f32], boxes: &[[f32; 4]]) -> RawOutputSet {
    let n = scores.len();
    RawOutputSet::new(vec![
      tensor(&[1, n], scores.to_vec()),
      tensor(&[1, classes.len()], classes.to_vec()),
      tensor(&[1, boxes.len(), 4], boxes.iter().flatten().copied().collect()),
    ])
  }

  fn assert_close(actual: f32, expected: f32) {
    assert!(
      (actual - expected).abs() < 1e-3,
      "expected {expected}, got {actual}"
    );
  }

  #[test]
  fn encode_adds_batch_dimension_and_keeps_hwc_order() {
    let data: Vec<u8> = (0..2 * 3 * 3).map(|v| (v * 13) as u8).collect();
    let frame = Frame::new(2, 3, 3, data.clone()).unwrap();

    let tensor = TensorCodec::default().encode(&frame).unwrap();

    assert_eq!(tensor.shape(), [1, 2, 3, 3]);
    let view = tensor.view();
    for row in 0..2 {
      for col in 0..3 {
        for ch in 0..3 {
          let expected = data[(row * 3 + col) * 3 + ch] as i32;
          assert_eq!(view[[0, row, col, ch]], expected);
        }
      }
    }
  }

  #[test]
  fn encode_keeps_full_sample_range() {
    let frame = Frame::new(1, 2, 3, vec![0, 128, 255, 255, 1, 0]).unwrap();
    let tensor = TensorCodec::default().encode(&frame).unwrap();
    let values: Vec<i32> = tensor.view().iter().copied().collect();
    assert_eq!(values, vec![0, 128, 255, 255, 1, 0]);
    assert!(values.iter().all(|v| (0..=255).contains(v)));
  }

  #[test]
  fn encode_rejects_non_rgb_frames() {
    let codec = TensorCodec::default();
    for channels in [1usize, 2, 4] {
      let frame = Frame::new(2, 2, channels, vec![0; 4 * channels]).unwrap();
      assert_eq!(
        codec.encode(&frame),
        Err(CodecError::UnsupportedFrameShape {
          height: 2,
          width: 2,
          channels
        })
      );
    }
  }

  #[test]
  fn decode_crosses_axes_for_second_corner() {
    let codec = TensorCodec::new(compact_slots());
    let raw = raw_outputs(&[0.9], &[1.0], &[[0.1, 0.2, 0.5, 0.6]]);

    let proposals = codec.decode(&raw, DisplaySize::new(600, 500)).unwrap();

    assert_eq!(proposals.len(), 1);
    let bbox = proposals[0].bbox;
    assert_close(bbox.x, 120.0);
    assert_close(bbox.y, 50.0);
    assert_close(bbox.width, 180.0);
    assert_close(bbox.height, 250.0);
    assert_eq!(proposals[0].normalized, [0.1, 0.2, 0.5, 0.6]);
  }

  #[test]
  fn decode_emits_every_proposal_regardless_of_score() {
    let codec = TensorCodec::new(compact_slots());
    let raw = raw_outputs(
      &[0.0, 0.99, 0.3],
      &[2.0, 1.0, 3.0],
      &[[0.0; 4], [0.1, 0.1, 0.2, 0.2], [0.5; 4]],
    );

    let proposals = codec.decode(&raw, DisplaySize::default()).unwrap();

    let scores: Vec<f32> = proposals.iter().map(|p| p.score).collect();
    let classes: Vec<i64> = proposals.iter().map(|p| p.class_id).collect();
    assert_eq!(scores, vec![0.0, 0.99, 0.3]);
    assert_eq!(classes, vec![2, 1, 3]);
  }

  #[test]
  fn decode_reads_outputs_from_configured_slots() {
    let codec = TensorCodec::default();
    let mut tensors: Vec<ArrayD<f32>> = (0..8).map(|_| tensor(&[1], vec![0.0])).collect();
    tensors[1] = tensor(&[1, 1], vec![0.7]);
    tensors[5] = tensor(&[1, 1], vec![3.0]);
    tensors[7] = tensor(&[1, 1, 4], vec![0.0, 0.0, 1.0, 1.0]);

    let proposals = codec
      .decode(&RawOutputSet::new(tensors), DisplaySize::new(100, 100))
      .unwrap();

    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].score, 0.7);
    assert_eq!(proposals[0].class_id, 3);
    assert_close(proposals[0].bbox.width, 100.0);
  }

  #[test]
  fn decode_reports_missing_slot() {
    let codec = TensorCodec::default();
    let raw = RawOutputSet::new(vec![tensor(&[1, 1], vec![0.5]); 3]);
    assert_eq!(
      codec.decode(&raw, DisplaySize::default()),
      Err(CodecError::MissingOutput {
        name: OutputName::Boxes,
        index: 7,
        available: 3
      })
    );
  }

  #[test]
  fn decode_rejects_boxes_without_four_coordinates() {
    let codec = TensorCodec::new(compact_slots());
    let raw = RawOutputSet::new(vec![
      tensor(&[1, 1], vec![0.5]),
      tensor(&[1, 1], vec![1.0]),
      tensor(&[1, 1, 3], vec![0.0, 0.0, 0.0]),
    ]);
    assert_eq!(
      codec.decode(&raw, DisplaySize::default()),
      Err(CodecError::OutputShape {
        name: OutputName::Boxes,
        shape: vec![1, 1, 3]
      })
    );
  }

  #[test]
  fn decode_rejects_mismatched_proposal_counts() {
    let codec = TensorCodec::new(compact_slots());
    let raw = raw_outputs(&[0.5, 0.6], &[1.0], &[[0.0; 4], [0.0; 4]]);
    assert!(matches!(
      codec.decode(&raw, DisplaySize::default()),
      Err(CodecError::ProposalCountMismatch {
        scores: 2,
        boxes: 2,
        classes: 1
      })
    ));
  }

  #[test]
  fn normalized_box_flips_negative_extent() {
    let flipped = ScreenBox::new(100.0, 50.0, -40.0, -10.0).normalized();
    assert_eq!(flipped, ScreenBox::new(60.0, 40.0, 40.0, 10.0));
  }

  #[test]
  fn footprint_counts_all_tensors() {
    let raw = RawOutputSet::new(vec![arr1(&[1.0f32, 2.0]).into_dyn(), tensor(&[1, 3], vec![0.0; 3])]);
    assert_eq!(raw.footprint(), 5 * std::mem::size_of::<f32>());
  }
}
