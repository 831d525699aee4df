// 该文件是 Kouzhao （口罩） 项目的一部分。
// tests/properties.rs - 编码、过滤与绘制的性质测试
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

use proptest::prelude::*;

use kouzhao::{
  codec::{Proposal, ScreenBox, TensorCodec},
  filter::{ClassCatalog, DetectionFilter, FilterError},
  frame::Frame,
};

fn frame_bytes() -> impl Strategy<Value = (usize, usize, Vec<u8>)> {
  (1usize..12, 1usize..12).prop_flat_map(|(height, width)| {
    prop::collection::vec(any::<u8>(), height * width * 3)
      .prop_map(move |data| (height, width, data))
  })
}

fn proposal(score: f32, class_id: i64) -> Proposal {
  Proposal {
    score,
    class_id,
    normalized: [0.0; 4],
    bbox: ScreenBox::new(0.0, 0.0, 1.0, 1.0),
  }
}

proptest! {
  #[test]
  fn encode_keeps_every_sample((height, width, data) in frame_bytes()) {
    let frame = Frame::new(height, width, 3, data.clone()).unwrap();
    let tensor = TensorCodec::default().encode(&frame).unwrap();

    prop_assert_eq!(tensor.shape(), [1, height, width, 3]);
    let samples: Vec<i32> = tensor.view().iter().copied().collect();
    let expected: Vec<i32> = data.iter().map(|&v| i32::from(v)).collect();
    prop_assert_eq!(samples, expected);
  }

  #[test]
  fn filter_keeps_scores_above_threshold_in_order(
    threshold in 0.0f32..=1.0,
    scored in prop::collection::vec((0.0f32..=1.0, 1i64..=3), 0..64),
  ) {
    let filter = DetectionFilter::new(threshold, Arc::new(ClassCatalog::masks())).unwrap();
    let proposals: Vec<Proposal> = scored.iter().map(|&(s, c)| proposal(s, c)).collect();

    let detections = filter.filter(&proposals).unwrap();
    let kept: Vec<(f32, i64)> = detections.iter().map(|d| (d.score, d.class_id)).collect();
    let expected: Vec<(f32, i64)> = scored.into_iter().filter(|&(s, _)| s > threshold).collect();

    prop_assert_eq!(kept, expected);
    for detection in &detections {
      prop_assert!(detection.score > threshold);
    }
  }

  #[test]
  fn unknown_class_above_threshold_is_rejected(
    threshold in 0.0f32..0.99,
    class_id in prop_oneof![i64::MIN..=0, 4i64..=i64::MAX],
  ) {
    let filter = DetectionFilter::new(threshold, Arc::new(ClassCatalog::masks())).unwrap();
    let proposals = [proposal(1.0, 1), proposal(1.0, class_id)];

    prop_assert_eq!(
      filter.filter(&proposals),
      Err(FilterError::UnknownClass { class_id, catalog_len: 3 })
    );
  }

  #[test]
  fn unknown_class_below_threshold_is_ignored(
    threshold in 0.01f32..=1.0,
    class_id in 4i64..1000,
  ) {
    let filter = DetectionFilter::new(threshold, Arc::new(ClassCatalog::masks())).unwrap();
    let proposals = [proposal(0.0, class_id)];

    prop_assert_eq!(filter.filter(&proposals).map(|d| d.len()), Ok(0));
  }
}

#[cfg(feature = "save_image_file")]
mod drawing {
  use super::*;

  use image::{Rgba, RgbaImage};
  use kouzhao::output::draw::{fill_box, stroke_box};

  const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
  const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

  fn coordinate() -> impl Strategy<Value = f32> {
    prop_oneof![
      8 => -100.0f32..100.0,
      1 => Just(f32::MAX),
      1 => Just(f32::MIN),
      1 => Just(f32::INFINITY),
      1 => Just(f32::NAN),
    ]
  }

  proptest! {
    #[test]
    fn stroke_never_panics(
      x in coordinate(),
      y in coordinate(),
      width in coordinate(),
      height in coordinate(),
      line_width in 0u32..64,
    ) {
      let mut canvas = RgbaImage::new(32, 24);
      stroke_box(&mut canvas, ScreenBox::new(x, y, width, height), RED, line_width);
    }

    #[test]
    fn fill_stays_inside_box(
      x in -40.0f32..40.0,
      y in -40.0f32..40.0,
      width in -40.0f32..40.0,
      height in -40.0f32..40.0,
    ) {
      let mut canvas = RgbaImage::new(32, 24);
      let rect = ScreenBox::new(x, y, width, height);
      fill_box(&mut canvas, rect, RED);

      let rect = rect.normalized();
      let (left, top) = (rect.x.floor(), rect.y.floor());
      let (right, bottom) = ((rect.x + rect.width).ceil(), (rect.y + rect.height).ceil());
      for (px, py, pixel) in canvas.enumerate_pixels() {
        let (px, py) = (px as f32, py as f32);
        let inside = px >= left && px < right && py >= top && py < bottom;
        if !inside {
          prop_assert_eq!(*pixel, CLEAR);
        }
      }
    }
  }
}
