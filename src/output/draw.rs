// 该文件是 Yunshi （云视） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
  rect::Rect,
};
use tracing::debug;

use crate::{
  geometry::{Geometry, Point},
  model::{DetectResult, Detection, format_confidence},
  output::{AnnotatedImage, Overlay, RenderError},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const OUTLINE_COLOR: [u8; 3] = [0, 255, 255]; // 青色
const OUTLINE_WIDTH: u32 = 3;
const TEXT_COLOR: [u8; 3] = [0, 0, 0];
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // DejaVu Sans

pub struct Draw {
  color: Rgb<u8>,
  line_width: u32,
  font: FontArc,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: Rgb(OUTLINE_COLOR),
      line_width: OUTLINE_WIDTH,
      font: FontArc::try_from_slice(DEFAULT_FONT).expect("无法加载嵌入的字体文件"),
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = Rgb(color);
    self
  }

  pub fn with_line_width(mut self, line_width: u32) -> Self {
    self.line_width = line_width.max(1);
    self
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = font;
    self
  }

  /// 从 TTF/OTF 文件加载标签字体，替换内置字体
  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, RenderError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| RenderError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontArc::try_from_vec(data).map_err(|e| RenderError::Font {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;
    Ok(self.with_font(font))
  }

  pub fn color(&self) -> Rgb<u8> {
    self.color
  }

  /// 按检测顺序绘制，不重排、不去重
  pub fn render(&self, image: &RgbImage, detections: &DetectResult) -> AnnotatedImage {
    let mut canvas = image.clone();
    let mut overlays = Vec::with_capacity(detections.len());
    for detection in detections.iter() {
      overlays.push(self.draw_detection(&mut canvas, detection));
    }
    AnnotatedImage::new(canvas, overlays)
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) -> Overlay {
    let shape = detection.shape();
    match shape {
      Geometry::Rectangle { x, y, w, h } => self.draw_rectangle(image, *x, *y, *w, *h),
      Geometry::Polygon(polygon) => self.draw_polygon(image, polygon.points()),
    }

    let anchor = shape.anchor();
    let anchor = (anchor.x.round() as i32, anchor.y.round() as i32);
    let confidence = format_confidence(detection.confidence());
    self.draw_label(
      image,
      anchor,
      &format!("{} {}", detection.label(), confidence),
    );

    Overlay {
      label: detection.label().to_string(),
      confidence,
      anchor,
      shape: shape.clone(),
    }
  }

  fn draw_rectangle(&self, image: &mut RgbImage, x: f32, y: f32, w: f32, h: f32) {
    if ![x, y, w, h].iter().all(|v| v.is_finite()) {
      debug!("矩形坐标非有限值, 跳过边框");
      return;
    }

    // 裁剪到画布外一个像素以内
    let (iw, ih) = (image.width() as f32, image.height() as f32);
    let x0 = x.round().clamp(-1.0, iw);
    let y0 = y.round().clamp(-1.0, ih);
    let x1 = (x + w.max(0.0)).round().clamp(-1.0, iw);
    let y1 = (y + h.max(0.0)).round().clamp(-1.0, ih);
    let w = ((x1 - x0) as u32).max(1);
    let h = ((y1 - y0) as u32).max(1);
    let (x, y) = (x0 as i32, y0 as i32);

    // 向内加粗
    for t in 0..self.line_width {
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, rect, self.color);
    }
  }

  fn draw_polygon(&self, image: &mut RgbImage, points: &[Point]) {
    let center = (self.line_width as f32 - 1.0) / 2.0;
    for t in 0..self.line_width {
      let o = t as f32 - center;
      for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        draw_line_segment_mut(image, (a.x + o, a.y), (b.x + o, b.y), self.color);
        draw_line_segment_mut(image, (a.x, a.y + o), (b.x, b.y + o), self.color);
      }
    }
  }

  fn draw_label(&self, image: &mut RgbImage, anchor: (i32, i32), label: &str) {
    let w = image.width() as i32;

    // 估算文本大小（粗略估计）
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景放在锚点上方
    let label_x = anchor.0.max(0);
    let label_y = (anchor.1 - text_height).max(0);

    let max_width = (w - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width == 0 || label_height == 0 {
      debug!("标签 '{}' 超出图像范围, 跳过", label);
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, self.color);

    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      &self.font,
      label,
    );
  }
}

/// 以文本形式记录检测结果
pub struct Record;

impl Record {
  /// 写入与图像同名的 `.txt` 文件，每行: 标签, 置信度, x_min, y_min, x_max, y_max
  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), RenderError> {
    let records: Vec<String> = result
      .iter()
      .map(|item| {
        let [x0, y0, x1, y1] = item.shape().bounds();
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          item.label(),
          item.confidence(),
          x0,
          y0,
          x1,
          y1
        )
      })
      .collect();
    let target = path.with_extension("txt");
    std::fs::write(&target, records.join("\n")).map_err(|source| RenderError::Io {
      path: target,
      source,
    })
  }
}
