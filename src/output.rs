// 该文件是 Yunshi （云视） 项目的一部分。
// src/output.rs - 结果渲染与输出定义
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

use image::RgbImage;
use thiserror::Error;

use crate::{geometry::Geometry, model::DetectResult};

pub mod draw;
mod save_image_file;

pub use self::draw::{Draw, Record};
pub use self::save_image_file::{save_bytes, save_image};

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("写入文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法加载字体 {path}: {reason}")]
  Font { path: PathBuf, reason: String },
}

/// 已绘制的一个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub label: String,
  /// 百分比形式的置信度，如 `87.00%`
  pub confidence: String,
  /// 标签锚点（像素坐标）
  pub anchor: (i32, i32),
  pub shape: Geometry,
}

/// 源图像副本及其上绘制的检测结果
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  image: RgbImage,
  overlays: Vec<Overlay>,
}

impl AnnotatedImage {
  pub(crate) fn new(image: RgbImage, overlays: Vec<Overlay>) -> Self {
    Self { image, overlays }
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn overlays(&self) -> &[Overlay] {
    &self.overlays
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  /// 写入文件，格式由扩展名决定
  pub fn flush(self, path: impl AsRef<Path>) -> Result<(), RenderError> {
    save_image(&self.image, path.as_ref())
  }
}

/// 在源图像副本上绘制全部检测结果
pub fn render(draw: &Draw, image: &RgbImage, detections: &DetectResult) -> AnnotatedImage {
  draw.render(image, detections)
}

pub fn flush(annotated: AnnotatedImage, path: impl AsRef<Path>) -> Result<(), RenderError> {
  annotated.flush(path)
}
