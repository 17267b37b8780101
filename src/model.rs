// 该文件是 Yunshi （云视） 项目的一部分。
// src/model.rs - 检测结果定义
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

use std::collections::BTreeMap;

use crate::geometry::Geometry;

/// 单个识别实体（物体、人脸、文本行）
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  label: String,
  confidence: f32,
  shape: Geometry,
}

impl Detection {
  /// 置信度会被截断到 [0, 1]
  pub fn new(label: impl Into<String>, confidence: f32, shape: Geometry) -> Self {
    let confidence = if confidence.is_nan() {
      0.0
    } else {
      confidence.clamp(0.0, 1.0)
    };
    Self {
      label: label.into(),
      confidence,
      shape,
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn shape(&self) -> &Geometry {
    &self.shape
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  /// 按标签统计数量
  pub fn label_counts(&self) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in self.items.iter() {
      *counts.entry(item.label.clone()).or_insert(0) += 1;
    }
    counts
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 无几何位置的结果（标题、标签、分类预测）
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
  pub text: String,
  pub confidence: f32,
}

impl std::fmt::Display for Tagged {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "'{}' (置信度: {})",
      self.text,
      format_confidence(self.confidence)
    )
  }
}

/// 以两位小数的百分比显示置信度
pub fn format_confidence(confidence: f32) -> String {
  format!("{:.2}%", confidence * 100.0)
}
