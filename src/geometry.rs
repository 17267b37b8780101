// 该文件是 Yunshi （云视） 项目的一部分。
// src/geometry.rs - 检测区域几何形状
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

use thiserror::Error;

const MIN_POLYGON_POINTS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidGeometry {
  #[error("多边形至少需要 3 个顶点, 实际 {0} 个")]
  TooFewPoints(usize),
  #[error("矩形尺寸不能为负: {width}x{height}")]
  NegativeSize { width: f32, height: f32 },
  #[error("坐标列表长度必须为偶数, 实际长度 {0}")]
  OddCoordinates(usize),
  #[error("坐标包含非有限数值")]
  NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 服务返回的原始形状
#[derive(Debug, Clone, PartialEq)]
pub enum RawShape {
  /// 左上角 + 宽高
  Rect { x: f32, y: f32, w: f32, h: f32 },
  /// 有序顶点
  Corners(Vec<Point>),
  /// 扁平坐标 [x1, y1, x2, y2, ...]
  Flat(Vec<f32>),
}

/// 至少 3 个有限坐标顶点的多边形
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
  points: Box<[Point]>,
}

impl Polygon {
  pub fn new(points: Vec<Point>) -> Result<Self, InvalidGeometry> {
    if points.len() < MIN_POLYGON_POINTS {
      return Err(InvalidGeometry::TooFewPoints(points.len()));
    }
    if !points.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
      return Err(InvalidGeometry::NonFinite);
    }
    Ok(Self {
      points: points.into_boxed_slice(),
    })
  }

  pub fn points(&self) -> &[Point] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn first(&self) -> Point {
    self.points[0]
  }
}

/// 可绘制的几何形状
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
  Rectangle { x: f32, y: f32, w: f32, h: f32 },
  Polygon(Polygon),
}

/// 将原始形状规范化为可绘制形状
pub fn to_drawable(raw: &RawShape) -> Result<Geometry, InvalidGeometry> {
  match raw {
    RawShape::Rect { x, y, w, h } => {
      if ![*x, *y, *w, *h].iter().all(|v| v.is_finite()) {
        return Err(InvalidGeometry::NonFinite);
      }
      if *w < 0.0 || *h < 0.0 {
        return Err(InvalidGeometry::NegativeSize {
          width: *w,
          height: *h,
        });
      }
      Ok(Geometry::Rectangle {
        x: *x,
        y: *y,
        w: *w,
        h: *h,
      })
    }
    RawShape::Corners(points) => Ok(Geometry::Polygon(Polygon::new(points.clone())?)),
    RawShape::Flat(coords) => {
      if coords.len() % 2 != 0 {
        return Err(InvalidGeometry::OddCoordinates(coords.len()));
      }
      let points = coords
        .chunks_exact(2)
        .map(|pair| Point::new(pair[0], pair[1]))
        .collect();
      Ok(Geometry::Polygon(Polygon::new(points)?))
    }
  }
}

impl TryFrom<RawShape> for Geometry {
  type Error = InvalidGeometry;

  fn try_from(raw: RawShape) -> Result<Self, Self::Error> {
    to_drawable(&raw)
  }
}

impl Geometry {
  /// 标签锚点：矩形取左上角，多边形取第一个顶点
  pub fn anchor(&self) -> Point {
    match self {
      Geometry::Rectangle { x, y, .. } => Point::new(*x, *y),
      Geometry::Polygon(polygon) => polygon.first(),
    }
  }

  /// 外接框 [x_min, y_min, x_max, y_max]
  pub fn bounds(&self) -> [f32; 4] {
    match self {
      Geometry::Rectangle { x, y, w, h } => [*x, *y, x + w, y + h],
      Geometry::Polygon(polygon) => polygon.points().iter().fold(
        [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
        |[x0, y0, x1, y1], p| [x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)],
      ),
    }
  }
}
