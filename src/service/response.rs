// 该文件是 Yunshi （云视） 项目的一部分。
// src/service/response.rs - 服务响应解析
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

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  geometry::{InvalidGeometry, RawShape, to_drawable},
  model::{DetectResult, Detection, Tagged},
  service::{Capability, Payload},
};

const FACE_LABEL: &str = "face";
const PERSON_LABEL: &str = "person";

#[derive(Error, Debug)]
pub enum ResponseError {
  #[error("响应 JSON 结构不符: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("{capability} 期望 {expected} 类型的结果")]
  UnexpectedPayload {
    capability: Capability,
    expected: &'static str,
  },
  #[error("检测区域无效: {0}")]
  Geometry(#[from] InvalidGeometry),
}

/// 一次请求的解析结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interpretation {
  pub detections: DetectResult,
  pub captions: Vec<Tagged>,
  pub tags: Vec<Tagged>,
  /// 附加信息（人脸属性、训练迭代等）
  pub notes: Vec<String>,
}

/// 将服务结果映射为检测列表
pub fn interpret(
  capability: Capability,
  payload: &Payload,
  min_confidence: f32,
) -> Result<Interpretation, ResponseError> {
  if capability == Capability::RemoveBackground {
    return match payload {
      Payload::Bytes(_) => Ok(Interpretation::default()),
      _ => Err(ResponseError::UnexpectedPayload {
        capability,
        expected: "图像字节",
      }),
    };
  }

  let Payload::Json(value) = payload else {
    return Err(ResponseError::UnexpectedPayload {
      capability,
      expected: "JSON",
    });
  };

  match capability {
    Capability::Analyze => analysis(value, None),
    Capability::People => analysis(value, Some(min_confidence)),
    Capability::Faces => faces(value),
    Capability::Read => read(value),
    Capability::Classify => classify(value),
    Capability::Train => train(value),
    Capability::RemoveBackground => Ok(Interpretation::default()),
  }
}

#[derive(Deserialize)]
struct BoundingBox {
  x: f32,
  y: f32,
  w: f32,
  h: f32,
}

impl From<&BoundingBox> for RawShape {
  fn from(b: &BoundingBox) -> Self {
    RawShape::Rect {
      x: b.x,
      y: b.y,
      w: b.w,
      h: b.h,
    }
  }
}

#[derive(Deserialize)]
struct NamedConfidence {
  #[serde(alias = "text")]
  name: String,
  confidence: f32,
}

impl From<NamedConfidence> for Tagged {
  fn from(n: NamedConfidence) -> Self {
    Tagged {
      text: n.name,
      confidence: n.confidence,
    }
  }
}

#[derive(Deserialize)]
struct Values<T> {
  #[serde(default = "Vec::new")]
  values: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedObject {
  bounding_box: BoundingBox,
  #[serde(default)]
  tags: Vec<NamedConfidence>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedPerson {
  bounding_box: BoundingBox,
  confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResult {
  caption_result: Option<NamedConfidence>,
  dense_captions_result: Option<Values<NamedConfidence>>,
  tags_result: Option<Values<NamedConfidence>>,
  objects_result: Option<Values<DetectedObject>>,
  people_result: Option<Values<DetectedPerson>>,
}

fn analysis(value: &Value, people_threshold: Option<f32>) -> Result<Interpretation, ResponseError> {
  let result = AnalysisResult::deserialize(value)?;
  let mut out = Interpretation::default();
  let mut detections = Vec::new();

  out.captions.extend(result.caption_result.map(Tagged::from));
  if let Some(dense) = result.dense_captions_result {
    out.captions.extend(dense.values.into_iter().map(Tagged::from));
  }
  if let Some(tags) = result.tags_result {
    out.tags.extend(tags.values.into_iter().map(Tagged::from));
  }

  if let Some(objects) = result.objects_result {
    for object in objects.values {
      let shape = to_drawable(&RawShape::from(&object.bounding_box))?;
      // 物体取置信度最高的标签
      let (label, confidence) = object
        .tags
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|t| (t.name, t.confidence))
        .unwrap_or_else(|| ("object".to_string(), 0.0));
      detections.push(Detection::new(label, confidence, shape));
    }
  }

  if let Some(people) = result.people_result {
    for person in people.values {
      if people_threshold.is_some_and(|t| person.confidence <= t) {
        debug!("忽略低置信度人物: {:.4}", person.confidence);
        continue;
      }
      let shape = to_drawable(&RawShape::from(&person.bounding_box))?;
      detections.push(Detection::new(PERSON_LABEL, person.confidence, shape));
    }
  }

  out.detections = detections.into();
  Ok(out)
}

#[derive(Deserialize)]
struct FaceRectangle {
  top: f32,
  left: f32,
  width: f32,
  height: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedFace {
  face_rectangle: FaceRectangle,
  #[serde(default)]
  face_attributes: Option<serde_json::Map<String, Value>>,
}

fn faces(value: &Value) -> Result<Interpretation, ResponseError> {
  let faces = Vec::<DetectedFace>::deserialize(value)?;
  let mut out = Interpretation::default();
  let mut detections = Vec::with_capacity(faces.len());

  for (index, face) in faces.into_iter().enumerate() {
    let r = &face.face_rectangle;
    let shape = to_drawable(&RawShape::Rect {
      x: r.left,
      y: r.top,
      w: r.width,
      h: r.height,
    })?;
    detections.push(Detection::new(FACE_LABEL, 1.0, shape));

    for (name, attribute) in face.face_attributes.into_iter().flatten() {
      let note = format!("人脸 {} - {}: {}", index + 1, name, describe_attribute(&attribute));
      info!("{}", note);
      out.notes.push(note);
    }
  }

  out.detections = detections.into();
  Ok(out)
}

fn describe_attribute(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Object(map) => map
      .iter()
      .map(|(k, v)| format!("{}={}", k, describe_attribute(v)))
      .collect::<Vec<_>>()
      .join(", "),
    other => other.to_string(),
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadWord {
  #[serde(default)]
  text: String,
  confidence: f32,
  bounding_box: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadLine {
  bounding_box: Vec<f32>,
  text: String,
  #[serde(default)]
  words: Vec<ReadWord>,
}

#[derive(Deserialize)]
struct ReadPage {
  #[serde(default)]
  lines: Vec<ReadLine>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
  #[serde(default)]
  read_results: Vec<ReadPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
  analyze_result: Option<AnalyzeResult>,
}

fn read(value: &Value) -> Result<Interpretation, ResponseError> {
  let operation = ReadOperation::deserialize(value)?;
  let mut detections = Vec::new();
  let mut notes = Vec::new();

  let pages = operation
    .analyze_result
    .map(|r| r.read_results)
    .unwrap_or_default();
  for line in pages.into_iter().flat_map(|p| p.lines) {
    let shape = to_drawable(&RawShape::Flat(line.bounding_box))?;
    let confidence = if line.words.is_empty() {
      1.0
    } else {
      line.words.iter().map(|w| w.confidence).sum::<f32>() / line.words.len() as f32
    };
    for word in &line.words {
      let mut note = format!("词: '{}', 置信度: {:.4}", word.text, word.confidence);
      if let Some(area) = &word.bounding_box {
        to_drawable(&RawShape::Flat(area.clone()))?;
        note.push_str(&format!(", 区域: {:?}", area));
      }
      debug!("{}", note);
      notes.push(note);
    }
    detections.push(Detection::new(line.text, confidence, shape));
  }

  Ok(Interpretation {
    detections: detections.into(),
    notes,
    ..Default::default()
  })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
  tag_name: String,
  probability: f32,
}

#[derive(Deserialize)]
struct Predictions {
  #[serde(default)]
  predictions: Vec<Prediction>,
}

fn classify(value: &Value) -> Result<Interpretation, ResponseError> {
  let result = Predictions::deserialize(value)?;
  let mut tags: Vec<Tagged> = result
    .predictions
    .into_iter()
    .map(|p| Tagged {
      text: p.tag_name,
      confidence: p.probability,
    })
    .collect();
  tags.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
  Ok(Interpretation {
    tags,
    ..Default::default()
  })
}

#[derive(Deserialize)]
struct Iteration {
  id: String,
  #[serde(default)]
  name: Option<String>,
  status: String,
}

fn train(value: &Value) -> Result<Interpretation, ResponseError> {
  let iteration = Iteration::deserialize(value)?;
  let note = format!(
    "训练迭代 {} ({}) 状态: {}",
    iteration.name.as_deref().unwrap_or("-"),
    iteration.id,
    iteration.status
  );
  Ok(Interpretation {
    notes: vec![note],
    ..Default::default()
  })
}
