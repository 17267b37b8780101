// 该文件是 Yunshi （云视） 项目的一部分。
// src/service.rs - 远程视觉服务边界
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

use clap::ValueEnum;
use thiserror::Error;

use crate::job::{Job, JobStatus};

mod http;
pub mod response;

pub use self::http::HttpVisionService;

/// 可调用的服务能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Capability {
  /// 标题、标签、物体与人物分析
  Analyze,
  /// 人物检测
  People,
  /// 人脸检测与属性
  Faces,
  /// 文字识别 (OCR)
  Read,
  /// 背景移除
  RemoveBackground,
  /// 自定义模型分类预测
  Classify,
  /// 上传训练图像并训练模型
  Train,
}

impl Capability {
  /// 需要提交后轮询的异步能力
  pub fn is_async(self) -> bool {
    matches!(self, Capability::Read | Capability::Train)
  }

  pub fn needs_image(self) -> bool {
    !matches!(self, Capability::Train)
  }

  pub fn name(self) -> &'static str {
    match self {
      Capability::Analyze => "analyze",
      Capability::People => "people",
      Capability::Faces => "faces",
      Capability::Read => "read",
      Capability::RemoveBackground => "remove-background",
      Capability::Classify => "classify",
      Capability::Train => "train",
    }
  }
}

impl std::fmt::Display for Capability {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

impl std::str::FromStr for Capability {
  type Err = ServiceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    <Capability as ValueEnum>::from_str(s.trim(), true)
      .map_err(|_| ServiceError::UnknownCapability(s.to_string()))
  }
}

#[derive(Debug, Clone)]
pub struct Request {
  pub capability: Capability,
  pub image: Option<Vec<u8>>,
}

/// 服务返回的结果内容
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
  #[default]
  Empty,
  Bytes(Vec<u8>),
  Json(serde_json::Value),
}

/// 提交后的响应：异步任务编号或同步结果
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
  /// `payload` 是提交响应的正文，任务在提交时已结束时即为最终结果
  Accepted {
    job_id: String,
    status: JobStatus,
    payload: Payload,
  },
  Completed(Payload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
  pub status: JobStatus,
  pub payload: Option<Payload>,
  pub reason: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
  #[error("网络传输错误: {0}")]
  Transport(String),
  #[error("认证失败 (HTTP {status}): {message}")]
  Unauthorized { status: u16, message: String },
  #[error("服务拒绝请求 (HTTP {status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("无法解析服务响应: {0}")]
  Malformed(String),
  #[error("缺少配置项: {0}")]
  MissingSetting(&'static str),
  #[error("未知能力: {0}")]
  UnknownCapability(String),
}

impl ServiceError {
  /// 可重试的瞬时错误
  pub fn is_transient(&self) -> bool {
    match self {
      ServiceError::Transport(_) => true,
      ServiceError::Rejected { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}

/// 远程视觉服务
pub trait VisionService {
  fn submit(&self, request: &Request) -> Result<Submission, ServiceError>;
  fn get_status(&self, job: &Job) -> Result<StatusReport, ServiceError>;
}

impl<T: VisionService + ?Sized> VisionService for &T {
  fn submit(&self, request: &Request) -> Result<Submission, ServiceError> {
    (**self).submit(request)
  }

  fn get_status(&self, job: &Job) -> Result<StatusReport, ServiceError> {
    (**self).get_status(job)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
  pub id: String,
  pub name: String,
}

/// 训练项目的标签与图像管理
pub trait TrainingService {
  fn list_tags(&self) -> Result<Vec<Tag>, ServiceError>;
  fn upload_image(&self, tag: &Tag, image: Vec<u8>) -> Result<(), ServiceError>;
}

impl<T: TrainingService + ?Sized> TrainingService for &T {
  fn list_tags(&self) -> Result<Vec<Tag>, ServiceError> {
    (**self).list_tags()
  }

  fn upload_image(&self, tag: &Tag, image: Vec<u8>) -> Result<(), ServiceError> {
    (**self).upload_image(tag, image)
  }
}
