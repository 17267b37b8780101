// 该文件是 Yunshi （云视） 项目的一部分。
// src/task.rs - 任务编排
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

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{AppConfig, ConfigError},
  input::{ImageFileInput, InputError},
  job::{JobError, PollPolicy, Poller, Sleeper, ThreadSleeper},
  model::Tagged,
  output::{Draw, Record, RenderError, render, save_bytes},
  service::{
    Capability, HttpVisionService, Payload, Request, ServiceError, TrainingService, VisionService,
    response::{ResponseError, interpret},
  },
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Job(#[from] JobError),
  #[error(transparent)]
  Service(#[from] ServiceError),
  #[error(transparent)]
  Response(#[from] ResponseError),
  #[error(transparent)]
  Render(#[from] RenderError),
  #[error("{0} 需要输入图像")]
  MissingInput(Capability),
  #[error("读取训练图像 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, Default)]
pub struct TaskInput {
  pub source: Option<PathBuf>,
  /// 未指定时使用 `<源文件名>_<能力>.<扩展名>`
  pub output: Option<PathBuf>,
  /// 同时写出 `.txt` 检测记录
  pub record: bool,
}

impl TaskInput {
  pub fn image(source: impl Into<PathBuf>) -> Self {
    Self {
      source: Some(source.into()),
      ..Default::default()
    }
  }

  pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
    self.output = output;
    self
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }
}

/// 一次任务的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
  pub capability: Capability,
  pub job_id: String,
  pub detections: usize,
  /// 按检测顺序排列的标签（文字识别时即各行文本）
  pub labels: Vec<String>,
  pub counts: BTreeMap<String, usize>,
  pub captions: Vec<Tagged>,
  pub tags: Vec<Tagged>,
  pub notes: Vec<String>,
  pub uploaded: usize,
  pub output: Option<PathBuf>,
}

impl std::fmt::Display for Report {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "能力: {}", self.capability)?;
    writeln!(f, "任务: {}", self.job_id)?;
    if self.uploaded > 0 {
      writeln!(f, "已上传训练图像: {}", self.uploaded)?;
    }
    writeln!(f, "检测数量: {}", self.detections)?;
    for (label, count) in &self.counts {
      writeln!(f, "  - {}: {}", label, count)?;
    }
    for caption in &self.captions {
      writeln!(f, "描述: {}", caption)?;
    }
    for tag in &self.tags {
      writeln!(f, "标签: {}", tag)?;
    }
    for note in &self.notes {
      writeln!(f, "{}", note)?;
    }
    if let Some(output) = &self.output {
      writeln!(f, "输出文件: {}", output.display())?;
    }
    Ok(())
  }
}

/// `<目录>/<文件名>_<能力>.<扩展名>`，去背景结果固定为 png
pub fn default_output_path(input: &Path, capability: Capability) -> PathBuf {
  let stem = input
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string());
  let ext = match capability {
    Capability::RemoveBackground => "png".to_string(),
    _ => input
      .extension()
      .map(|e| e.to_string_lossy().into_owned())
      .unwrap_or_else(|| "png".to_string()),
  };
  input.with_file_name(format!("{}_{}.{}", stem, capability.name(), ext))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TaskError + use<> {
  let path = path.to_path_buf();
  move |source| TaskError::Io { path, source }
}

fn renders_overlay(capability: Capability) -> bool {
  matches!(
    capability,
    Capability::Analyze | Capability::People | Capability::Faces | Capability::Read
  )
}

pub struct VisionTask<S, Z = ThreadSleeper> {
  poller: Poller<S, Z>,
  draw: Draw,
  min_confidence: f32,
}

impl<S: VisionService> VisionTask<S> {
  pub fn new(service: S, policy: PollPolicy, draw: Draw, min_confidence: f32) -> Self {
    Self::with_poller(Poller::new(service, policy), draw, min_confidence)
  }
}

impl VisionTask<HttpVisionService> {
  pub fn from_config(config: &AppConfig) -> Result<Self, TaskError> {
    let service = HttpVisionService::new(config.service.clone())?;
    let draw = match &config.label_font {
      Some(font) => Draw::default().with_font_file(font)?,
      None => Draw::default(),
    };
    Ok(Self::new(service, config.poll, draw, config.min_confidence))
  }
}

impl<S: VisionService, Z: Sleeper> VisionTask<S, Z> {
  pub fn with_poller(poller: Poller<S, Z>, draw: Draw, min_confidence: f32) -> Self {
    Self {
      poller,
      draw,
      min_confidence,
    }
  }

  pub fn poller(&self) -> &Poller<S, Z> {
    &self.poller
  }

  /// 读取图像、提交请求、等待结果、解析并输出
  pub fn run(&self, capability: Capability, input: &TaskInput) -> Result<Report, TaskError> {
    info!("开始任务: {}", capability);
    let source = if capability.needs_image() {
      let path = input
        .source
        .as_ref()
        .ok_or(TaskError::MissingInput(capability))?;
      Some(ImageFileInput::open(path)?)
    } else {
      None
    };

    let request = Request {
      capability,
      image: source.as_ref().map(|s| s.bytes().to_vec()),
    };
    let now = std::time::Instant::now();
    let job = self.poller.submit(&request)?;
    let job = self.poller.poll_until_terminal(job)?;
    info!("服务处理完成，耗时: {:.2?}", now.elapsed());

    let interpretation = interpret(capability, &job.payload, self.min_confidence)?;
    for caption in &interpretation.captions {
      info!("描述: {}", caption);
    }
    for tag in &interpretation.tags {
      info!("标签: {}", tag);
    }

    let output = match (&source, &job.payload) {
      (Some(src), Payload::Bytes(bytes)) if capability == Capability::RemoveBackground => {
        let path = self.output_path(input, src, capability);
        save_bytes(bytes, &path)?;
        Some(path)
      }
      (Some(src), _) if renders_overlay(capability) => {
        let path = self.output_path(input, src, capability);
        let annotated = render(&self.draw, src.image(), &interpretation.detections);
        info!("已绘制 {} 个检测结果", annotated.overlays().len());
        annotated.flush(&path)?;
        if input.record {
          Record.record(&interpretation.detections, &path)?;
        }
        Some(path)
      }
      _ => None,
    };

    Ok(Report {
      capability,
      job_id: job.id,
      detections: interpretation.detections.len(),
      labels: interpretation
        .detections
        .iter()
        .map(|d| d.label().to_string())
        .collect(),
      counts: interpretation.detections.label_counts(),
      captions: interpretation.captions,
      tags: interpretation.tags,
      notes: interpretation.notes,
      uploaded: 0,
      output,
    })
  }

  fn output_path(&self, input: &TaskInput, source: &ImageFileInput, capability: Capability) -> PathBuf {
    input
      .output
      .clone()
      .unwrap_or_else(|| default_output_path(source.path(), capability))
  }
}

impl<S: VisionService + TrainingService, Z: Sleeper> VisionTask<S, Z> {
  /// 将 `<folder>/<标签名>/` 下的图像上传到对应标签
  pub fn upload_training_images(&self, folder: &Path) -> Result<usize, TaskError> {
    let service = self.poller.service();
    let tags = service.list_tags()?;
    let mut uploaded = 0;

    for tag in &tags {
      let dir = folder.join(&tag.name);
      if !dir.is_dir() {
        warn!("标签 {} 没有对应的图像目录: {}", tag.name, dir.display());
        continue;
      }

      let mut files = Vec::new();
      for entry in std::fs::read_dir(&dir).map_err(io_error(&dir))? {
        let path = entry.map_err(io_error(&dir))?.path();
        if path.is_dir() {
          debug!("跳过子目录: {}", path.display());
          continue;
        }
        files.push(path);
      }
      files.sort();

      for file in files {
        let bytes = std::fs::read(&file).map_err(io_error(&file))?;
        service.upload_image(tag, bytes)?;
        info!("已上传 {} -> {}", file.display(), tag.name);
        uploaded += 1;
      }
    }

    Ok(uploaded)
  }

  /// 可选地先上传训练图像，再启动训练并等待完成
  pub fn run_training(&self, folder: Option<&Path>) -> Result<Report, TaskError> {
    let uploaded = match folder {
      Some(folder) => self.upload_training_images(folder)?,
      None => 0,
    };
    let mut report = self.run(Capability::Train, &TaskInput::default())?;
    report.uploaded = uploaded;
    Ok(report)
  }
}
