// 该文件是 Yunshi （云视） 项目的一部分。
// src/input.rs - 图像文件输入
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法读取图像文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码图像文件 {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 源图像：原始字节用于上传，解码后的像素用于绘制
pub struct ImageFileInput {
  path: PathBuf,
  bytes: Vec<u8>,
  image: RgbImage,
  format: Option<ImageFormat>,
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref().to_path_buf();
    let bytes = std::fs::read(&path).map_err(|source| InputError::Io {
      path: path.clone(),
      source,
    })?;
    let format = image::guess_format(&bytes).ok();
    let image = image::load_from_memory(&bytes)
      .map_err(|source| InputError::Decode {
        path: path.clone(),
        source,
      })?
      .to_rgb8();

    debug!(
      "已读取图像 {}: {}x{} {:?}",
      path.display(),
      image.width(),
      image.height(),
      format
    );

    Ok(Self {
      path,
      bytes,
      image,
      format,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn format(&self) -> Option<ImageFormat> {
    self.format
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}
