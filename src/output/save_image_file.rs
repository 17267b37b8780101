// 该文件是 Yunshi （云视） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::RgbImage;
use tracing::info;

use crate::output::RenderError;

fn ensure_parent(path: &Path) -> Result<(), RenderError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| RenderError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  Ok(())
}

/// 保存图像，格式由扩展名决定
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), RenderError> {
  ensure_parent(path)?;
  image.save(path).map_err(|e| RenderError::Io {
    path: path.to_path_buf(),
    source: match e {
      image::ImageError::IoError(source) => source,
      other => std::io::Error::other(other),
    },
  })?;
  info!("保存图像到文件: {}", path.display());
  Ok(())
}

/// 原样保存服务返回的图像字节
pub fn save_bytes(bytes: &[u8], path: &Path) -> Result<(), RenderError> {
  ensure_parent(path)?;
  std::fs::write(path, bytes).map_err(|source| RenderError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  info!("保存图像到文件: {}", path.display());
  Ok(())
}
