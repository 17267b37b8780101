// 该文件是 Yunshi （云视） 项目的一部分。
// src/bin/train_classifier.rs - 上传训练图像并训练分类模型
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yunshi::{config::AppConfig, task::VisionTask};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练图像目录，子目录名与项目标签名一致
  #[arg(long, value_name = "FOLDER")]
  pub images: Option<PathBuf>,
  #[arg(long, value_name = "ENV_FILE")]
  pub env_file: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = AppConfig::load(args.env_file.as_deref())?;
  let task = VisionTask::from_config(&config)?;

  info!("开始训练...");
  let report = task.run_training(args.images.as_deref())?;
  print!("{}", report);
  Ok(())
}
