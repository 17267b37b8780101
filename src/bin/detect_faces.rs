// 该文件是 Yunshi （云视） 项目的一部分。
// src/bin/detect_faces.rs - 人脸检测
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

use yunshi::{
  config::AppConfig,
  service::Capability,
  task::{TaskInput, VisionTask},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "INPUT")]
  pub input: PathBuf,
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,
  #[arg(long, value_name = "ENV_FILE")]
  pub env_file: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入图像: {}", args.input.display());

  let config = AppConfig::load(args.env_file.as_deref())?;
  let task = VisionTask::from_config(&config)?;
  let report = task.run(
    Capability::Faces,
    &TaskInput::image(args.input).with_output(args.output),
  )?;

  print!("{}", report);
  Ok(())
}
