// 该文件是 Yunshi （云视） 项目的一部分。
// src/main.rs - 云视命令行
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

/// Yunshi 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 调用的视觉能力
  #[arg(long, value_enum, value_name = "CAPABILITY")]
  pub capability: Capability,
  /// 输入图像路径（train 以外的能力必需）
  #[arg(long, value_name = "INPUT")]
  pub input: Option<PathBuf>,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,
  /// 环境配置文件，默认读取当前目录的 .env
  #[arg(long, value_name = "ENV_FILE")]
  pub env_file: Option<PathBuf>,
  /// 同时写出 .txt 检测记录
  #[arg(long)]
  pub record: bool,
  /// 训练前上传的图像目录（按标签名分子目录）
  #[arg(long, value_name = "FOLDER")]
  pub training_images: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("视觉能力: {}", args.capability);
  if let Some(input) = &args.input {
    info!("输入图像: {}", input.display());
  }

  let config = AppConfig::load(args.env_file.as_deref())?;
  info!("服务配置: {:?}", config.service);
  let task = VisionTask::from_config(&config)?;

  let report = match args.capability {
    Capability::Train => task.run_training(args.training_images.as_deref())?,
    capability => {
      let input = TaskInput {
        source: args.input,
        output: args.output,
        record: args.record,
      };
      task.run(capability, &input)?
    }
  };

  print!("{}", report);
  Ok(())
}
