// 该文件是 Yunshi （云视） 项目的一部分。
// src/config.rs - 服务与运行配置
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
  path::{Path, PathBuf},
  str::FromStr,
  time::Duration,
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  job::PollPolicy,
  service::{Capability, ServiceError},
};

const VISION_ENDPOINT_KEYS: &[&str] = &["AI_SERVICE_ENDPOINT"];
const VISION_KEY_KEYS: &[&str] = &["AI_SERVICE_KEY"];
const TRAINING_ENDPOINT_KEYS: &[&str] = &["TRAINING_ENDPOINT", "TrainingEndpoint"];
const TRAINING_KEY_KEYS: &[&str] = &["TRAINING_KEY", "TrainingKey"];
const PREDICTION_ENDPOINT_KEYS: &[&str] = &["PREDICTION_ENDPOINT", "PredictionEndpoint"];
const PREDICTION_KEY_KEYS: &[&str] = &["PREDICTION_KEY", "PredictionKey"];
const PROJECT_KEYS: &[&str] = &["PROJECT_ID", "ProjectID"];
const MODEL_KEYS: &[&str] = &["MODEL_NAME", "PublishedModelName"];
const POLL_INTERVAL_KEY: &str = "POLL_INTERVAL_SECS";
const POLL_MAX_ATTEMPTS_KEY: &str = "POLL_MAX_ATTEMPTS";
const TRANSPORT_RETRIES_KEY: &str = "TRANSPORT_RETRIES";
const REQUEST_TIMEOUT_KEY: &str = "REQUEST_TIMEOUT_SECS";
const LABEL_FONT_KEY: &str = "LABEL_FONT";
const MIN_CONFIDENCE_KEY: &str = "MIN_CONFIDENCE";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("缺少配置项: {0}")]
  Missing(&'static str),
  #[error("服务地址无效 '{value}': {source}")]
  InvalidEndpoint {
    value: String,
    #[source]
    source: url::ParseError,
  },
  #[error("配置项 {key} 的值无效: '{value}'")]
  InvalidValue { key: &'static str, value: String },
  #[error("无法读取环境文件: {0}")]
  EnvFile(#[from] dotenvy::Error),
}

/// 一组服务地址与密钥
#[derive(Clone, PartialEq)]
pub struct Credentials {
  pub endpoint: Url,
  pub key: String,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("endpoint", &self.endpoint.as_str())
      .field("key", &"***")
      .finish()
  }
}

/// 远程服务的连接信息
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  /// 图像分析、人脸、文字识别、去背景
  pub vision: Option<Credentials>,
  /// 自定义视觉训练
  pub training: Option<Credentials>,
  /// 自定义视觉预测
  pub prediction: Option<Credentials>,
  pub project_id: Option<String>,
  pub model_name: Option<String>,
  pub request_timeout: Duration,
}

impl ServiceConfig {
  /// 能力使用的凭据；训练与预测未单独配置时退回视觉服务凭据
  pub fn credentials(&self, capability: Capability) -> Result<&Credentials, ServiceError> {
    let (dedicated, missing) = match capability {
      Capability::Train => (self.training.as_ref(), TRAINING_KEY_KEYS[0]),
      Capability::Classify => (self.prediction.as_ref(), PREDICTION_KEY_KEYS[0]),
      _ => (None, VISION_KEY_KEYS[0]),
    };
    dedicated
      .or(self.vision.as_ref())
      .ok_or(ServiceError::MissingSetting(missing))
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub service: ServiceConfig,
  pub poll: PollPolicy,
  pub label_font: Option<PathBuf>,
  pub min_confidence: f32,
}

impl AppConfig {
  /// 先加载 `.env` 文件，再读取进程环境变量
  pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
    match env_file {
      Some(path) => {
        dotenvy::from_path(path)?;
        debug!("已加载环境文件: {}", path.display());
      }
      None => {
        if let Err(err) = dotenvy::dotenv() {
          if err.not_found() {
            debug!("未找到 .env 文件, 仅使用进程环境变量");
          } else {
            return Err(err.into());
          }
        }
      }
    }
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let first = |keys: &[&str]| {
      keys
        .iter()
        .filter_map(|k| lookup(*k))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
    };

    let credentials = |endpoint_keys: &[&'static str],
                       key_keys: &[&'static str]|
     -> Result<Option<Credentials>, ConfigError> {
      match (first(endpoint_keys), first(key_keys)) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Missing(key_keys[0])),
        (None, Some(_)) => Err(ConfigError::Missing(endpoint_keys[0])),
        (Some(endpoint), Some(key)) => Ok(Some(Credentials {
          endpoint: parse_endpoint(&endpoint)?,
          key,
        })),
      }
    };
    let vision = credentials(VISION_ENDPOINT_KEYS, VISION_KEY_KEYS)?;
    let training = credentials(TRAINING_ENDPOINT_KEYS, TRAINING_KEY_KEYS)?;
    let prediction = credentials(PREDICTION_ENDPOINT_KEYS, PREDICTION_KEY_KEYS)?;
    if vision.is_none() && training.is_none() && prediction.is_none() {
      return Err(ConfigError::Missing(VISION_ENDPOINT_KEYS[0]));
    }

    let mut poll = PollPolicy::default();
    if let Some(secs) = parse_value::<u64>(&lookup, POLL_INTERVAL_KEY)? {
      // 间隔为 0 会变成忙等
      if secs == 0 {
        return Err(ConfigError::InvalidValue {
          key: POLL_INTERVAL_KEY,
          value: secs.to_string(),
        });
      }
      poll.interval = Duration::from_secs(secs);
    }
    if let Some(attempts) = parse_value::<u32>(&lookup, POLL_MAX_ATTEMPTS_KEY)? {
      if attempts == 0 {
        return Err(ConfigError::InvalidValue {
          key: POLL_MAX_ATTEMPTS_KEY,
          value: attempts.to_string(),
        });
      }
      poll.max_attempts = attempts;
    }
    if let Some(retries) = parse_value::<u32>(&lookup, TRANSPORT_RETRIES_KEY)? {
      poll.transport_retries = retries;
    }

    let request_timeout = parse_value::<u64>(&lookup, REQUEST_TIMEOUT_KEY)?
      .map(Duration::from_secs)
      .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

    let min_confidence =
      parse_value::<f32>(&lookup, MIN_CONFIDENCE_KEY)?.unwrap_or(DEFAULT_MIN_CONFIDENCE);
    if !(0.0..=1.0).contains(&min_confidence) {
      return Err(ConfigError::InvalidValue {
        key: MIN_CONFIDENCE_KEY,
        value: min_confidence.to_string(),
      });
    }

    let label_font = lookup(LABEL_FONT_KEY)
      .filter(|v| !v.trim().is_empty())
      .map(PathBuf::from);

    Ok(Self {
      service: ServiceConfig {
        vision,
        training,
        prediction,
        project_id: first(PROJECT_KEYS),
        model_name: first(MODEL_KEYS),
        request_timeout,
      },
      poll,
      label_font,
      min_confidence,
    })
  }
}

/// 服务地址统一以 `/` 结尾，便于拼接路径
fn parse_endpoint(value: &str) -> Result<Url, ConfigError> {
  let normalized = if value.ends_with('/') {
    value.to_string()
  } else {
    format!("{}/", value)
  };
  Url::parse(&normalized).map_err(|source| ConfigError::InvalidEndpoint {
    value: value.to_string(),
    source,
  })
}

fn parse_value<T: FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  key: &'static str,
) -> Result<Option<T>, ConfigError> {
  match lookup(key) {
    None => Ok(None),
    Some(raw) if raw.trim().is_empty() => Ok(None),
    Some(raw) => raw
      .trim()
      .parse()
      .map(Some)
      .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
  }
}
