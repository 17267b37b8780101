// 该文件是 Yunshi （云视） 项目的一部分。
// src/service/http.rs - 基于 HTTP 的视觉服务客户端
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

use reqwest::{
  blocking::{Client, RequestBuilder, Response},
  header::CONTENT_TYPE,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
  config::{Credentials, ServiceConfig},
  job::{Job, JobStatus},
  service::{
    Capability, Payload, Request, ServiceError, StatusReport, Submission, Tag, TrainingService,
    VisionService,
  },
};

const ANALYZE_API_VERSION: &str = "2024-02-01";
const SEGMENT_API_VERSION: &str = "2023-02-01-preview";
const ANALYZE_FEATURES: &str = "caption,denseCaptions,tags,objects,people";
const PEOPLE_FEATURES: &str = "people";
const FACE_ATTRIBUTES: &str = "occlusion,blur,glasses";

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const TRAINING_KEY_HEADER: &str = "Training-Key";
const PREDICTION_KEY_HEADER: &str = "Prediction-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const OCTET_STREAM: &str = "application/octet-stream";

pub struct HttpVisionService {
  client: Client,
  config: ServiceConfig,
}

impl HttpVisionService {
  pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
    let client = Client::builder()
      .timeout(config.request_timeout)
      .build()
      .map_err(|e| ServiceError::Transport(e.to_string()))?;
    Ok(Self { client, config })
  }

  fn credentials(&self, capability: Capability) -> Result<&Credentials, ServiceError> {
    self.config.credentials(capability)
  }

  fn route(&self, capability: Capability, path: &str) -> Result<Url, ServiceError> {
    self
      .credentials(capability)?
      .endpoint
      .join(path)
      .map_err(|e| ServiceError::Malformed(format!("无法拼接服务路径 '{}': {}", path, e)))
  }

  fn project_id(&self) -> Result<String, ServiceError> {
    self
      .config
      .project_id
      .as_deref()
      .map(|id| urlencoding::encode(id).into_owned())
      .ok_or(ServiceError::MissingSetting("PROJECT_ID"))
  }

  fn training_route(&self, suffix: &str) -> Result<Url, ServiceError> {
    let project = self.project_id()?;
    self.route(
      Capability::Train,
      &format!(
        "customvision/v3.3/training/projects/{}/{}",
        project, suffix
      ),
    )
  }

  /// 每种能力对应的提交地址与认证头
  fn submit_target(&self, capability: Capability) -> Result<(Url, &'static str), ServiceError> {
    let target = match capability {
      Capability::Analyze | Capability::People => {
        let features = if capability == Capability::Analyze {
          ANALYZE_FEATURES
        } else {
          PEOPLE_FEATURES
        };
        let mut url = self.route(capability, "computervision/imageanalysis:analyze")?;
        url
          .query_pairs_mut()
          .append_pair("api-version", ANALYZE_API_VERSION)
          .append_pair("features", features);
        (url, SUBSCRIPTION_KEY_HEADER)
      }
      Capability::RemoveBackground => {
        let mut url = self.route(capability, "computervision/imageanalysis:segment")?;
        url
          .query_pairs_mut()
          .append_pair("api-version", SEGMENT_API_VERSION)
          .append_pair("mode", "backgroundRemoval");
        (url, SUBSCRIPTION_KEY_HEADER)
      }
      Capability::Faces => {
        let mut url = self.route(capability, "face/v1.0/detect")?;
        url
          .query_pairs_mut()
          .append_pair("returnFaceId", "false")
          .append_pair("returnFaceAttributes", FACE_ATTRIBUTES);
        (url, SUBSCRIPTION_KEY_HEADER)
      }
      Capability::Read => (
        self.route(capability, "vision/v3.2/read/analyze")?,
        SUBSCRIPTION_KEY_HEADER,
      ),
      Capability::Classify => {
        let model = self
          .config
          .model_name
          .as_deref()
          .ok_or(ServiceError::MissingSetting("MODEL_NAME"))?;
        let url = self.route(
          capability,
          &format!(
            "customvision/v3.0/Prediction/{}/classify/iterations/{}/image",
            self.project_id()?,
            urlencoding::encode(model)
          ),
        )?;
        (url, PREDICTION_KEY_HEADER)
      }
      Capability::Train => (self.training_route("train")?, TRAINING_KEY_HEADER),
    };
    Ok(target)
  }

  fn status_header(capability: Capability) -> &'static str {
    match capability {
      Capability::Train => TRAINING_KEY_HEADER,
      _ => SUBSCRIPTION_KEY_HEADER,
    }
  }
}

fn send(builder: RequestBuilder) -> Result<Response, ServiceError> {
  let response = builder
    .send()
    .map_err(|e| ServiceError::Transport(e.to_string()))?;
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let code = status.as_u16();
  let message = response.text().unwrap_or_default();
  if code == 401 || code == 403 {
    Err(ServiceError::Unauthorized {
      status: code,
      message,
    })
  } else {
    Err(ServiceError::Rejected {
      status: code,
      message,
    })
  }
}

fn json_body(response: Response) -> Result<Value, ServiceError> {
  response
    .json::<Value>()
    .map_err(|e| ServiceError::Malformed(e.to_string()))
}

/// 失败状态中服务给出的原因
fn failure_reason(body: &Value) -> Option<String> {
  body
    .pointer("/error/message")
    .or_else(|| body.pointer("/analyzeResult/errors/0/message"))
    .and_then(Value::as_str)
    .map(str::to_string)
}

#[derive(Deserialize)]
struct Iteration {
  id: String,
  status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageCreateSummary {
  is_batch_successful: bool,
  #[serde(default)]
  images: Vec<Value>,
}

impl VisionService for HttpVisionService {
  fn submit(&self, request: &Request) -> Result<Submission, ServiceError> {
    let capability = request.capability;
    let (url, header) = self.submit_target(capability)?;
    debug!("提交 {} 请求: {}", capability, url);

    let key = &self.credentials(capability)?.key;
    let mut builder = self.client.post(url).header(header, key);
    if capability.needs_image() {
      let image = request
        .image
        .clone()
        .ok_or(ServiceError::MissingSetting("image"))?;
      builder = builder.header(CONTENT_TYPE, OCTET_STREAM).body(image);
    }
    let response = send(builder)?;

    match capability {
      Capability::Read => {
        let location = response
          .headers()
          .get(OPERATION_LOCATION_HEADER)
          .and_then(|v| v.to_str().ok())
          .ok_or_else(|| ServiceError::Malformed("响应缺少 Operation-Location 头".to_string()))?;
        Ok(Submission::Accepted {
          job_id: location.to_string(),
          status: JobStatus::Pending,
          payload: Payload::Empty,
        })
      }
      Capability::Train => {
        let body = json_body(response)?;
        let iteration =
          Iteration::deserialize(&body).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        let job_id = self
          .training_route(&format!("iterations/{}", iteration.id))?
          .to_string();
        Ok(Submission::Accepted {
          job_id,
          status: JobStatus::parse(&iteration.status).unwrap_or(JobStatus::Pending),
          payload: Payload::Json(body),
        })
      }
      Capability::RemoveBackground => {
        let bytes = response
          .bytes()
          .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Submission::Completed(Payload::Bytes(bytes.to_vec())))
      }
      _ => Ok(Submission::Completed(Payload::Json(json_body(response)?))),
    }
  }

  fn get_status(&self, job: &Job) -> Result<StatusReport, ServiceError> {
    let url = Url::parse(&job.id)
      .map_err(|e| ServiceError::Malformed(format!("任务地址无效 '{}': {}", job.id, e)))?;
    let response = send(
      self
        .client
        .get(url)
        .header(
          Self::status_header(job.capability),
          &self.credentials(job.capability)?.key,
        ),
    )?;
    let body = json_body(response)?;

    let text = body
      .get("status")
      .and_then(Value::as_str)
      .ok_or_else(|| ServiceError::Malformed("状态响应缺少 status 字段".to_string()))?;
    let status = JobStatus::parse(text)
      .ok_or_else(|| ServiceError::Malformed(format!("未知任务状态: {}", text)))?;
    let reason = match status {
      JobStatus::Failed => Some(failure_reason(&body).unwrap_or_else(|| text.to_string())),
      _ => None,
    };

    Ok(StatusReport {
      status,
      payload: Some(Payload::Json(body)),
      reason,
    })
  }
}

impl TrainingService for HttpVisionService {
  fn list_tags(&self) -> Result<Vec<Tag>, ServiceError> {
    #[derive(Deserialize)]
    struct TagDto {
      id: String,
      name: String,
    }

    let url = self.training_route("tags")?;
    let key = &self.credentials(Capability::Train)?.key;
    let response = send(self.client.get(url).header(TRAINING_KEY_HEADER, key))?;
    let tags: Vec<TagDto> = serde_json::from_value(json_body(response)?)
      .map_err(|e| ServiceError::Malformed(e.to_string()))?;
    Ok(
      tags
        .into_iter()
        .map(|t| Tag {
          id: t.id,
          name: t.name,
        })
        .collect(),
    )
  }

  fn upload_image(&self, tag: &Tag, image: Vec<u8>) -> Result<(), ServiceError> {
    let mut url = self.training_route("images")?;
    url.query_pairs_mut().append_pair("tagIds", &tag.id);

    let key = &self.credentials(Capability::Train)?.key;
    let response = send(
      self
        .client
        .post(url)
        .header(TRAINING_KEY_HEADER, key)
        .header(CONTENT_TYPE, OCTET_STREAM)
        .body(image),
    )?;
    let summary: ImageCreateSummary = serde_json::from_value(json_body(response)?)
      .map_err(|e| ServiceError::Malformed(e.to_string()))?;
    if !summary.is_batch_successful {
      let message = summary
        .images
        .first()
        .and_then(|i| i.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("上传失败")
        .to_string();
      return Err(ServiceError::Rejected {
        status: 200,
        message,
      });
    }
    info!("已上传标签 '{}' 的图像", tag.name);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::runtime::Runtime;
  use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_bytes, header, method, path, query_param},
  };

  fn credentials(endpoint: &str, key: &str) -> Option<Credentials> {
    let endpoint = format!("{}/", endpoint.trim_end_matches('/'));
    Some(Credentials {
      endpoint: Url::parse(&endpoint).unwrap(),
      key: key.into(),
    })
  }

  fn config(endpoint: &str, project: Option<&str>, model: Option<&str>) -> ServiceConfig {
    ServiceConfig {
      vision: credentials(endpoint, "VK"),
      training: credentials(endpoint, "TK"),
      prediction: credentials(endpoint, "PK"),
      project_id: project.map(str::to_string),
      model_name: model.map(str::to_string),
      request_timeout: Duration::from_secs(5),
    }
  }

  fn service(project: Option<&str>, model: Option<&str>) -> HttpVisionService {
    HttpVisionService::new(config("https://vision.example.com", project, model)).unwrap()
  }

  /// 本地模拟服务；阻塞客户端在测试线程上调用
  struct Remote {
    server: MockServer,
    runtime: Runtime,
  }

  impl Remote {
    fn start() -> Self {
      let runtime = Runtime::new().unwrap();
      let server = runtime.block_on(MockServer::start());
      Self { server, runtime }
    }

    fn mount(&self, mock: Mock) {
      self.runtime.block_on(mock.mount(&self.server));
    }

    fn uri(&self) -> String {
      self.server.uri()
    }

    fn service(&self, project: Option<&str>, model: Option<&str>) -> HttpVisionService {
      HttpVisionService::new(config(&self.uri(), project, model)).unwrap()
    }
  }

  fn image_request(capability: Capability) -> Request {
    Request {
      capability,
      image: Some(vec![1, 2, 3]),
    }
  }

  #[test]
  fn analyze_target_carries_features() {
    let (url, header) = service(None, None)
      .submit_target(Capability::Analyze)
      .unwrap();
    assert_eq!(url.path(), "/computervision/imageanalysis:analyze");
    assert!(url.query().unwrap().contains("api-version=2024-02-01"));
    assert_eq!(header, SUBSCRIPTION_KEY_HEADER);
  }

  #[test]
  fn training_needs_project() {
    let err = service(None, None)
      .submit_target(Capability::Train)
      .unwrap_err();
    assert_eq!(err, ServiceError::MissingSetting("PROJECT_ID"));

    let (url, header) = service(Some("p 1"), None)
      .submit_target(Capability::Train)
      .unwrap();
    assert_eq!(url.path(), "/customvision/v3.3/training/projects/p%201/train");
    assert_eq!(header, TRAINING_KEY_HEADER);
  }

  #[test]
  fn classify_needs_model_name() {
    let err = service(Some("p"), None)
      .submit_target(Capability::Classify)
      .unwrap_err();
    assert_eq!(err, ServiceError::MissingSetting("MODEL_NAME"));

    let (url, header) = service(Some("p"), Some("Iteration1"))
      .submit_target(Capability::Classify)
      .unwrap();
    assert!(url.path().ends_with("/classify/iterations/Iteration1/image"));
    assert_eq!(header, PREDICTION_KEY_HEADER);
  }

  #[test]
  fn classify_uses_prediction_endpoint() {
    let mut config = config("https://vision.example.com", Some("p"), Some("m"));
    config.prediction = credentials("https://predict.example.com", "PK");
    let service = HttpVisionService::new(config).unwrap();

    let (url, _) = service.submit_target(Capability::Classify).unwrap();
    assert_eq!(url.host_str(), Some("predict.example.com"));
    let (url, _) = service.submit_target(Capability::Read).unwrap();
    assert_eq!(url.host_str(), Some("vision.example.com"));
  }

  #[test]
  fn failure_reason_prefers_error_message() {
    let body = serde_json::json!({"status": "failed", "error": {"message": "bad image"}});
    assert_eq!(failure_reason(&body).as_deref(), Some("bad image"));
    assert_eq!(failure_reason(&serde_json::json!({"status": "failed"})), None);
  }

  #[test]
  fn read_submit_returns_operation_location() {
    let remote = Remote::start();
    let location = format!("{}/vision/v3.2/read/analyzeResults/op-1", remote.uri());
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .and(header(SUBSCRIPTION_KEY_HEADER, "VK"))
        .and(header("content-type", OCTET_STREAM))
        .and(body_bytes(vec![1, 2, 3]))
        .respond_with(
          ResponseTemplate::new(202).insert_header(OPERATION_LOCATION_HEADER, location.as_str()),
        ),
    );

    let submission = remote
      .service(None, None)
      .submit(&image_request(Capability::Read))
      .unwrap();

    assert_eq!(
      submission,
      Submission::Accepted {
        job_id: location,
        status: JobStatus::Pending,
        payload: Payload::Empty,
      }
    );
  }

  #[test]
  fn read_submit_without_location_is_malformed() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .respond_with(ResponseTemplate::new(202)),
    );

    let err = remote
      .service(None, None)
      .submit(&image_request(Capability::Read))
      .unwrap_err();
    assert!(matches!(err, ServiceError::Malformed(_)));
  }

  #[test]
  fn failed_status_carries_service_reason() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("GET"))
        .and(path("/vision/v3.2/read/analyzeResults/op-1"))
        .and(header(SUBSCRIPTION_KEY_HEADER, "VK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
          "status": "failed",
          "error": {"message": "bad image"}
        }))),
    );
    let job = Job {
      id: format!("{}/vision/v3.2/read/analyzeResults/op-1", remote.uri()),
      capability: Capability::Read,
      status: JobStatus::Running,
      payload: Payload::Empty,
      reason: None,
    };

    let report = remote.service(None, None).get_status(&job).unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.reason.as_deref(), Some("bad image"));
  }

  #[test]
  fn unknown_status_is_malformed() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("GET"))
        .and(path("/ops/1"))
        .respond_with(
          ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "paused"})),
        ),
    );
    let job = Job {
      id: format!("{}/ops/1", remote.uri()),
      capability: Capability::Read,
      status: JobStatus::Running,
      payload: Payload::Empty,
      reason: None,
    };

    let err = remote.service(None, None).get_status(&job).unwrap_err();
    assert!(matches!(err, ServiceError::Malformed(_)));
  }

  #[test]
  fn http_errors_map_to_service_errors() {
    for (code, transient) in [(401, false), (403, false), (400, false), (429, true), (503, true)] {
      let remote = Remote::start();
      remote.mount(
        Mock::given(method("POST"))
          .and(path("/computervision/imageanalysis:analyze"))
          .respond_with(ResponseTemplate::new(code).set_body_string("nope")),
      );

      let err = remote
        .service(None, None)
        .submit(&image_request(Capability::Analyze))
        .unwrap_err();

      if code == 401 || code == 403 {
        assert_eq!(
          err,
          ServiceError::Unauthorized {
            status: code,
            message: "nope".into()
          }
        );
      } else {
        assert_eq!(
          err,
          ServiceError::Rejected {
            status: code,
            message: "nope".into()
          }
        );
      }
      assert_eq!(err.is_transient(), transient, "HTTP {}", code);
    }
  }

  #[test]
  fn remove_background_returns_bytes() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/computervision/imageanalysis:segment"))
        .and(query_param("mode", "backgroundRemoval"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNGDATA".to_vec())),
    );

    let submission = remote
      .service(None, None)
      .submit(&image_request(Capability::RemoveBackground))
      .unwrap();
    assert_eq!(submission, Submission::Completed(Payload::Bytes(b"PNGDATA".to_vec())));
  }

  #[test]
  fn classify_sends_prediction_key() {
    let remote = Remote::start();
    let body = serde_json::json!({"predictions": [{"tagName": "apple", "probability": 0.9}]});
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/customvision/v3.0/Prediction/p/classify/iterations/m/image"))
        .and(header(PREDICTION_KEY_HEADER, "PK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone())),
    );

    let submission = remote
      .service(Some("p"), Some("m"))
      .submit(&image_request(Capability::Classify))
      .unwrap();
    assert_eq!(submission, Submission::Completed(Payload::Json(body)));
  }

  #[test]
  fn train_submit_keeps_iteration_body() {
    let remote = Remote::start();
    let iteration = serde_json::json!({"id": "it-1", "name": "Iteration 1", "status": "Completed"});
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/customvision/v3.3/training/projects/p/train"))
        .and(header(TRAINING_KEY_HEADER, "TK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(iteration.clone())),
    );

    let submission = remote
      .service(Some("p"), None)
      .submit(&Request {
        capability: Capability::Train,
        image: None,
      })
      .unwrap();

    assert_eq!(
      submission,
      Submission::Accepted {
        job_id: format!("{}/customvision/v3.3/training/projects/p/iterations/it-1", remote.uri()),
        status: JobStatus::Completed,
        payload: Payload::Json(iteration),
      }
    );
  }

  #[test]
  fn tags_are_listed_with_training_key() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("GET"))
        .and(path("/customvision/v3.3/training/projects/p/tags"))
        .and(header(TRAINING_KEY_HEADER, "TK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
          {"id": "1", "name": "apple", "imageCount": 3},
          {"id": "2", "name": "banana", "imageCount": 0}
        ]))),
    );

    let tags = remote.service(Some("p"), None).list_tags().unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["apple", "banana"]);
    assert_eq!(tags[0].id, "1");
  }

  #[test]
  fn unsuccessful_upload_batch_is_rejected() {
    let remote = Remote::start();
    remote.mount(
      Mock::given(method("POST"))
        .and(path("/customvision/v3.3/training/projects/p/images"))
        .and(query_param("tagIds", "1"))
        .and(header(TRAINING_KEY_HEADER, "TK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
          "isBatchSuccessful": false,
          "images": [{"status": "ErrorImageTooLarge"}]
        }))),
    );
    let tag = Tag {
      id: "1".into(),
      name: "apple".into(),
    };

    let err = remote
      .service(Some("p"), None)
      .upload_image(&tag, vec![0; 8])
      .unwrap_err();
    assert_eq!(
      err,
      ServiceError::Rejected {
        status: 200,
        message: "ErrorImageTooLarge".into()
      }
    );
  }
}
