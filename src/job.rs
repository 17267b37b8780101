// 该文件是 Yunshi （云视） 项目的一部分。
// src/job.rs - 远程任务提交与轮询
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

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::service::{
  Capability, Payload, Request, ServiceError, StatusReport, Submission, VisionService,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_TRANSPORT_RETRIES: u32 = 3;

/// 同步结果没有服务端任务编号
const SYNC_JOB_ID: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Failed)
  }

  /// 解析服务返回的状态字符串（大小写不敏感）
  pub fn parse(status: &str) -> Option<Self> {
    match status.to_ascii_lowercase().as_str() {
      "notstarted" | "queued" | "pending" => Some(JobStatus::Pending),
      "running" | "training" | "inprogress" => Some(JobStatus::Running),
      "succeeded" | "completed" => Some(JobStatus::Completed),
      "failed" | "canceled" | "cancelled" => Some(JobStatus::Failed),
      _ => None,
    }
  }
}

/// 已提交的远程任务
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
  pub id: String,
  pub capability: Capability,
  pub status: JobStatus,
  pub payload: Payload,
  pub reason: Option<String>,
}

impl Job {
  fn from_submission(capability: Capability, submission: Submission) -> Self {
    match submission {
      Submission::Accepted {
        job_id,
        status,
        payload,
      } => Job {
        id: job_id,
        capability,
        status,
        payload,
        reason: None,
      },
      Submission::Completed(payload) => Job {
        id: SYNC_JOB_ID.to_string(),
        capability,
        status: JobStatus::Completed,
        payload,
        reason: None,
      },
    }
  }
}

#[derive(Error, Debug)]
pub enum JobError {
  #[error("提交 {capability} 请求失败: {source}")]
  Submission {
    capability: Capability,
    #[source]
    source: ServiceError,
  },
  #[error("任务 {job_id} 在 {attempts} 次轮询后仍未结束{}", .last_error.as_ref().map(|e| format!(" (最后错误: {e})")).unwrap_or_default())]
  PollTimeout {
    job_id: String,
    attempts: u32,
    last_error: Option<ServiceError>,
  },
  #[error("远程任务 {job_id} 失败: {reason}")]
  RemoteJobFailed { job_id: String, reason: String },
  #[error("查询任务 {job_id} 状态被拒绝: {source}")]
  StatusRejected {
    job_id: String,
    #[source]
    source: ServiceError,
  },
}

/// 轮询之间的挂起点
pub trait Sleeper {
  fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
  fn sleep(&self, duration: Duration) {
    std::thread::sleep(duration);
  }
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
  fn sleep(&self, duration: Duration) {
    (**self).sleep(duration)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
  pub interval: Duration,
  pub max_attempts: u32,
  /// 单次查询遇到瞬时错误时的重试次数
  pub transport_retries: u32,
}

impl Default for PollPolicy {
  fn default() -> Self {
    Self {
      interval: DEFAULT_POLL_INTERVAL,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      transport_retries: DEFAULT_TRANSPORT_RETRIES,
    }
  }
}

pub struct Poller<S, Z = ThreadSleeper> {
  service: S,
  policy: PollPolicy,
  sleeper: Z,
}

impl<S: VisionService> Poller<S> {
  pub fn new(service: S, policy: PollPolicy) -> Self {
    Self {
      service,
      policy,
      sleeper: ThreadSleeper,
    }
  }
}

impl<S: VisionService, Z: Sleeper> Poller<S, Z> {
  pub fn with_sleeper(service: S, policy: PollPolicy, sleeper: Z) -> Self {
    Self {
      service,
      policy,
      sleeper,
    }
  }

  pub fn service(&self) -> &S {
    &self.service
  }

  pub fn policy(&self) -> &PollPolicy {
    &self.policy
  }

  pub fn submit(&self, request: &Request) -> Result<Job, JobError> {
    let capability = request.capability;
    let submission = self
      .service
      .submit(request)
      .map_err(|source| JobError::Submission { capability, source })?;
    let job = Job::from_submission(capability, submission);
    info!("已提交 {} 请求, 任务: {} ({:?})", capability, job.id, job.status);
    Ok(job)
  }

  /// 阻塞轮询直到任务进入终止状态
  pub fn poll_until_terminal(&self, mut job: Job) -> Result<Job, JobError> {
    if job.status.is_terminal() {
      return Self::settle(job);
    }

    let max_attempts = self.policy.max_attempts;
    for attempt in 1..=max_attempts {
      let report = self.fetch_status(&job, attempt)?;
      job.status = report.status;
      if let Some(payload) = report.payload {
        job.payload = payload;
      }
      job.reason = report.reason;
      info!("任务 {} 状态: {:?} ({}/{})", job.id, job.status, attempt, max_attempts);

      if job.status.is_terminal() {
        return Self::settle(job);
      }
      if attempt < max_attempts {
        self.sleeper.sleep(self.policy.interval);
      }
    }

    warn!("任务 {} 轮询超时", job.id);
    Err(JobError::PollTimeout {
      job_id: job.id,
      attempts: max_attempts,
      last_error: None,
    })
  }

  fn fetch_status(&self, job: &Job, attempt: u32) -> Result<StatusReport, JobError> {
    let mut failures = 0;
    loop {
      match self.service.get_status(job) {
        Ok(report) => return Ok(report),
        Err(err) if err.is_transient() => {
          failures += 1;
          if failures > self.policy.transport_retries {
            warn!("任务 {} 查询连续失败 {} 次, 放弃", job.id, failures);
            return Err(JobError::PollTimeout {
              job_id: job.id.clone(),
              attempts: attempt,
              last_error: Some(err),
            });
          }
          debug!(
            "任务 {} 查询失败 ({}/{}): {}",
            job.id, failures, self.policy.transport_retries, err
          );
          self.sleeper.sleep(self.policy.interval);
        }
        Err(source) => {
          return Err(JobError::StatusRejected {
            job_id: job.id.clone(),
            source,
          });
        }
      }
    }
  }

  fn settle(job: Job) -> Result<Job, JobError> {
    match job.status {
      JobStatus::Failed => Err(JobError::RemoteJobFailed {
        reason: job
          .reason
          .unwrap_or_else(|| "服务未提供失败原因".to_string()),
        job_id: job.id,
      }),
      _ => Ok(job),
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::collections::VecDeque;

  #[derive(Default)]
  pub struct RecordingSleeper {
    pub sleeps: RefCell<Vec<Duration>>,
  }

  impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
      self.sleeps.borrow_mut().push(duration);
    }
  }

  /// 按脚本返回状态的服务
  pub struct ScriptedService {
    pub submission: RefCell<Option<Result<Submission, ServiceError>>>,
    pub statuses: RefCell<VecDeque<Result<StatusReport, ServiceError>>>,
    pub fetches: RefCell<u32>,
  }

  impl ScriptedService {
    pub fn new(
      submission: Result<Submission, ServiceError>,
      statuses: Vec<Result<StatusReport, ServiceError>>,
    ) -> Self {
      Self {
        submission: RefCell::new(Some(submission)),
        statuses: RefCell::new(statuses.into()),
        fetches: RefCell::new(0),
      }
    }
  }

  impl VisionService for ScriptedService {
    fn submit(&self, _request: &Request) -> Result<Submission, ServiceError> {
      self
        .submission
        .borrow_mut()
        .take()
        .expect("只允许提交一次")
    }

    fn get_status(&self, _job: &Job) -> Result<StatusReport, ServiceError> {
      *self.fetches.borrow_mut() += 1;
      self
        .statuses
        .borrow_mut()
        .pop_front()
        .unwrap_or_else(|| Ok(status(JobStatus::Running)))
    }
  }

  pub fn status(status: JobStatus) -> StatusReport {
    StatusReport {
      status,
      payload: None,
      reason: None,
    }
  }

  fn policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
      interval: Duration::from_secs(5),
      max_attempts,
      transport_retries: 2,
    }
  }

  fn accepted() -> Result<Submission, ServiceError> {
    Ok(Submission::Accepted {
      job_id: "op-1".into(),
      status: JobStatus::Pending,
      payload: Payload::Empty,
    })
  }

  fn request() -> Request {
    Request {
      capability: Capability::Read,
      image: Some(vec![1, 2, 3]),
    }
  }

  #[test]
  fn completes_on_third_fetch_with_interval_between() {
    let service = ScriptedService::new(
      accepted(),
      vec![
        Ok(status(JobStatus::Pending)),
        Ok(status(JobStatus::Running)),
        Ok(StatusReport {
          status: JobStatus::Completed,
          payload: Some(Payload::Json(serde_json::json!({"ok": true}))),
          reason: None,
        }),
      ],
    );
    let sleeper = RecordingSleeper::default();
    let poller = Poller::with_sleeper(&service, policy(10), &sleeper);

    let job = poller.submit(&request()).unwrap();
    let job = poller.poll_until_terminal(job).unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.payload, Payload::Json(serde_json::json!({"ok": true})));
    assert_eq!(*service.fetches.borrow(), 3);
    assert_eq!(*sleeper.sleeps.borrow(), vec![Duration::from_secs(5); 2]);
  }

  #[test]
  fn never_terminal_times_out() {
    let service = ScriptedService::new(accepted(), vec![]);
    let sleeper = RecordingSleeper::default();
    let poller = Poller::with_sleeper(&service, policy(4), &sleeper);

    let job = poller.submit(&request()).unwrap();
    let err = poller.poll_until_terminal(job).unwrap_err();

    assert!(matches!(err, JobError::PollTimeout { attempts: 4, .. }));
    assert_eq!(*service.fetches.borrow(), 4);
    assert_eq!(sleeper.sleeps.borrow().len(), 3);
  }

  #[test]
  fn transport_errors_are_retried_then_escalated() {
    let transport =
      || -> Result<StatusReport, ServiceError> { Err(ServiceError::Transport("connection reset".into())) };
    let service = ScriptedService::new(accepted(), vec![transport(), transport(), transport()]);
    let sleeper = RecordingSleeper::default();
    let poller = Poller::with_sleeper(&service, policy(10), &sleeper);

    let job = poller.submit(&request()).unwrap();
    let err = poller.poll_until_terminal(job).unwrap_err();

    match err {
      JobError::PollTimeout {
        attempts,
        last_error,
        ..
      } => {
        assert_eq!(attempts, 1);
        assert!(matches!(last_error, Some(ServiceError::Transport(_))));
      }
      other => panic!("期望轮询超时, 实际 {other:?}"),
    }
    // 首次查询 + 2 次重试
    assert_eq!(*service.fetches.borrow(), 3);
  }

  #[test]
  fn transient_failure_recovers() {
    let service = ScriptedService::new(
      accepted(),
      vec![
        Err(ServiceError::Transport("timeout".into())),
        Ok(status(JobStatus::Completed)),
      ],
    );
    let sleeper = RecordingSleeper::default();
    let poller = Poller::with_sleeper(&service, policy(10), &sleeper);

    let job = poller.poll_until_terminal(poller.submit(&request()).unwrap());
    assert_eq!(job.unwrap().status, JobStatus::Completed);
    assert_eq!(*service.fetches.borrow(), 2);
  }

  #[test]
  fn failed_status_is_not_retried() {
    let service = ScriptedService::new(
      accepted(),
      vec![Ok(StatusReport {
        status: JobStatus::Failed,
        payload: None,
        reason: Some("InvalidImage".into()),
      })],
    );
    let sleeper = RecordingSleeper::default();
    let poller = Poller::with_sleeper(&service, policy(10), &sleeper);

    let err = poller
      .poll_until_terminal(poller.submit(&request()).unwrap())
      .unwrap_err();

    match err {
      JobError::RemoteJobFailed { reason, job_id } => {
        assert_eq!(reason, "InvalidImage");
        assert_eq!(job_id, "op-1");
      }
      other => panic!("期望远程失败, 实际 {other:?}"),
    }
    assert_eq!(*service.fetches.borrow(), 1);
    assert!(sleeper.sleeps.borrow().is_empty());
  }

  #[test]
  fn rejected_status_query_surfaces_immediately() {
    let service = ScriptedService::new(
      accepted(),
      vec![Err(ServiceError::Unauthorized {
        status: 401,
        message: "key revoked".into(),
      })],
    );
    let poller = Poller::with_sleeper(&service, policy(10), RecordingSleeper::default());

    let err = poller
      .poll_until_terminal(poller.submit(&request()).unwrap())
      .unwrap_err();
    assert!(matches!(err, JobError::StatusRejected { .. }));
    assert_eq!(*service.fetches.borrow(), 1);
  }

  #[test]
  fn submission_failure_is_typed() {
    let service = ScriptedService::new(
      Err(ServiceError::Unauthorized {
        status: 401,
        message: "bad key".into(),
      }),
      vec![],
    );
    let poller = Poller::with_sleeper(&service, policy(10), RecordingSleeper::default());

    let err = poller.submit(&request()).unwrap_err();
    assert!(matches!(
      err,
      JobError::Submission {
        capability: Capability::Read,
        ..
      }
    ));
  }

  #[test]
  fn synchronous_result_is_already_terminal() {
    let service = ScriptedService::new(Ok(Submission::Completed(Payload::Bytes(vec![9]))), vec![]);
    let poller = Poller::with_sleeper(&service, policy(10), RecordingSleeper::default());

    let job = poller.submit(&request()).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let job = poller.poll_until_terminal(job).unwrap();
    assert_eq!(job.payload, Payload::Bytes(vec![9]));
    assert_eq!(*service.fetches.borrow(), 0);
  }

  #[test]
  fn accepted_terminal_job_keeps_submit_body() {
    let iteration = serde_json::json!({"id": "it-1", "status": "Completed"});
    let service = ScriptedService::new(
      Ok(Submission::Accepted {
        job_id: "https://cv.example.com/iterations/it-1".into(),
        status: JobStatus::Completed,
        payload: Payload::Json(iteration.clone()),
      }),
      vec![],
    );
    let poller = Poller::with_sleeper(&service, policy(10), RecordingSleeper::default());

    let job = poller.submit(&request()).unwrap();
    let job = poller.poll_until_terminal(job).unwrap();
    assert_eq!(job.payload, Payload::Json(iteration));
    assert_eq!(*service.fetches.borrow(), 0);
  }

  #[test]
  fn status_strings_are_mapped() {
    assert_eq!(JobStatus::parse("notStarted"), Some(JobStatus::Pending));
    assert_eq!(JobStatus::parse("Training"), Some(JobStatus::Running));
    assert_eq!(JobStatus::parse("succeeded"), Some(JobStatus::Completed));
    assert_eq!(JobStatus::parse("Completed"), Some(JobStatus::Completed));
    assert_eq!(JobStatus::parse("failed"), Some(JobStatus::Failed));
    assert_eq!(JobStatus::parse("weird"), None);
  }
}
