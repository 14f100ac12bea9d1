// 该文件是 Shanan （山南西风） 项目的一部分。
// src/scheduler.rs - 任务调度器
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

//! 固定数量的工作线程从同一个队列取任务执行。提交从不阻塞；
//! 状态变化通过 [`SchedulerEvent`] 广播给所有订阅者。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::task::{Task, TaskContext, TaskError, TaskHandle, TaskId, TaskKind, TaskOutput, TaskShared, TaskState};

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("调度器已关闭")]
  Closed,
  #[error("无法启动工作线程: {0}")]
  Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
  TaskScheduled {
    id: TaskId,
    kind: TaskKind,
  },
  TaskStarted {
    id: TaskId,
    kind: TaskKind,
  },
  TaskProgress {
    id: TaskId,
    progress: f64,
  },
  TaskMessage {
    id: TaskId,
    message: String,
  },
  TaskSucceeded {
    id: TaskId,
    kind: TaskKind,
    output: TaskOutput,
  },
  /// `connection_failed` 区分服务端错误与其它失败
  TaskFailed {
    id: TaskId,
    kind: TaskKind,
    error: String,
    connection_failed: bool,
  },
  /// `cause` 记录取消过程中捕获的错误，仅用于诊断
  TaskCancelled {
    id: TaskId,
    kind: TaskKind,
    cause: Option<String>,
  },
}

#[derive(Default)]
pub struct Broadcaster {
  subscribers: Mutex<Vec<Sender<SchedulerEvent>>>,
}

impl Broadcaster {
  pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
    let (tx, rx) = unbounded();
    self.subscribers.lock().push(tx);
    rx
  }

  /// 已断开的订阅者被移除
  pub fn send(&self, event: SchedulerEvent) {
    self
      .subscribers
      .lock()
      .retain(|tx| tx.send(event.clone()).is_ok());
  }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Registry {
  in_flight: Mutex<HashMap<TaskId, TaskHandle>>,
  idle: Condvar,
}

impl Registry {
  fn remove(&self, id: TaskId) {
    let mut in_flight = self.in_flight.lock();
    in_flight.remove(&id);
    if in_flight.is_empty() {
      self.idle.notify_all();
    }
  }
}

pub struct Scheduler {
  events: Arc<Broadcaster>,
  registry: Arc<Registry>,
  next_id: AtomicU64,
  jobs: Mutex<Option<Sender<Job>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
  /// `workers` 为 0 时按 1 处理
  pub fn new(workers: usize) -> Result<Self, SchedulerError> {
    let workers = workers.max(1);
    let (tx, rx) = unbounded::<Job>();
    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
      let rx = rx.clone();
      let handle = std::thread::Builder::new()
        .name(format!("sam-worker-{i}"))
        .spawn(move || {
          while let Ok(job) = rx.recv() {
            job();
          }
          debug!("工作线程 {} 退出", i);
        })?;
      handles.push(handle);
    }
    info!("调度器启动，{} 个工作线程", workers);
    Ok(Scheduler {
      events: Arc::new(Broadcaster::default()),
      registry: Arc::new(Registry::default()),
      next_id: AtomicU64::new(1),
      jobs: Mutex::new(Some(tx)),
      workers: Mutex::new(handles),
    })
  }

  pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
    self.events.subscribe()
  }

  pub fn submit<T: Task>(&self, task: T) -> Result<TaskHandle, SchedulerError> {
    self.submit_with(task, |_| {})
  }

  /// `on_success` 在任务成功且未被取消时、进入 `Succeeded` 之前于工作线程上调用
  pub fn submit_with<T, F>(&self, task: T, on_success: F) -> Result<TaskHandle, SchedulerError>
  where
    T: Task,
    F: FnOnce(&T::Output) + Send + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let kind = task.kind();
    let shared = TaskShared::new(id, kind);
    let handle = TaskHandle::new(shared.clone());

    let events = self.events.clone();
    let registry = self.registry.clone();
    let job: Job = Box::new(move || {
      execute(task, shared, events, on_success);
      registry.remove(id);
    });

    let jobs = self.jobs.lock();
    let Some(jobs) = jobs.as_ref() else {
      return Err(SchedulerError::Closed);
    };
    self.registry.in_flight.lock().insert(id, handle.clone());
    self.events.send(SchedulerEvent::TaskScheduled { id, kind });
    if jobs.send(job).is_err() {
      self.registry.remove(id);
      return Err(SchedulerError::Closed);
    }
    debug!("提交任务 {} ({:?})", id, kind);
    Ok(handle)
  }

  pub fn in_flight(&self) -> Vec<TaskHandle> {
    self.registry.in_flight.lock().values().cloned().collect()
  }

  pub fn cancel(&self, id: TaskId) -> bool {
    match self.registry.in_flight.lock().get(&id) {
      Some(handle) => {
        handle.cancel();
        true
      }
      None => false,
    }
  }

  pub fn cancel_all(&self) {
    let handles = self.in_flight();
    if !handles.is_empty() {
      info!("取消 {} 个进行中的任务", handles.len());
    }
    for handle in handles {
      handle.cancel();
    }
  }

  /// 阻塞直到没有进行中的任务
  pub fn wait_idle(&self) {
    let mut in_flight = self.registry.in_flight.lock();
    while !in_flight.is_empty() {
      self.registry.idle.wait(&mut in_flight);
    }
  }

  pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
    let mut in_flight = self.registry.in_flight.lock();
    if !in_flight.is_empty() {
      let _ = self
        .registry
        .idle
        .wait_while_for(&mut in_flight, |m| !m.is_empty(), timeout);
    }
    in_flight.is_empty()
  }

  /// 不再接受新任务；已排队的任务仍会执行
  pub fn shutdown(&self) {
    if self.jobs.lock().take().is_some() {
      info!("调度器关闭");
    }
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.shutdown();
    let current = std::thread::current().id();
    for handle in self.workers.lock().drain(..) {
      if handle.thread().id() == current {
        continue;
      }
      if handle.join().is_err() {
        warn!("工作线程异常退出");
      }
    }
  }
}

fn execute<T, F>(task: T, shared: Arc<TaskShared>, events: Arc<Broadcaster>, on_success: F)
where
  T: Task,
  F: FnOnce(&T::Output),
{
  let ctx = TaskContext::new(shared.clone(), Some(events.clone()));
  let (id, kind) = (ctx.id(), task.kind());

  if ctx.is_cancelled() {
    info!("任务 {} 在开始前已取消", id);
    shared.finish(TaskState::Cancelled, None);
    events.send(SchedulerEvent::TaskCancelled {
      id,
      kind,
      cause: None,
    });
    return;
  }

  shared.set_running();
  info!("任务 {} ({:?}) 开始", id, kind);
  events.send(SchedulerEvent::TaskStarted { id, kind });

  let result = catch_unwind(AssertUnwindSafe(|| task.run_task(&ctx)));
  let cancelled = |cause: Option<String>| {
    shared.finish(TaskState::Cancelled, cause.clone());
    events.send(SchedulerEvent::TaskCancelled { id, kind, cause });
  };
  match result {
    Ok(Ok(output)) if !ctx.is_cancelled() => {
      on_success(&output);
      shared.finish(TaskState::Succeeded, None);
      info!("任务 {} 完成", id);
      events.send(SchedulerEvent::TaskSucceeded {
        id,
        kind,
        output: output.into(),
      });
    }
    Ok(Ok(_)) => {
      info!("任务 {} 已取消，丢弃结果", id);
      cancelled(None);
    }
    Ok(Err(TaskError::Cancelled)) => {
      info!("任务 {} 已取消", id);
      cancelled(None);
    }
    Ok(Err(e)) if ctx.is_cancelled() => {
      warn!("任务 {} 取消过程中出错: {}", id, e);
      cancelled(Some(e.to_string()));
    }
    Ok(Err(e)) => {
      error!("任务 {} 失败: {}", id, e);
      let connection_failed = e.is_connection();
      shared.finish(TaskState::Failed, Some(e.to_string()));
      events.send(SchedulerEvent::TaskFailed {
        id,
        kind,
        error: e.to_string(),
        connection_failed,
      });
    }
    Err(_) => {
      error!("任务 {} 崩溃", id);
      shared.finish(TaskState::Failed, Some("任务崩溃".into()));
      events.send(SchedulerEvent::TaskFailed {
        id,
        kind,
        error: "任务崩溃".into(),
        connection_failed: false,
      });
    }
  }
}
