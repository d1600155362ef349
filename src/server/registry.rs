// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::rt::SharedDispatcher;

/// Opaque analysis identifier supplied by the orchestrator.
pub type TaskId = u64;

/// Identifies one attached session; used to detach it again.
#[derive(Debug)]
pub struct SessionHandle {
    task_id: TaskId,
    serial: u64,
}

#[derive(Default)]
struct RegistryInner {
    by_ip: HashMap<IpAddr, TaskId>,
    rt_by_task: HashMap<TaskId, SharedDispatcher>,
    sessions_by_task: HashMap<TaskId, HashMap<u64, CancellationToken>>,
    next_serial: u64,
}

/// Authoritative mapping between VM addresses, tasks and live sessions.
///
/// All three maps live behind one mutex so tear-down removes them
/// atomically. The critical sections are short and never await; session
/// cancellation is issued only after the lock is released.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task/VM pair. A prior binding for the same address is
    /// silently replaced; ordering is the orchestrator's to get right.
    pub fn add_task(&self, task_id: TaskId, ipaddr: IpAddr, rt: SharedDispatcher) {
        let mut inner = self.lock();
        inner.by_ip.insert(ipaddr, task_id);
        inner.rt_by_task.insert(task_id, rt);
    }

    /// Removes all state for a task and aborts its remaining sessions. Any
    /// connection still open at this point is a bug on the VM side, since
    /// the analyzer should have closed everything before signalling
    /// completion.
    pub fn del_task(&self, task_id: TaskId, ipaddr: IpAddr) {
        let cancelled: Vec<CancellationToken> = {
            let mut inner = self.lock();
            if inner.by_ip.remove(&ipaddr).is_none() {
                warn!("result server did not have a task with id {task_id}");
            }
            inner.rt_by_task.remove(&task_id);
            inner
                .sessions_by_task
                .remove(&task_id)
                .map(|set| set.into_values().collect())
                .unwrap_or_default()
        };
        for token in cancelled {
            warn!("cancelling a running session of task #{task_id}");
            token.cancel();
        }
    }

    /// Looks up which task owns a peer address at accept time.
    pub fn bind(&self, ipaddr: IpAddr) -> Option<(TaskId, SharedDispatcher)> {
        let inner = self.lock();
        let task_id = *inner.by_ip.get(&ipaddr)?;
        let rt = inner.rt_by_task.get(&task_id)?.clone();
        Some((task_id, rt))
    }

    /// Registers a negotiated session, unless the task was torn down (or the
    /// address re-bound to another task) while negotiation was running.
    pub fn attach(
        &self,
        task_id: TaskId,
        ipaddr: IpAddr,
        cancel: CancellationToken,
    ) -> Option<SessionHandle> {
        let mut inner = self.lock();
        if inner.by_ip.get(&ipaddr) != Some(&task_id) {
            return None;
        }
        let serial = inner.next_serial;
        inner.next_serial += 1;
        inner
            .sessions_by_task
            .entry(task_id)
            .or_default()
            .insert(serial, cancel);
        Some(SessionHandle { task_id, serial })
    }

    /// Removes a session from its task's set. A no-op once the task is gone.
    pub fn detach(&self, handle: &SessionHandle) {
        let mut inner = self.lock();
        if let Some(set) = inner.sessions_by_task.get_mut(&handle.task_id) {
            set.remove(&handle.serial);
            if set.is_empty() {
                inner.sessions_by_task.remove(&handle.task_id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
