//! Lock protocol coordinated by one node.
//!
//! Locks live on the node that receives the `Lock` requests for them. The
//! manager drives each [`DistributedLock`] through these transitions:
//!
//! | From | Event | To |
//! |---|---|---|
//! | Unlocked | lock | Locked |
//! | Locked | lock by the holder | Locked |
//! | Locked | lock by another node | Waiting |
//! | Waiting | unlock, queue drained by the handover | Locked |
//! | Waiting | unlock, more waiters queued | Waiting |
//! | Locked | unlock, nobody waiting | Unlocked |
//! | Locked, Waiting | condition await by the holder | as after unlock |
//! | Waiting | unlock by a waiting node | Locked or Waiting |
//!
//! Locks are owned per node and carry no hold count: a node that locks
//! twice is released by its first unlock. An unlock from a node that does
//! not hold the lock but still waits for it withdraws that node's queued
//! and condition waits, which is how a client that gave up on a wait
//! cancels it.
//!
//! `Locking` marks a lock whose grant went to a condition waiter that was
//! signalled while the lock was free; it becomes `Locked` on the same call.
//!
//! Condition waits reuse `Lock`: a request whose path is
//! `[lock, condition]`, sent by the holder of `lock`, releases it and parks
//! the holder on `condition` until a `Signal` or `SignalAll` moves it back
//! into the lock's queue.

use cloudmesh_common::protocol::{MessageId, NodeId, RemoteFailure};
use cloudmesh_space::{DistributedLock, LockStatus};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("{node} does not hold lock {lock}")]
    NotHolder { lock: String, node: NodeId },

    #[error("Invalid lock path: {0:?}")]
    InvalidPath(Vec<String>),
}

impl From<LockError> for RemoteFailure {
    fn from(error: LockError) -> Self {
        let kind = match error {
            LockError::NotHolder { .. } => "IllegalMonitorState",
            LockError::InvalidPath(_) => "InvalidLockPath",
        };
        RemoteFailure::new(kind, error.to_string())
    }
}

/// Request `request` from `node` is granted; reply `Ack` to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub node: NodeId,
    pub request: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    Queued,
}

/// What a `Lock` path asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    Lock(String),
    Condition { lock: String, condition: String },
}

impl LockTarget {
    pub fn parse(path: &[String]) -> Result<Self, LockError> {
        match path {
            [lock] => Ok(LockTarget::Lock(lock.clone())),
            [lock, condition] => Ok(LockTarget::Condition {
                lock: lock.clone(),
                condition: condition.clone(),
            }),
            _ => Err(LockError::InvalidPath(path.to_vec())),
        }
    }
}

#[derive(Debug, Clone)]
struct Waiter {
    node: NodeId,
    request: MessageId,
}

#[derive(Debug)]
struct LockEntry {
    lock: DistributedLock,
    holder: Option<NodeId>,
    queue: VecDeque<Waiter>,
    conditions: HashMap<String, VecDeque<Waiter>>,
}

impl LockEntry {
    fn new(name: &str) -> Self {
        Self {
            lock: DistributedLock::new(name),
            holder: None,
            queue: VecDeque::new(),
            conditions: HashMap::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.holder.is_none()
            && self.queue.is_empty()
            && self.conditions.values().all(VecDeque::is_empty)
    }

    /// Pass the lock to the next queued waiter, if any.
    fn hand_over(&mut self) -> Option<Grant> {
        match self.queue.pop_front() {
            Some(next) => {
                self.holder = Some(next.node.clone());
                self.settle();
                Some(Grant {
                    node: next.node,
                    request: next.request,
                })
            }
            None => {
                self.holder = None;
                self.lock.set_status(LockStatus::Unlocked);
                None
            }
        }
    }

    fn settle(&mut self) {
        let status = if self.queue.is_empty() {
            LockStatus::Locked
        } else {
            LockStatus::Waiting
        };
        if self.lock.status() != status {
            self.lock.set_status(status);
        }
    }
}

/// The locks this node coordinates. Not synchronized; the node keeps it
/// behind a mutex.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: HashMap<String, LockEntry>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `node` asks for `lock` with request id `request`.
    pub fn lock(&mut self, lock: &str, node: &str, request: MessageId) -> LockOutcome {
        let entry = self
            .locks
            .entry(lock.to_string())
            .or_insert_with(|| LockEntry::new(lock));

        match &entry.holder {
            None => {
                entry.holder = Some(node.to_string());
                entry.settle();
                LockOutcome::Granted
            }
            // Reentrant requests are granted without queueing.
            Some(holder) if holder == node => LockOutcome::Granted,
            Some(_) => {
                entry.queue.push_back(Waiter {
                    node: node.to_string(),
                    request,
                });
                entry.settle();
                LockOutcome::Queued
            }
        }
    }

    /// `node` releases `lock`. Returns the grant for the next waiter.
    ///
    /// A node that only waits for `lock` has its waits withdrawn instead.
    pub fn unlock(&mut self, lock: &str, node: &str) -> Result<Option<Grant>, LockError> {
        if self.holder(lock) != Some(node) && self.withdraw(lock, node) {
            return Ok(None);
        }
        let entry = self.held_by(lock, node)?;
        let grant = entry.hand_over();
        self.prune(lock);
        Ok(grant)
    }

    /// The holder of `lock` waits on `condition`, releasing the lock.
    pub fn await_condition(
        &mut self,
        lock: &str,
        condition: &str,
        node: &str,
        request: MessageId,
    ) -> Result<Option<Grant>, LockError> {
        let entry = self.held_by(lock, node)?;
        entry
            .conditions
            .entry(condition.to_string())
            .or_default()
            .push_back(Waiter {
                node: node.to_string(),
                request,
            });
        Ok(entry.hand_over())
    }

    /// Move the first waiter of `condition` back into the lock queue.
    pub fn signal(&mut self, lock: &str, condition: &str) -> Option<Grant> {
        self.wake(lock, condition, 1)
    }

    /// Move every waiter of `condition` back into the lock queue.
    pub fn signal_all(&mut self, lock: &str, condition: &str) -> Option<Grant> {
        self.wake(lock, condition, usize::MAX)
    }

    /// Drop a waiting request whose timeout elapsed. Returns true if it was
    /// still waiting.
    pub fn expire(&mut self, lock: &str, request: MessageId) -> bool {
        let Some(entry) = self.locks.get_mut(lock) else {
            return false;
        };

        let mut removed = remove_request(&mut entry.queue, request);
        for waiters in entry.conditions.values_mut() {
            removed |= remove_request(waiters, request);
        }
        if removed && entry.holder.is_some() {
            entry.settle();
        }
        self.prune(lock);
        removed
    }

    /// Drop every request `node` has waiting on `lock`. Returns true if
    /// there was one.
    fn withdraw(&mut self, lock: &str, node: &str) -> bool {
        let Some(entry) = self.locks.get_mut(lock) else {
            return false;
        };

        let mut removed = remove_node(&mut entry.queue, node);
        for waiters in entry.conditions.values_mut() {
            removed |= remove_node(waiters, node);
        }
        if removed && entry.holder.is_some() {
            entry.settle();
        }
        self.prune(lock);
        removed
    }

    /// Release everything `node` holds or waits for. Returns the grants
    /// handed to the next waiters.
    pub fn forget_node(&mut self, node: &str) -> Vec<Grant> {
        let mut grants = Vec::new();
        for entry in self.locks.values_mut() {
            entry.queue.retain(|w| w.node != node);
            for waiters in entry.conditions.values_mut() {
                waiters.retain(|w| w.node != node);
            }
            if entry.holder.as_deref() == Some(node) {
                grants.extend(entry.hand_over());
            } else if entry.holder.is_some() {
                entry.settle();
            }
        }
        self.locks.retain(|_, entry| !entry.is_idle());
        grants
    }

    pub fn status(&self, lock: &str) -> LockStatus {
        self.locks
            .get(lock)
            .map(|e| e.lock.status())
            .unwrap_or(LockStatus::Unlocked)
    }

    pub fn holder(&self, lock: &str) -> Option<&str> {
        self.locks.get(lock).and_then(|e| e.holder.as_deref())
    }

    pub fn queue_len(&self, lock: &str) -> usize {
        self.locks.get(lock).map(|e| e.queue.len()).unwrap_or(0)
    }

    pub fn condition_len(&self, lock: &str, condition: &str) -> usize {
        self.locks
            .get(lock)
            .and_then(|e| e.conditions.get(condition))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    fn held_by(&mut self, lock: &str, node: &str) -> Result<&mut LockEntry, LockError> {
        match self.locks.get_mut(lock) {
            Some(entry) if entry.holder.as_deref() == Some(node) => Ok(entry),
            _ => Err(LockError::NotHolder {
                lock: lock.to_string(),
                node: node.to_string(),
            }),
        }
    }

    fn wake(&mut self, lock: &str, condition: &str, count: usize) -> Option<Grant> {
        let entry = self.locks.get_mut(lock)?;
        let waiters = entry.conditions.get_mut(condition)?;
        let woken = waiters.len().min(count);
        entry.queue.extend(waiters.drain(..woken));

        if entry.holder.is_none() {
            entry.lock.set_status(LockStatus::Locking);
            return entry.hand_over();
        }
        entry.settle();
        None
    }

    fn prune(&mut self, lock: &str) {
        if self.locks.get(lock).is_some_and(LockEntry::is_idle) {
            self.locks.remove(lock);
        }
    }
}

fn remove_request(waiters: &mut VecDeque<Waiter>, request: MessageId) -> bool {
    let before = waiters.len();
    waiters.retain(|w| w.request != request);
    waiters.len() != before
}

fn remove_node(waiters: &mut VecDeque<Waiter>, node: &str) -> bool {
    let before = waiters.len();
    waiters.retain(|w| w.node != node);
    waiters.len() != before
}
