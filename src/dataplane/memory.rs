//! In-process control plane.
//!
//! Keeps committed servers in memory, stages changes per transaction and
//! records every call so tests can assert on the exact sequence. Failures can
//! be injected per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dataplane::error::{DataPlaneError, DataPlaneResult};
use crate::dataplane::types::{BackendServerSpec, HealthCheckPolicy, TransactionId};
use crate::dataplane::ControlPlane;

/// Operation names used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Begin,
    ApplyServer,
    ApplyHealthCheckPolicy,
    Commit,
    Abort,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    ApplyServer(String),
    ApplyHealthCheckPolicy,
    Commit(TransactionId),
    Abort(TransactionId),
}

#[derive(Debug, Default)]
struct Staged {
    servers: Vec<BackendServerSpec>,
    policy: Option<HealthCheckPolicy>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    version: i64,
    servers: BTreeMap<String, BackendServerSpec>,
    policy: Option<HealthCheckPolicy>,
    open: HashMap<TransactionId, Staged>,
    calls: Vec<Call>,
    failures: HashMap<Operation, u32>,
    failing_servers: Vec<String>,
}

impl State {
    fn take_failure(&mut self, op: Operation) -> DataPlaneResult<()> {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(DataPlaneError::Status {
                    status: 500,
                    body: format!("injected {:?} failure", op),
                })
            }
            _ => Ok(()),
        }
    }

    fn staged(&mut self, transaction: &TransactionId) -> DataPlaneResult<&mut Staged> {
        if transaction.is_empty() {
            return Err(DataPlaneError::Validation("empty transaction id".to_string()));
        }
        self.open.get_mut(transaction).ok_or_else(|| DataPlaneError::Status {
            status: 404,
            body: format!("transaction {} not found", transaction),
        })
    }
}

/// Control plane that lives entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `times` calls of `op` fail with a 500.
    pub fn fail_next(&self, op: Operation, times: u32) {
        *self.lock().failures.entry(op).or_default() += times;
    }

    /// Make every upsert of the named server fail with a 500.
    pub fn fail_server(&self, name: impl Into<String>) {
        self.lock().failing_servers.push(name.into());
    }

    /// Committed servers, ordered by name.
    pub fn committed_servers(&self) -> Vec<BackendServerSpec> {
        self.lock().servers.values().cloned().collect()
    }

    pub fn committed_policy(&self) -> Option<HealthCheckPolicy> {
        self.lock().policy
    }

    /// Configuration version; bumped on every commit.
    pub fn version(&self) -> i64 {
        self.lock().version
    }

    pub fn open_transactions(&self) -> usize {
        self.lock().open.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| matches(c)).count()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn begin(&self) -> DataPlaneResult<TransactionId> {
        let mut state = self.lock();
        state.calls.push(Call::Begin);
        state.take_failure(Operation::Begin)?;

        state.next_id += 1;
        let id = TransactionId::new(format!("tx-{}-{}", state.version, state.next_id));
        state.open.insert(id.clone(), Staged::default());
        Ok(id)
    }

    async fn apply_server(&self, transaction: &TransactionId, server: &BackendServerSpec) -> DataPlaneResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::ApplyServer(server.name.clone()));
        state.take_failure(Operation::ApplyServer)?;
        if state.failing_servers.contains(&server.name) {
            return Err(DataPlaneError::Status {
                status: 500,
                body: format!("server {} rejected", server.name),
            });
        }
        state.staged(transaction)?.servers.push(server.clone());
        Ok(())
    }

    async fn apply_health_check_policy(
        &self,
        transaction: &TransactionId,
        policy: &HealthCheckPolicy,
    ) -> DataPlaneResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::ApplyHealthCheckPolicy);
        state.take_failure(Operation::ApplyHealthCheckPolicy)?;
        state.staged(transaction)?.policy = Some(*policy);
        Ok(())
    }

    async fn commit(&self, transaction: &TransactionId) -> DataPlaneResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::Commit(transaction.clone()));
        state.take_failure(Operation::Commit)?;
        state.staged(transaction)?;

        if let Some(staged) = state.open.remove(transaction) {
            for server in staged.servers {
                state.servers.insert(server.name.clone(), server);
            }
            if staged.policy.is_some() {
                state.policy = staged.policy;
            }
            state.version += 1;
        }
        Ok(())
    }

    async fn abort(&self, transaction: &TransactionId) -> DataPlaneResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::Abort(transaction.clone()));
        state.take_failure(Operation::Abort)?;
        state.staged(transaction)?;
        state.open.remove(transaction);
        Ok(())
    }
}
