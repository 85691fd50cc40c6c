//! Process-wide run store.
//!
//! The index lock is held only to insert or look up a run. Each run sits
//! behind its own lock, so the executing task writes its run while pollers
//! read any run, and runs never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::error::EngineError;
use super::run::{Run, RunSnapshot, RunStatus};

#[derive(Debug, Default)]
struct Index {
    runs: HashMap<String, Arc<RwLock<Run>>>,
    /// Insertion order of run ids.
    order: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunStore {
    index: Arc<RwLock<Index>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new run and return its id.
    pub async fn insert(&self, run: Run) -> String {
        let id = run.id().to_string();
        let mut index = self.index.write().await;
        index.order.push(id.clone());
        index.runs.insert(id.clone(), Arc::new(RwLock::new(run)));
        id
    }

    async fn get(&self, id: &str) -> Option<Arc<RwLock<Run>>> {
        self.index.read().await.runs.get(id).cloned()
    }

    pub async fn status(&self, id: &str) -> Option<RunStatus> {
        let run = self.get(id).await?;
        let status = run.read().await.status();
        Some(status)
    }

    pub async fn snapshot(&self, id: &str) -> Option<RunSnapshot> {
        let run = self.get(id).await?;
        let snapshot = run.read().await.snapshot();
        Some(snapshot)
    }

    /// Apply `f` to the run under its write lock.
    pub async fn update<F, T>(&self, id: &str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Run) -> T,
    {
        let run = self
            .get(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut guard = run.write().await;
        Ok(f(&mut *guard))
    }

    /// Snapshots of every run, newest first.
    pub async fn list(&self) -> Vec<RunSnapshot> {
        let runs: Vec<Arc<RwLock<Run>>> = {
            let index = self.index.read().await;
            index
                .order
                .iter()
                .rev()
                .filter_map(|id| index.runs.get(id).cloned())
                .collect()
        };

        let mut snapshots = Vec::with_capacity(runs.len());
        for run in runs {
            snapshots.push(run.read().await.snapshot());
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.runs.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
