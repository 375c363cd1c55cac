use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::debug;
use zb_cancel::{CancelReason, CancelSource, CancelToken};

use crate::dependency::Dependency;
use crate::graph::TargetGraph;
use crate::ops::OpError;

/// Observable scheduling states. Transitions are linear; cancellation
/// drops a Pending or Waiting target straight to Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TargetState {
    Pending = 0,
    Waiting = 1,
    Running = 2,
    Done = 3,
}

impl From<u8> for TargetState {
    fn from(v: u8) -> Self {
        match v {
            0 => TargetState::Pending,
            1 => TargetState::Waiting,
            2 => TargetState::Running,
            _ => TargetState::Done,
        }
    }
}

/// A scheduled target: the dependency plus its barrier and intrusive
/// scheduler state. The barrier counts unfinished dependencies; the body
/// may start once it reaches zero.
#[derive(Debug)]
pub struct RunTarget {
    pub dep: Dependency,
    /// Ids of the targets this one requires.
    pub deps: Vec<usize>,
    /// Ids of the targets that require this one; each is released when
    /// this target completes.
    releases: Vec<usize>,
    barrier: AtomicUsize,
    notify: Notify,
    state: AtomicU8,
}

impl RunTarget {
    pub fn state(&self) -> TargetState {
        self.state.load(Ordering::Acquire).into()
    }

    fn set_state(&self, state: TargetState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn wait_barrier(&self) {
        loop {
            let notified = self.notify.notified();
            if self.barrier.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.barrier.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// The concurrent executor. Drains a target graph in topological order,
/// dispatching one task per target; a target's body runs only after every
/// target it depends on has completed. The first failure stops new
/// dispatches (in-flight work finishes) and its exit code is reported.
pub async fn drain<F, Fut>(graph: TargetGraph, body: F) -> Result<(), OpError>
where
    F: Fn(Arc<Vec<Arc<RunTarget>>>, usize) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), OpError>> + Send + 'static,
{
    let order = graph.topological_sort();

    let targets: Vec<Arc<RunTarget>> = graph
        .into_nodes()
        .into_iter()
        .map(|node| {
            Arc::new(RunTarget {
                barrier: AtomicUsize::new(node.deps.len()),
                releases: node.required_by.iter().copied().collect(),
                deps: node.deps,
                dep: node.dep,
                notify: Notify::new(),
                state: AtomicU8::new(TargetState::Pending as u8),
            })
        })
        .collect();
    let targets = Arc::new(targets);

    let cancel = CancelSource::new();
    let first_error: Arc<Mutex<Option<OpError>>> = Arc::new(Mutex::new(None));

    let mut tasks = JoinSet::new();

    for id in order {
        let targets = targets.clone();
        let token = cancel.token();
        let cancel = cancel.clone();
        let first_error = first_error.clone();
        let body = body.clone();

        tasks.spawn(async move {
            let target = &targets[id];

            let result = run_one(&targets, id, &token, body).await;

            // record the failure before releasing dependents so none of
            // them can observe a clear token after their barrier drops
            if let Err(err) = result {
                debug!(name = %target.dep.name(), "task failed: {err}");
                cancel.cancel(CancelReason::TaskFailed(err.exit_code()));
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }

            target.set_state(TargetState::Done);
            for &r in &target.releases {
                targets[r].release();
            }
        });
    }

    while tasks.join_next().await.is_some() {}

    let err = first_error.lock().take();
    match err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_one<F, Fut>(
    targets: &Arc<Vec<Arc<RunTarget>>>,
    id: usize,
    token: &CancelToken,
    body: F,
) -> Result<(), OpError>
where
    F: Fn(Arc<Vec<Arc<RunTarget>>>, usize) -> Fut,
    Fut: Future<Output = Result<(), OpError>>,
{
    let target = &targets[id];

    // leaf fast path: nothing to wait for, nothing to run
    if !target.dep.buildable() && target.deps.is_empty() {
        return Ok(());
    }

    target.set_state(TargetState::Waiting);
    target.wait_barrier().await;

    // first-failure-wins: nothing new starts once a sibling has failed
    if token.is_cancelled() {
        return Ok(());
    }

    if !target.dep.buildable() {
        return Ok(());
    }

    target.set_state(TargetState::Running);
    body(targets.clone(), id).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::graph::TargetGraph;

    // build a generated-file chain so the targets are buildable without a
    // package loader: each "generated" node exists only by name
    fn generated(name: &str) -> Dependency {
        use crate::dependency::{DeclaringRegistry, GeneratedFile};
        use std::path::{Path, PathBuf};

        let registry = DeclaringRegistry::default();
        Dependency::Generated(GeneratedFile {
            path: PathBuf::from(name),
            depends: PathBuf::from("/dev/null"),
            declaring: registry.get(Path::new("/dev/null")),
        })
    }

    #[tokio::test]
    async fn bodies_run_in_dependency_order() {
        let mut g = TargetGraph::new();
        let a = g.intern(generated("/a"), None);
        let b = g.intern(generated("/b"), Some(a));
        let c = g.intern(generated("/c"), Some(b));
        // wire deps consistently: a requires b requires c
        assert_eq!(g.node(c).required_by.len(), 1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();

        drain(g, move |targets, id| {
            let log = log2.clone();
            async move {
                log.lock().push(targets[id].dep.name());
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(*log.lock(), vec!["/c", "/b", "/a"]);
    }

    #[tokio::test]
    async fn first_failure_stops_new_dispatches() {
        let mut g = TargetGraph::new();
        let a = g.intern(generated("/a"), None);
        let _b = g.intern(generated("/b"), Some(a));

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        let err = drain(g, move |targets, id| {
            let ran = ran2.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if targets[id].dep.name() == "/b" {
                    Err(OpError::Stopped { code: 7 })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.exit_code(), 7);
        // only the failing leaf ran; its dependent was cancelled
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leaf_files_complete_without_running() {
        let mut g = TargetGraph::new();
        let a = g.intern(generated("/a"), None);
        g.intern(Dependency::source("/src"), Some(a));

        let ran = Arc::new(Mutex::new(Vec::new()));
        let ran2 = ran.clone();

        drain(g, move |targets, id| {
            let ran = ran2.clone();
            async move {
                ran.lock().push(targets[id].dep.name());
                Ok(())
            }
        })
        .await
        .unwrap();

        // the leaf never reaches the body; its dependent still ran
        assert_eq!(*ran.lock(), vec!["/a"]);
    }
}
