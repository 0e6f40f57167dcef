//! Background units of work for the optimizer and for plain saves.
//!
//! Every unit of work owns a copy of the selection it was dispatched with and
//! echoes its request token in each notification, so callers can drop output
//! from superseded requests.

use crate::cancel::{CancelToken, Progress};
use crate::candidates::{build_candidates, priority_ranks};
use crate::config::EngineConfig;
use crate::data::{CourseId, CourseTable, Selection};
use crate::error::{EngineError, EngineResult};
use crate::materialize::{MaterializeContext, Persistence, SaveRequest, materialize};
use crate::solver::find_best_schedules;
use log::{debug, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type RequestToken = u64;

/// Lifecycle of one optimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    BuildingCandidates,
    Searching,
    WritingResults,
    Done,
    Cancelled,
    Failed,
}

/// Final report of an optimizer run; exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub token: RequestToken,
    pub succeeded: bool,
    pub cancelled: bool,
    pub files: Vec<PathBuf>,
    pub error: String,
}

impl Completion {
    pub fn success(token: RequestToken, files: Vec<PathBuf>) -> Self {
        Self {
            token,
            succeeded: true,
            cancelled: false,
            files,
            error: String::new(),
        }
    }

    pub fn cancelled(token: RequestToken) -> Self {
        Self {
            token,
            succeeded: false,
            cancelled: true,
            files: Vec::new(),
            error: String::new(),
        }
    }

    pub fn failed(token: RequestToken, error: impl Into<String>) -> Self {
        Self {
            token,
            succeeded: false,
            cancelled: false,
            files: Vec::new(),
            error: error.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match (self.succeeded, self.cancelled) {
            (true, _) => JobState::Done,
            (false, true) => JobState::Cancelled,
            (false, false) => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Progress { token: RequestToken, percent: u8 },
    BestScheduleFinished(Completion),
    SaveFinished { token: RequestToken, ok: bool, error: String },
}

impl Notification {
    pub fn token(&self) -> RequestToken {
        match self {
            Notification::Progress { token, .. } => *token,
            Notification::BestScheduleFinished(c) => c.token,
            Notification::SaveFinished { token, .. } => *token,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One optimizer request: build candidates, search, write the best schedules.
#[derive(Debug, Clone)]
pub struct BestScheduleJob {
    pub token: RequestToken,
    pub user_dir: PathBuf,
    pub username: String,
    pub selection: Selection,
    pub table: Option<Arc<CourseTable>>,
    pub config: EngineConfig,
}

impl BestScheduleJob {
    fn transition(&self, state: &mut JobState, next: JobState) {
        debug!("best schedule {}: {:?} -> {:?}", self.token, state, next);
        *state = next;
    }

    fn execute(
        &self,
        cancel: &CancelToken,
        persistence: &dyn Persistence,
        notify: &(dyn Fn(Notification) + Send + Sync),
        state: &mut JobState,
    ) -> EngineResult<Vec<PathBuf>> {
        self.transition(state, JobState::BuildingCandidates);
        let table = self.table.as_deref();
        let pool = build_candidates(table, &self.selection, &self.config.general_education_department);
        let ranks = priority_ranks(&self.selection);

        self.transition(state, JobState::Searching);
        let token = self.token;
        let mut progress = Progress::new(|percent| notify(Notification::Progress { token, percent }));
        let results = panic::catch_unwind(AssertUnwindSafe(|| {
            find_best_schedules(&pool, &ranks, &self.config.search, cancel, &mut progress)
        }))
        .map_err(|payload| EngineError::Search(panic_message(payload.as_ref())))??;
        cancel.check()?;

        self.transition(state, JobState::WritingResults);
        let Some(table) = table.filter(|_| !results.is_empty()) else {
            return Ok(Vec::new());
        };
        let output_dir = self.user_dir.join(&self.config.best_schedule_dir);
        let ctx = MaterializeContext {
            user_dir: &self.user_dir,
            output_dir: &output_dir,
            username: &self.username,
            selection: &self.selection,
            table,
            extension: &self.config.file_extension,
        };
        let files = materialize(&results, &ctx, persistence, cancel)?;
        cancel.check()?;

        if files.is_empty() {
            return Err(EngineError::WriteFailed);
        }
        Ok(files)
    }

    /// Runs to completion on the current thread and reports the outcome.
    ///
    /// Errors and panics never escape; they become the completion's error.
    pub fn run(
        &self,
        cancel: &CancelToken,
        persistence: &dyn Persistence,
        notify: &(dyn Fn(Notification) + Send + Sync),
    ) -> Completion {
        let mut state = JobState::Idle;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(cancel, persistence, notify, &mut state)
        }));

        let completion = match outcome {
            Ok(Ok(files)) => Completion::success(self.token, files),
            _ if cancel.is_cancelled() => Completion::cancelled(self.token),
            Ok(Err(EngineError::Cancelled)) => Completion::cancelled(self.token),
            Ok(Err(e)) => Completion::failed(self.token, e.to_string()),
            Err(payload) => Completion::failed(self.token, panic_message(payload.as_ref())),
        };
        self.transition(&mut state, completion.state());
        if completion.state() == JobState::Failed {
            warn!("best schedule {} failed: {}", self.token, completion.error);
        }

        notify(Notification::BestScheduleFinished(completion.clone()));
        completion
    }
}

/// A plain "save the current selection" request.
#[derive(Debug, Clone)]
pub struct SaveJob {
    pub token: RequestToken,
    pub path: PathBuf,
    pub username: String,
    pub selection: Selection,
    pub table: Arc<CourseTable>,
}

impl SaveJob {
    pub fn run(&self, persistence: &dyn Persistence) -> Result<(), String> {
        let included: Vec<CourseId> = self.selection.included.iter().copied().collect();
        let locked: Vec<CourseId> = self.selection.locked.iter().copied().collect();
        let request = SaveRequest {
            path: &self.path,
            username: &self.username,
            favorites: &self.selection.favorites,
            included: &included,
            locked: &locked,
            favorite_order: &self.selection.favorite_order,
            table: &self.table,
        };
        panic::catch_unwind(AssertUnwindSafe(|| persistence.save(&request)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
    }
}

/// Handle to a dispatched optimizer run.
pub struct JobHandle {
    pub token: RequestToken,
    cancel: CancelToken,
    handle: JoinHandle<Completion>,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Completion {
        match self.handle.await {
            Ok(completion) => completion,
            Err(e) => Completion::failed(self.token, format!("worker task failed: {e}")),
        }
    }
}

/// Dispatches units of work onto the blocking pool and fans notifications out
/// to a single channel.
pub struct TaskHost {
    runtime: Handle,
    persistence: Arc<dyn Persistence>,
    sender: mpsc::UnboundedSender<Notification>,
    next_token: AtomicU64,
    current_search: Mutex<Option<(RequestToken, CancelToken)>>,
    current_save: AtomicU64,
}

impl TaskHost {
    pub fn new(
        runtime: Handle,
        persistence: Arc<dyn Persistence>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let host = Self {
            runtime,
            persistence,
            sender,
            next_token: AtomicU64::new(1),
            current_search: Mutex::new(None),
            current_save: AtomicU64::new(0),
        };
        (host, receiver)
    }

    /// A fresh token, never handed out before by this host.
    pub fn next_token(&self) -> RequestToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether `token` belongs to the latest optimizer or save request.
    pub fn is_current(&self, token: RequestToken) -> bool {
        let search = self
            .current_search
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(t, _)| *t == token);
        search || self.current_save.load(Ordering::Relaxed) == token
    }

    /// Cancels the in-flight optimizer run, if any.
    pub fn cancel_search(&self) {
        if let Some((token, cancel)) = self
            .current_search
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            info!("cancelling best schedule {}", token);
            cancel.cancel();
        }
    }

    /// Starts an optimizer run, cancelling the one it supersedes.
    pub fn dispatch_best_schedule(&self, job: BestScheduleJob) -> JobHandle {
        let cancel = CancelToken::new();
        let token = job.token;
        {
            let mut current = self
                .current_search
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some((old, old_cancel)) = current.replace((token, cancel.clone())) {
                debug!("best schedule {} superseded by {}", old, token);
                old_cancel.cancel();
            }
        }

        let persistence = Arc::clone(&self.persistence);
        let sender = self.sender.clone();
        let worker_cancel = cancel.clone();
        let handle = self.runtime.spawn_blocking(move || {
            let notify = move |n: Notification| {
                let _ = sender.send(n);
            };
            job.run(&worker_cancel, persistence.as_ref(), &notify)
        });

        JobHandle {
            token,
            cancel,
            handle,
        }
    }

    /// Starts a save; completion arrives as [`Notification::SaveFinished`].
    pub fn dispatch_save(&self, job: SaveJob) -> JoinHandle<Result<(), String>> {
        self.current_save.store(job.token, Ordering::Relaxed);
        let persistence = Arc::clone(&self.persistence);
        let sender = self.sender.clone();
        self.runtime.spawn_blocking(move || {
            let outcome = job.run(persistence.as_ref());
            if let Err(e) = &outcome {
                warn!("save {} to {} failed: {}", job.token, job.path.display(), e);
            }
            let _ = sender.send(Notification::SaveFinished {
                token: job.token,
                ok: outcome.is_ok(),
                error: outcome.as_ref().err().cloned().unwrap_or_default(),
            });
            outcome
        })
    }
}
