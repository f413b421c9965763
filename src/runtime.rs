//! Per-thread turn scheduling on the tokio runtime.
//!
//! Each submitted turn runs as its own task. Turns on different threads run
//! concurrently; a second turn on a busy thread is rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use agent_provider::CancelSignal;
use thread_store::validate_thread_id;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::agent::{Agent, TurnError, TurnOutcome, TurnUpdate};

struct ActiveTurn {
    turn_id: u64,
    cancel: CancelSignal,
}

type ActiveTurns = Arc<Mutex<HashMap<String, ActiveTurn>>>;

pub struct RuntimeController {
    agent: Arc<Agent>,
    active: ActiveTurns,
    next_turn_id: AtomicU64,
}

/// What a scheduled turn does once it starts.
enum TurnKind {
    Submit(String),
    Resume,
}

impl RuntimeController {
    #[must_use]
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_turn_id: AtomicU64::new(1),
        }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Starts a user turn on `thread_id`.
    pub fn submit(
        &self,
        thread_id: &str,
        user_text: impl Into<String>,
    ) -> Result<TurnHandle, TurnError> {
        let user_text = user_text.into();
        if user_text.trim().is_empty() {
            return Err(TurnError::EmptyInput);
        }
        self.start(thread_id, TurnKind::Submit(user_text))
    }

    /// Re-enters the loop on `thread_id` without new input.
    pub fn resume(&self, thread_id: &str) -> Result<TurnHandle, TurnError> {
        self.start(thread_id, TurnKind::Resume)
    }

    /// Requests cancellation of the active turn on `thread_id`.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match lock_unpoisoned(&self.active).get(thread_id) {
            Some(turn) => {
                turn.cancel.store(true, Ordering::Release);
                info!(thread_id, turn_id = turn.turn_id, "turn cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        lock_unpoisoned(&self.active).contains_key(thread_id)
    }

    fn start(&self, thread_id: &str, kind: TurnKind) -> Result<TurnHandle, TurnError> {
        validate_thread_id(thread_id)?;

        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut active = lock_unpoisoned(&self.active);
            if active.contains_key(thread_id) {
                return Err(TurnError::ThreadBusy(thread_id.to_string()));
            }
            active.insert(
                thread_id.to_string(),
                ActiveTurn {
                    turn_id,
                    cancel: Arc::clone(&cancel),
                },
            );
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            thread_id: thread_id.to_string(),
            turn_id,
        };
        let agent = Arc::clone(&self.agent);
        let task_cancel = Arc::clone(&cancel);
        let task_thread_id = thread_id.to_string();

        debug!(thread_id, turn_id, "spawning turn");
        let join = tokio::spawn(async move {
            let _guard = guard;
            let mut sink = move |update: TurnUpdate| {
                // The receiver may be gone; the turn still runs to completion.
                let _ = sender.send(update);
            };
            match kind {
                TurnKind::Submit(text) => {
                    agent
                        .run_turn(&task_thread_id, &text, &task_cancel, &mut sink)
                        .await
                }
                TurnKind::Resume => agent.resume(&task_thread_id, &task_cancel, &mut sink).await,
            }
        });

        Ok(TurnHandle {
            thread_id: thread_id.to_string(),
            cancel,
            updates: receiver,
            join,
        })
    }
}

/// Removes the active entry when the turn task ends, including on panic.
struct ActiveGuard {
    active: ActiveTurns,
    thread_id: String,
    turn_id: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = lock_unpoisoned(&self.active);
        if active
            .get(&self.thread_id)
            .is_some_and(|turn| turn.turn_id == self.turn_id)
        {
            active.remove(&self.thread_id);
        }
    }
}

/// Caller side of one running turn.
pub struct TurnHandle {
    thread_id: String,
    cancel: CancelSignal,
    updates: mpsc::UnboundedReceiver<TurnUpdate>,
    join: JoinHandle<Result<TurnOutcome, TurnError>>,
}

impl TurnHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Requests cooperative cancellation. A tool round already underway
    /// still completes and is recorded.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    /// Next update, or `None` once the turn has ended.
    pub async fn next_update(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    /// Waits for the turn to end. Undelivered updates are dropped.
    pub async fn finish(self) -> Result<TurnOutcome, TurnError> {
        match self.join.await {
            Ok(result) => result,
            Err(error) => Err(TurnError::TaskFailed(error.to_string())),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
