//! Stage progress tracker
//!
//! Turns successive [`StageStatus`] snapshots into progress events. The
//! tracker remembers which stages it has already announced as started and
//! finished so every such event is emitted at most once, even when a
//! snapshot taken right after a reconnect shows an earlier state again.

use catchup_core::{ProgressEvent, StageState, StageStatus};

/// Events produced by one [`StageTracker::update`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedProgress {
    /// New events, in stage order, terminal event last
    pub events: Vec<ProgressEvent>,
    /// Stage currently being worked on
    pub current: Option<usize>,
    /// Overall terminal state, once reached
    pub terminal: Option<StageState>,
}

/// Incremental renderer of full-state-transfer stages
#[derive(Debug, Clone, Default)]
pub struct StageTracker {
    started: Vec<bool>,
    finished: Vec<bool>,
    last_rendered: Option<usize>,
    terminal: Option<StageState>,
}

impl StageTracker {
    /// Tracker that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage index rendered by the previous update
    pub fn last_rendered(&self) -> Option<usize> {
        self.last_rendered
    }

    /// Whether a terminal state has been reported
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    /// Render a new snapshot
    pub fn update(&mut self, status: &StageStatus) -> RenderedProgress {
        if self.started.len() < status.stages.len() {
            self.started.resize(status.stages.len(), false);
            self.finished.resize(status.stages.len(), false);
        }

        let mut events = Vec::new();
        for (index, stage) in status.stages.iter().enumerate() {
            if self.finished[index] {
                continue;
            }
            match stage.state {
                StageState::InProgress if !self.started[index] => {
                    self.started[index] = true;
                    events.push(ProgressEvent::StageStarted {
                        index,
                        name: stage.name.clone(),
                    });
                }
                state if state.is_terminal() => {
                    self.finished[index] = true;
                    events.push(ProgressEvent::StageFinished {
                        index,
                        name: stage.name.clone(),
                        state,
                        elapsed_secs: stage.elapsed_secs,
                    });
                }
                _ => {}
            }
        }

        let current = status.current_stage_index();
        if let Some(index) = current {
            let stage = &status.stages[index];
            if stage.state == StageState::InProgress && !self.finished[index] {
                events.push(ProgressEvent::StageProgress {
                    index,
                    name: stage.name.clone(),
                    completed: stage.work_completed,
                    estimated: stage.work_estimated,
                });
            }
        }
        self.last_rendered = current;

        if self.terminal.is_none() && status.state.is_terminal() {
            self.terminal = Some(status.state);
            events.push(match status.state {
                StageState::Failed => ProgressEvent::Failed {
                    code: status.error_code,
                    message: status.error_message.clone().unwrap_or_default(),
                },
                _ => ProgressEvent::Completed,
            });
        }

        RenderedProgress {
            events,
            current,
            terminal: self.terminal,
        }
    }
}
