use std::collections::VecDeque;
use std::sync::Mutex;

use chess::Side;
use engine::SearchInfo;
use serde::{Deserialize, Serialize};

use crate::record::GameRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Play the game out to a result.
    Play,
    /// Compute a single move for the side to move.
    Compute,
    /// Unbounded analysis of the start position until stopped.
    Analyze,
    /// The source has no work left.
    None,
}

/// One unit of work handed to a game manager.
#[derive(Debug, Clone, PartialEq)]
pub struct GameTask {
    pub id: u64,
    pub kind: TaskKind,
    /// Swap which engine plays white.
    pub switch_side: bool,
    /// Template the game starts from: start position, time controls, tags.
    pub start: GameRecord,
}

impl GameTask {
    pub fn new(id: u64, kind: TaskKind, start: GameRecord) -> Self {
        Self {
            id,
            kind,
            switch_side: false,
            start,
        }
    }

    pub fn play(id: u64, start: GameRecord) -> Self {
        Self::new(id, TaskKind::Play, start)
    }

    /// The "no work remaining" task.
    pub fn none() -> Self {
        Self::new(0, TaskKind::None, GameRecord::default())
    }

    pub fn switched(mut self, switch_side: bool) -> Self {
        self.switch_side = switch_side;
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == TaskKind::None
    }
}

/// Supplies work to game managers and collects the results.
///
/// Called from manager threads; implementations synchronize internally.
pub trait TaskSource: Send + Sync {
    fn name(&self) -> &str;

    /// Next task for `manager_id`. [`TaskKind::None`] when exhausted.
    fn next_task(&self, manager_id: usize) -> GameTask;

    /// A task ended; `record` is the final game.
    fn task_completed(&self, task: &GameTask, record: &GameRecord);

    /// A task could not be carried out.
    fn task_failed(&self, task: &GameTask, reason: &str) {
        tracing::warn!(source = self.name(), task = task.id, "Task failed: {}", reason);
    }

    /// Live search telemetry of the running task.
    fn on_info(&self, _task: &GameTask, _side: Side, _info: &SearchInfo) {}

    /// Whether `next_task` would currently hand out work.
    fn has_tasks(&self) -> bool;
}

/// A plain FIFO of tasks that keeps every finished record.
#[derive(Debug, Default)]
pub struct TaskQueue {
    name: String,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<GameTask>,
    completed: Vec<(GameTask, GameRecord)>,
    failed: Vec<(u64, String)>,
    infos: usize,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, task: GameTask) {
        self.state().pending.push_back(task);
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Finished records, in completion order.
    pub fn completed(&self) -> Vec<GameRecord> {
        self.state()
            .completed
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.state().completed.len()
    }

    pub fn failed(&self) -> Vec<(u64, String)> {
        self.state().failed.clone()
    }

    pub fn info_count(&self) -> usize {
        self.state().infos
    }
}

impl TaskSource for TaskQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_task(&self, _manager_id: usize) -> GameTask {
        self.state().pending.pop_front().unwrap_or_else(GameTask::none)
    }

    fn task_completed(&self, task: &GameTask, record: &GameRecord) {
        self.state().completed.push((task.clone(), record.clone()));
    }

    fn task_failed(&self, task: &GameTask, reason: &str) {
        tracing::warn!(source = %self.name, task = task.id, "Task failed: {}", reason);
        self.state().failed.push((task.id, reason.to_string()));
    }

    fn on_info(&self, _task: &GameTask, _side: Side, _info: &SearchInfo) {
        self.state().infos += 1;
    }

    fn has_tasks(&self) -> bool {
        !self.state().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_hands_out_in_order_then_none() {
        let queue = TaskQueue::new("q");
        queue.push(GameTask::play(1, GameRecord::default()));
        queue.push(GameTask::play(2, GameRecord::default()).switched(true));
        assert!(queue.has_tasks());

        assert_eq!(queue.next_task(0).id, 1);
        let second = queue.next_task(0);
        assert_eq!(second.id, 2);
        assert!(second.switch_side);
        assert!(queue.next_task(0).is_none());
        assert!(!queue.has_tasks());
    }
}
