use std::collections::BTreeMap;

use tracing::warn;

use crate::overworld::{HookError, OverworldController, TickArgs};

/// Ticks spent on one unfinished active head before the stall warning fires.
/// Observability only: a stalled head still blocks later active tasks, which
/// is the contract transitions rely on.
const STALL_WARN_TICKS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// A cooperatively scheduled unit of game logic.
///
/// `process` runs once per tick and returns `Ok(true)` when the task is done;
/// a task that needs to wait simply keeps returning `Ok(false)`. Errors are
/// contained by the scheduler: the task is force-finished and removed, and
/// the rest of the queue keeps running. `on_finish` distinguishes normal
/// completion (`forced == false`) from errors and cancellation.
pub trait Task {
    fn process(
        &mut self,
        overworld: &mut OverworldController,
        args: &TickArgs,
    ) -> Result<bool, HookError>;

    fn on_finish(&mut self, _overworld: &mut OverworldController, _forced: bool) {}
}

/// Cooperative per-environment task runner with two queues.
///
/// Background tasks all run every tick, independently of each other. Active
/// tasks run strictly one at a time in registration order: only the head is
/// processed each tick, and a task finishing on tick N lets the next start on
/// tick N+1. Task ids are monotonic and never reused.
pub struct Scheduler {
    next_id: u64,
    background: BTreeMap<TaskId, Box<dyn Task>>,
    active: BTreeMap<TaskId, Box<dyn Task>>,
    stall_head: Option<TaskId>,
    stall_ticks: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            background: BTreeMap::new(),
            active: BTreeMap::new(),
            stall_head: None,
            stall_ticks: 0,
        }
    }

    pub fn register_task(&mut self, task: Box<dyn Task>, active: bool) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        if active {
            self.active.insert(id, task);
        } else {
            self.background.insert(id, task);
        }
        id
    }

    pub fn background_len(&self) -> usize {
        self.background.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn has_task(&self, id: TaskId) -> bool {
        self.background.contains_key(&id) || self.active.contains_key(&id)
    }

    /// Force-finish and remove a task from either queue. Unknown ids are a
    /// silent no-op.
    pub fn cancel_task(&mut self, overworld: &mut OverworldController, id: TaskId) -> bool {
        let task = self
            .background
            .remove(&id)
            .or_else(|| self.active.remove(&id));
        match task {
            Some(mut task) => {
                task.on_finish(overworld, true);
                if self.stall_head == Some(id) {
                    self.stall_head = None;
                }
                true
            }
            None => false,
        }
    }

    pub fn process(&mut self, overworld: &mut OverworldController, args: &TickArgs) {
        let background_ids: Vec<TaskId> = self.background.keys().copied().collect();
        for id in background_ids {
            let Some(mut task) = self.background.remove(&id) else {
                continue;
            };
            match task.process(overworld, args) {
                Ok(false) => {
                    self.background.insert(id, task);
                }
                Ok(true) => task.on_finish(overworld, false),
                Err(error) => {
                    warn!(task_id = id.0, error = %error, "background_task_failed");
                    task.on_finish(overworld, true);
                }
            }
        }

        let Some(head) = self.active.keys().next().copied() else {
            self.stall_head = None;
            return;
        };
        if self.stall_head == Some(head) {
            self.stall_ticks += 1;
            if self.stall_ticks == STALL_WARN_TICKS {
                warn!(
                    task_id = head.0,
                    ticks = self.stall_ticks,
                    "active head task has not finished; later active tasks are stalled"
                );
            }
        } else {
            self.stall_head = Some(head);
            self.stall_ticks = 1;
        }

        let Some(mut task) = self.active.remove(&head) else {
            return;
        };
        match task.process(overworld, args) {
            Ok(false) => {
                self.active.insert(head, task);
            }
            Ok(true) => {
                task.on_finish(overworld, false);
                self.stall_head = None;
            }
            Err(error) => {
                warn!(task_id = head.0, error = %error, "active_task_failed");
                task.on_finish(overworld, true);
                self.stall_head = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<(&'static str, u32)>>>;
    type Tick = Rc<Cell<u32>>;

    struct ScriptedTask {
        tag: &'static str,
        ticks_to_finish: u32,
        fail_on_call: Option<u32>,
        calls: u32,
        log: Log,
        tick: Tick,
        finishes: Rc<RefCell<Vec<(&'static str, bool)>>>,
    }

    impl ScriptedTask {
        fn boxed(
            tag: &'static str,
            ticks_to_finish: u32,
            log: &Log,
            tick: &Tick,
            finishes: &Rc<RefCell<Vec<(&'static str, bool)>>>,
        ) -> Box<Self> {
            Box::new(Self {
                tag,
                ticks_to_finish,
                fail_on_call: None,
                calls: 0,
                log: log.clone(),
                tick: tick.clone(),
                finishes: finishes.clone(),
            })
        }

        fn failing(
            tag: &'static str,
            fail_on_call: u32,
            log: &Log,
            tick: &Tick,
            finishes: &Rc<RefCell<Vec<(&'static str, bool)>>>,
        ) -> Box<Self> {
            Box::new(Self {
                tag,
                ticks_to_finish: u32::MAX,
                fail_on_call: Some(fail_on_call),
                calls: 0,
                log: log.clone(),
                tick: tick.clone(),
                finishes: finishes.clone(),
            })
        }
    }

    impl Task for ScriptedTask {
        fn process(
            &mut self,
            _overworld: &mut OverworldController,
            _args: &TickArgs,
        ) -> Result<bool, HookError> {
            self.calls += 1;
            self.log.borrow_mut().push((self.tag, self.tick.get()));
            if self.fail_on_call == Some(self.calls) {
                return Err(HookError::new("task blew up"));
            }
            Ok(self.calls >= self.ticks_to_finish)
        }

        fn on_finish(&mut self, _overworld: &mut OverworldController, forced: bool) {
            self.finishes.borrow_mut().push((self.tag, forced));
        }
    }

    struct Harness {
        scheduler: Scheduler,
        overworld: OverworldController,
        log: Log,
        tick: Tick,
        finishes: Rc<RefCell<Vec<(&'static str, bool)>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                scheduler: Scheduler::new(),
                overworld: OverworldController::new(),
                log: Rc::new(RefCell::new(Vec::new())),
                tick: Rc::new(Cell::new(0)),
                finishes: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn run_ticks(&mut self, count: u32) {
            let args = TickArgs::default();
            for _ in 0..count {
                self.tick.set(self.tick.get() + 1);
                self.scheduler.process(&mut self.overworld, &args);
            }
        }

        fn ticks_for(&self, tag: &'static str) -> Vec<u32> {
            self.log
                .borrow()
                .iter()
                .filter(|(entry, _)| *entry == tag)
                .map(|(_, tick)| *tick)
                .collect()
        }
    }

    #[test]
    fn task_ids_are_monotonic_and_never_reused() {
        let mut harness = Harness::new();
        let a = harness.scheduler.register_task(
            ScriptedTask::boxed("a", 1, &harness.log, &harness.tick, &harness.finishes),
            false,
        );
        let b = harness.scheduler.register_task(
            ScriptedTask::boxed("b", 1, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        harness.scheduler.cancel_task(&mut harness.overworld, a);
        let c = harness.scheduler.register_task(
            ScriptedTask::boxed("c", 1, &harness.log, &harness.tick, &harness.finishes),
            false,
        );
        assert_eq!((a, b, c), (TaskId(0), TaskId(1), TaskId(2)));
    }

    #[test]
    fn active_tasks_run_strictly_sequentially() {
        let mut harness = Harness::new();
        for (tag, ticks) in [("a", 3), ("b", 1), ("c", 1)] {
            harness.scheduler.register_task(
                ScriptedTask::boxed(tag, ticks, &harness.log, &harness.tick, &harness.finishes),
                true,
            );
        }
        harness.run_ticks(6);

        assert_eq!(harness.ticks_for("a"), vec![1, 2, 3]);
        assert_eq!(harness.ticks_for("b"), vec![4]);
        assert_eq!(harness.ticks_for("c"), vec![5]);
        assert_eq!(harness.scheduler.active_len(), 0);
    }

    #[test]
    fn background_tasks_all_run_every_tick() {
        let mut harness = Harness::new();
        for tag in ["x", "y"] {
            harness.scheduler.register_task(
                ScriptedTask::boxed(tag, 4, &harness.log, &harness.tick, &harness.finishes),
                false,
            );
        }
        harness.run_ticks(3);
        assert_eq!(harness.ticks_for("x"), vec![1, 2, 3]);
        assert_eq!(harness.ticks_for("y"), vec![1, 2, 3]);
    }

    #[test]
    fn failing_background_task_does_not_stop_the_other() {
        let mut harness = Harness::new();
        harness.scheduler.register_task(
            ScriptedTask::failing("bomb", 2, &harness.log, &harness.tick, &harness.finishes),
            false,
        );
        harness.scheduler.register_task(
            ScriptedTask::boxed("steady", 10, &harness.log, &harness.tick, &harness.finishes),
            false,
        );
        harness.run_ticks(5);

        assert_eq!(harness.ticks_for("bomb"), vec![1, 2]);
        assert_eq!(harness.ticks_for("steady"), vec![1, 2, 3, 4, 5]);
        assert!(harness
            .finishes
            .borrow()
            .contains(&("bomb", true)));
    }

    #[test]
    fn failing_active_task_unblocks_the_next_one() {
        let mut harness = Harness::new();
        harness.scheduler.register_task(
            ScriptedTask::failing("bomb", 1, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        harness.scheduler.register_task(
            ScriptedTask::boxed("next", 1, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        harness.run_ticks(3);

        assert_eq!(harness.ticks_for("bomb"), vec![1]);
        assert_eq!(harness.ticks_for("next"), vec![2]);
        let finishes = harness.finishes.borrow();
        assert!(finishes.contains(&("bomb", true)));
        assert!(finishes.contains(&("next", false)));
    }

    #[test]
    fn completion_finishes_without_forced_flag() {
        let mut harness = Harness::new();
        harness.scheduler.register_task(
            ScriptedTask::boxed("done", 2, &harness.log, &harness.tick, &harness.finishes),
            false,
        );
        harness.run_ticks(3);
        assert_eq!(harness.finishes.borrow().as_slice(), [("done", false)]);
        assert_eq!(harness.scheduler.background_len(), 0);
    }

    #[test]
    fn cancel_forces_finish_and_unknown_ids_are_noops() {
        let mut harness = Harness::new();
        let id = harness.scheduler.register_task(
            ScriptedTask::boxed("victim", 99, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        assert!(harness.scheduler.cancel_task(&mut harness.overworld, id));
        assert!(!harness.scheduler.cancel_task(&mut harness.overworld, id));
        assert!(!harness
            .scheduler
            .cancel_task(&mut harness.overworld, TaskId(12345)));
        assert_eq!(harness.finishes.borrow().as_slice(), [("victim", true)]);
        assert!(!harness.scheduler.has_task(id));
    }

    #[test]
    fn head_finishing_does_not_start_the_next_task_the_same_tick() {
        let mut harness = Harness::new();
        harness.scheduler.register_task(
            ScriptedTask::boxed("first", 1, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        harness.scheduler.register_task(
            ScriptedTask::boxed("second", 1, &harness.log, &harness.tick, &harness.finishes),
            true,
        );
        harness.run_ticks(1);
        assert_eq!(harness.ticks_for("first"), vec![1]);
        assert!(harness.ticks_for("second").is_empty());
        harness.run_ticks(1);
        assert_eq!(harness.ticks_for("second"), vec![2]);
    }
}
