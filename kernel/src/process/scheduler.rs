/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The scheduler (C7): a flat round-robin over every {WAITING, RUNNING} task, driven entirely
//! by the timer tick.
//!
//! There is exactly one CPU, so there is exactly one "current" task at a time and no
//! cross-core rebalancing to do. The task list itself is protected by [`TASKS`], the task
//! lock: every mutation (spawn, kill, the tick's own purge step) takes it, and the tick
//! handler holds it for the full duration of a tick since nothing may observe a half-updated
//! list.

use super::{
	State, Task, TaskType,
	pid::{self, TaskId},
	regs::Regs,
	tss,
};
use crate::memory::VirtAddr;
use utils::{
	collections::vec::Vec,
	errno::{EResult, Errno},
	lock::IntMutex,
};

/// The task list and the index of the currently running task within it.
struct Scheduler {
	tasks: Vec<Task>,
	current: usize,
	enabled: bool,
}

impl Scheduler {
	/// Finds the next task eligible to run, starting just after `current` and wrapping around.
	///
	/// Always terminates: the idle task is never anything but `WAITING` or `RUNNING`, so the
	/// scan finds it if nothing else qualifies first.
	fn pick_next(&self) -> usize {
		let len = self.tasks.len();
		for off in 1..=len {
			let idx = (self.current + off) % len;
			if matches!(self.tasks[idx].state, State::Waiting | State::Running) {
				return idx;
			}
		}
		self.current
	}

	/// Drops every `KILLED` task from the list and frees what it owned, except the task
	/// currently executing (its own kernel stack is in use by this very call) and the idle
	/// task (which can never be killed in the first place).
	fn purge_killed(&mut self) {
		let current_id = self.tasks[self.current].id();
		let mut i = 0;
		while i < self.tasks.len() {
			let t = &self.tasks[i];
			if t.state == State::Killed && t.id() != current_id && t.id() != pid::IDLE_ID {
				self.remove(i);
			} else {
				i += 1;
			}
		}
	}

	/// Removes the task at `idx` from the list and destroys it, adjusting `current` if the
	/// removal shifted it down.
	fn remove(&mut self, idx: usize) {
		let task = self.tasks.remove(idx);
		if idx < self.current {
			self.current -= 1;
		}
		task.destroy();
	}
}

/// The task lock: guards every list mutation (create, kill, purge) and the tick handler.
static TASKS: IntMutex<Scheduler> = IntMutex::new(Scheduler {
	tasks: Vec::new(),
	current: 0,
	enabled: false,
});

/// Initializes the scheduler with the idle task and enables ticking.
///
/// Must be called exactly once, from the thread of execution that becomes the idle task.
pub fn init() -> EResult<()> {
	let idle = Task::idle()?;
	let mut sched = TASKS.lock();
	sched.tasks.push(idle).map_err(|_| Errno::ENOMEM)?;
	sched.current = 0;
	sched.enabled = true;
	Ok(())
}

/// Creates a task and links it into the schedulable list.
pub fn spawn(
	name: &str,
	kind: TaskType,
	entry: VirtAddr,
	priority: u8,
	initial_state: State,
) -> EResult<TaskId> {
	let task = Task::create(name, kind, entry, priority, initial_state)?;
	let id = task.id();
	let mut sched = TASKS.lock();
	sched.tasks.push(task).map_err(|_| Errno::ENOMEM)?;
	Ok(id)
}

/// Marks the task `id` as `KILLED`. Refuses to kill the idle task.
///
/// Actual destruction happens in a later tick's purge step; if `id` is the task currently
/// running, it survives until the scheduler has switched away from it.
pub fn kill(id: TaskId) -> EResult<()> {
	if id == pid::IDLE_ID {
		return Err(Errno::EBUSY);
	}
	let mut sched = TASKS.lock();
	let task = sched.tasks.iter_mut().find(|t| t.id() == id).ok_or(Errno::ENOENT)?;
	task.state = State::Killed;
	Ok(())
}

/// Destroys the task `id`, freeing what it owns, right away instead of waiting for a tick's
/// purge step to get to it.
///
/// Refuses the idle task and an unknown id the same way [`kill`] does, and refuses a task
/// whose state isn't `KILLED` ([`Errno::EBUSY`]): a task must be killed first.
pub fn purge(id: TaskId) -> EResult<()> {
	if id == pid::IDLE_ID {
		return Err(Errno::EBUSY);
	}
	let mut sched = TASKS.lock();
	let idx = sched.tasks.iter().position(|t| t.id() == id).ok_or(Errno::ENOENT)?;
	if sched.tasks[idx].state != State::Killed {
		return Err(Errno::EBUSY);
	}
	sched.remove(idx);
	Ok(())
}

/// Marks the calling task as `KILLED` and waits for the next tick to switch away from it.
///
/// Never returns: there is no valid continuation for a task that has marked itself dead.
pub fn exit_current() -> ! {
	{
		let mut sched = TASKS.lock();
		let current = sched.current;
		sched.tasks[current].state = State::Killed;
	}
	loop {
		unsafe {
			core::arch::asm!("sti", "hlt");
		}
	}
}

/// Enables or disables ticking. While disabled, [`timer_tick`] is a no-op that simply resumes
/// whatever was interrupted.
pub fn set_enabled(enabled: bool) {
	TASKS.lock().enabled = enabled;
}

/// The timer tick entry point: the scheduler's only driver.
///
/// `regs` is the register state of whatever was interrupted to call this, to be saved as the
/// current task's state before picking what runs next. Never returns: the chosen task (which
/// may be the one that was already running) is always resumed through [`Regs::switch`], which
/// diverges.
pub fn timer_tick(regs: &Regs) -> ! {
	let mut sched = TASKS.lock();
	if !sched.enabled {
		let resume = sched.tasks[sched.current].regs.clone();
		let user = sched.tasks[sched.current].kind == TaskType::User;
		drop(sched);
		unsafe { resume.switch(user) }
	}

	sched.tasks[sched.current].regs = regs.clone();
	sched.tasks[sched.current].ticks += 1;
	sched.purge_killed();

	let next = sched.pick_next();
	if next != sched.current {
		if sched.tasks[sched.current].state == State::Running {
			sched.tasks[sched.current].state = State::Waiting;
		}
		sched.tasks[next].state = State::Running;
		sched.current = next;
	}

	let task = &sched.tasks[sched.current];
	tss::set_kernel_stack(task.kernel_stack_top().0 as u32);
	task.vmspace.bind();
	let resume = task.regs.clone();
	let user = task.kind == TaskType::User;
	drop(sched);
	unsafe { resume.switch(user) }
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn kill_idle_rejected() {
		assert_eq!(kill(pid::IDLE_ID), Err(Errno::EBUSY));
	}

	#[test_case]
	fn kill_unknown_rejected() {
		assert_eq!(kill(0xffff), Err(Errno::ENOENT));
	}
}
