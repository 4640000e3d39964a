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

//! A task is the kernel's unit of scheduling (C7).
//!
//! Creation carves out everything a task owns up front — a kernel stack from the buddy
//! allocator, a virtual address space from C6, an id and a name — and seeds an initial
//! register state so that the scheduler's first switch into the task resumes it exactly as
//! it would resume any other task coming back from an interrupt. There is no separate
//! "first run" path.

pub mod pid;
pub mod regs;
pub mod scheduler;
#[cfg(target_arch = "x86")]
pub mod tss;

use crate::memory::{
	PAGE_SIZE, VirtAddr,
	buddy::{self, FrameOrder},
	vmspace::{self, VmSpace},
};
use core::cmp::min;
use pid::TaskId;
use regs::Regs;
use utils::{
	errno::{EResult, Errno},
	limits::{TASK_KERNEL_STACK_ORDER, TASK_NAME_LENGTH_MAX, TASK_PRIORITY_MAX, TASK_PRIORITY_MIN},
};

/// Order of a task's kernel stack, in pages.
const KERNEL_STACK_ORDER: FrameOrder = TASK_KERNEL_STACK_ORDER as FrameOrder;
/// Size of a task's kernel stack in bytes.
const KERNEL_STACK_SIZE: usize = PAGE_SIZE << KERNEL_STACK_ORDER;

/// Top of every user task's stack region, just below the kernelspace boundary.
const USER_STACK_TOP: VirtAddr = crate::memory::KERNEL_BEGIN;
/// Number of pages reserved for a user task's stack.
const USER_STACK_PAGES: usize = 16;

/// A task's scheduling state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
	/// Not yet usable; never observed outside of construction.
	Invalid,
	/// Currently bound to the CPU.
	Running,
	/// Eligible to run, waiting for its turn.
	Waiting,
	/// Eligible for creation but not yet schedulable, or voluntarily suspended.
	Paused,
	/// Marked for destruction; purged on a later tick.
	Killed,
}

/// Whether a task runs with kernel or user privileges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskType {
	/// Runs in ring 0, sharing the kernel's privilege level and its own kernel stack as its
	/// only stack.
	Kernel,
	/// Runs in ring 3, with a dedicated user stack; traps back into the kernel stack on
	/// interrupt.
	User,
}

/// Copies `name` into `buf`, truncating to fit and null-terminating.
fn set_name(buf: &mut [u8; TASK_NAME_LENGTH_MAX], name: &str) {
	let bytes = name.as_bytes();
	let len = min(bytes.len(), TASK_NAME_LENGTH_MAX - 1);
	buf[..len].copy_from_slice(&bytes[..len]);
	for b in &mut buf[len..] {
		*b = 0;
	}
}

/// A task: the kernel's unit of scheduling.
pub struct Task {
	id: TaskId,
	name: [u8; TASK_NAME_LENGTH_MAX],
	kind: TaskType,
	priority: u8,
	state: State,
	/// Saved register state, restored verbatim on the next schedule-in.
	regs: Regs,
	/// Base (lowest address) of the kernel stack, or a null sentinel for the idle task, which
	/// runs on the stack the boot code was already using instead of an allocated one.
	kernel_stack: VirtAddr,
	vmspace: VmSpace,
	ticks: u64,
}

impl Task {
	/// Creates a task, allocating and seeding everything it owns.
	///
	/// `initial_state` must be [`State::Waiting`] or [`State::Paused`]; `priority` must fall in
	/// `[TASK_PRIORITY_MIN, TASK_PRIORITY_MAX]`. Any failure after partial progress is rolled
	/// back before returning.
	pub fn create(
		name: &str,
		kind: TaskType,
		entry: VirtAddr,
		priority: u8,
		initial_state: State,
	) -> EResult<Self> {
		if !matches!(initial_state, State::Waiting | State::Paused) {
			return Err(Errno::EINVAL);
		}
		if !(TASK_PRIORITY_MIN..=TASK_PRIORITY_MAX).contains(&priority) {
			return Err(Errno::EINVAL);
		}
		let id = pid::next();
		let mut name_buf = [0u8; TASK_NAME_LENGTH_MAX];
		set_name(&mut name_buf, name);

		let stack_ptr = buddy::alloc_kernel(KERNEL_STACK_ORDER)?;
		let kernel_stack = VirtAddr::from(stack_ptr);
		unsafe {
			core::ptr::write_bytes(stack_ptr.as_ptr(), 0, KERNEL_STACK_SIZE);
		}
		let stack_top = kernel_stack + KERNEL_STACK_SIZE;

		let mut vmspace = match VmSpace::new() {
			Ok(v) => v,
			Err(e) => {
				let _ = buddy::free_kernel(kernel_stack, KERNEL_STACK_ORDER);
				return Err(e);
			}
		};

		let mut regs = Regs::default();
		regs.eip = entry.0 as u32;
		regs.esp = match kind {
			TaskType::Kernel => stack_top.0 as u32,
			TaskType::User => {
				let stack_start = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;
				let mapped = vmspace.add_map(
					stack_start,
					USER_STACK_TOP,
					vmspace::MAP_READ | vmspace::MAP_WRITE,
				);
				if let Err(e) = mapped {
					vmspace.destroy();
					let _ = buddy::free_kernel(kernel_stack, KERNEL_STACK_ORDER);
					return Err(e);
				}
				USER_STACK_TOP.0 as u32
			}
		};

		Ok(Self {
			id,
			name: name_buf,
			kind,
			priority,
			state: initial_state,
			regs,
			kernel_stack,
			vmspace,
			ticks: 0,
		})
	}

	/// Creates the idle task from the thread of execution already running at subsystem init,
	/// rather than allocating a fresh kernel stack for it.
	fn idle() -> EResult<Self> {
		Ok(Self {
			id: pid::IDLE_ID,
			name: {
				let mut buf = [0u8; TASK_NAME_LENGTH_MAX];
				set_name(&mut buf, "kernel_idle");
				buf
			},
			kind: TaskType::Kernel,
			priority: TASK_PRIORITY_MIN,
			state: State::Running,
			regs: Regs::default(),
			kernel_stack: VirtAddr(0),
			vmspace: VmSpace::new()?,
			ticks: 0,
		})
	}

	/// Returns the task's id.
	pub fn id(&self) -> TaskId {
		self.id
	}

	/// Returns the task's name, up to its null terminator.
	pub fn name(&self) -> &str {
		let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		core::str::from_utf8(&self.name[..len]).unwrap_or("")
	}

	/// Returns the task's current state.
	pub fn state(&self) -> State {
		self.state
	}

	/// Returns the top of the task's kernel stack, the ring-0 stack pointer to load into the
	/// TSS before resuming this task.
	fn kernel_stack_top(&self) -> VirtAddr {
		self.kernel_stack + KERNEL_STACK_SIZE
	}

	/// Tears down everything the task owns: its kernel stack (if it has one of its own) and
	/// its virtual address space.
	fn destroy(self) {
		if !self.kernel_stack.is_null() {
			let _ = buddy::free_kernel(self.kernel_stack, KERNEL_STACK_ORDER);
		}
		self.vmspace.destroy();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn create_rejects_bad_state() {
		let res = Task::create("t", TaskType::Kernel, VirtAddr(0x1000), 1, State::Running);
		assert_eq!(res.err(), Some(Errno::EINVAL));
	}

	#[test_case]
	fn create_rejects_bad_priority() {
		let res = Task::create("t", TaskType::Kernel, VirtAddr(0x1000), 0, State::Waiting);
		assert_eq!(res.err(), Some(Errno::EINVAL));
		let res = Task::create("t", TaskType::Kernel, VirtAddr(0x1000), 6, State::Waiting);
		assert_eq!(res.err(), Some(Errno::EINVAL));
	}

	#[test_case]
	fn create_truncates_long_name() {
		let long = "a-name-far-too-long-to-fit";
		let task = Task::create(long, TaskType::Kernel, VirtAddr(0x1000), 1, State::Waiting)
			.unwrap();
		assert!(task.name().len() < TASK_NAME_LENGTH_MAX);
		assert_eq!(task.name(), &long[..TASK_NAME_LENGTH_MAX - 1]);
		task.destroy();
	}

	#[test_case]
	fn create_seeds_entry_point() {
		let task =
			Task::create("t", TaskType::Kernel, VirtAddr(0xdead_b000), 1, State::Waiting)
				.unwrap();
		let eip = task.regs.eip;
		assert_eq!(eip, 0xdead_b000);
		task.destroy();
	}
}
