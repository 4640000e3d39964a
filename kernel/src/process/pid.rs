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

//! Task ID allocation.
//!
//! Ids are handed out from a monotonically increasing counter rather than a reclaimed pool:
//! nothing in this core needs to recycle a small id range, and a counter can never hand out
//! an id that is still in use by a live task.

use core::sync::atomic::{AtomicU32, Ordering};

/// Type representing a task ID.
pub type TaskId = u32;

/// Reserved id of the idle task, assigned directly rather than through [`next`].
pub const IDLE_ID: TaskId = 0;

/// The next id to hand out.
static NEXT_ID: AtomicU32 = AtomicU32::new(IDLE_ID + 1);

/// Returns a fresh, never-before-used task id.
pub fn next() -> TaskId {
	NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn next_is_monotonic_and_unique() {
		let a = next();
		let b = next();
		let c = next();
		assert!(a < b);
		assert!(b < c);
	}
}
