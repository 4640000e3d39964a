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

//! Error taxonomy shared across the whole crate.
//!
//! Two result aliases cover almost every fallible function in the kernel:
//! [`AllocResult`] for operations that can only fail by running out of
//! memory, and [`EResult`] for operations with a richer failure mode
//! (bad argument, missing object, invalid state transition, refusal to
//! free a kernel-owned page).

use core::alloc::AllocError;
use core::fmt;

/// Result of an operation that can only fail by exhausting memory.
pub type AllocResult<T> = Result<T, AllocError>;

/// Result of an operation with a richer failure mode than plain allocation
/// failure.
pub type EResult<T> = Result<T, Errno>;

/// The kernel's error code.
///
/// Variants other than [`Errno::Critical`] mirror the POSIX errno of the
/// same name, kept because the surrounding ecosystem (and the original
/// system this kernel continues) expects those names at error-reporting
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Errno {
	/// Invalid argument (`EINVAL`): bad order, unknown priority, malformed
	/// range, rejected `CopyMode::Cow`.
	EINVAL,
	/// Out of memory (`ENOMEM`): no block, region or slab available.
	ENOMEM,
	/// No such entity (`ENOENT`): no task by id, no mapping covers the
	/// faulting address, object not owned by any slab.
	ENOENT,
	/// Resource busy (`EBUSY`): used for invalid state transitions, e.g.
	/// killing the idle task or purging a task that is not `KILLED`.
	EBUSY,
	/// Interrupted (`EINTR`).
	EINTR,
	/// Attempt to free or mutate a page the kernel owns outright (its own
	/// image or the page-structure pool). Not a POSIX errno.
	Critical,
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let msg = match self {
			Self::EINVAL => "Invalid argument",
			Self::ENOMEM => "Out of memory",
			Self::ENOENT => "No such entity",
			Self::EBUSY => "Resource busy or invalid state",
			Self::EINTR => "Interrupted",
			Self::Critical => "Attempt to mutate a critical page",
		};
		write!(f, "{msg}")
	}
}

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Self::ENOMEM
	}
}

/// Builds an [`Errno`] value from one of its variant names.
///
/// This mirrors the ergonomics of the POSIX `errno!(EINVAL)` idiom used
/// throughout the kernel at error-reporting boundaries.
#[macro_export]
macro_rules! errno {
	($variant:ident) => {
		$crate::errno::Errno::$variant
	};
}
