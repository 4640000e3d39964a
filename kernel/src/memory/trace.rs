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

//! Memory allocation tracing, enabled by the `memtrace` feature.
//!
//! [`sample`] is called by allocators wrapped with
//! [`macros::instrument_allocator`]. There is no serial port or symbolicated
//! callstack in this core, so a sample is just logged through [`crate::println`].

/// Logs one allocation event.
///
/// Arguments:
/// - `allocator` is the name of the allocator that produced the sample.
/// - `op` is the operation: `0` for alloc, `1` for realloc, `2` for free.
/// - `ptr` is the affected address, or null if not applicable.
/// - `size` is the new size of the allocation, in the allocator's own unit.
pub fn sample(allocator: &str, op: u8, ptr: *const u8, size: usize) {
	let op = match op {
		0 => "alloc",
		1 => "realloc",
		2 => "free",
		_ => "?",
	};
	crate::println!("memtrace: {allocator} {op} ptr={ptr:p} size={size}");
}
