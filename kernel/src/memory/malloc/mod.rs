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

//! Kernel heap allocation facade (C4).
//!
//! [`kmalloc`] dispatches to the smallest [`slab::SlabCache`] whose object size fits the
//! request; [`kfree`] dispatches by asking each cache in turn whether it owns the pointer.
//! There is no header on the returned allocation, so freeing requires this linear probe.

pub mod slab;

use crate::memory::VirtAddr;
use core::ptr::NonNull;
use slab::SlabCache;
use utils::errno::{EResult, Errno};

/// The largest single allocation [`kmalloc`] can satisfy.
pub const MAX_SIZE: usize = 32 * 1024;

/// One cache per size class, in ascending order. A cache's slab order is picked so a slab
/// holds a handful of objects even at the largest class, instead of growing by whole pages
/// for a single object.
static CACHES: [SlabCache; 13] = [
	SlabCache::new("kmalloc-8", 8, 4),
	SlabCache::new("kmalloc-16", 16, 4),
	SlabCache::new("kmalloc-32", 32, 4),
	SlabCache::new("kmalloc-64", 64, 4),
	SlabCache::new("kmalloc-128", 128, 4),
	SlabCache::new("kmalloc-256", 256, 4),
	SlabCache::new("kmalloc-512", 512, 4),
	SlabCache::new("kmalloc-1k", 1024, 4),
	SlabCache::new("kmalloc-2k", 2048, 4),
	SlabCache::new("kmalloc-4k", 4096, 4),
	SlabCache::new("kmalloc-8k", 8192, 5),
	SlabCache::new("kmalloc-16k", 16384, 6),
	SlabCache::new("kmalloc-32k", 32768, 6),
];

/// Allocates `size` bytes from the smallest cache that fits.
///
/// Fails with [`Errno::EINVAL`] if `size` is zero or exceeds [`MAX_SIZE`], or with whatever
/// error the underlying cache's growth returned (typically [`Errno::ENOMEM`]).
pub fn kmalloc(size: usize) -> EResult<NonNull<u8>> {
	if size == 0 || size > MAX_SIZE {
		return Err(Errno::EINVAL);
	}
	let cache = CACHES
		.iter()
		.find(|c| c.object_size() >= size)
		.ok_or(Errno::EINVAL)?;
	cache.alloc()
}

/// Frees a pointer previously returned by [`kmalloc`].
///
/// Returns [`Errno::ENOENT`] if `ptr` is not owned by any cache.
pub fn kfree(ptr: NonNull<u8>) -> EResult<()> {
	let addr = VirtAddr::from(ptr);
	let cache = CACHES
		.iter()
		.find(|c| c.owns(addr))
		.ok_or(Errno::ENOENT)?;
	cache.free(ptr)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn kmalloc_dispatches_smallest_fit() {
		let p = kmalloc(10).unwrap();
		assert!(CACHES[1].owns(VirtAddr::from(p)));
		kfree(p).unwrap();
	}

	#[test_case]
	fn kmalloc_zero_fails() {
		assert_eq!(kmalloc(0), Err(Errno::EINVAL));
	}

	#[test_case]
	fn kmalloc_oversize_fails() {
		assert_eq!(kmalloc(MAX_SIZE + 1), Err(Errno::EINVAL));
	}

	#[test_case]
	fn kmalloc_roundtrip_many_classes() {
		for size in [8usize, 100, 900, 5000, 20000] {
			let p = kmalloc(size).unwrap();
			kfree(p).unwrap();
		}
	}

	#[test_case]
	fn kfree_unowned_fails() {
		let bogus = NonNull::new(0x1000 as *mut u8).unwrap();
		assert_eq!(kfree(bogus), Err(Errno::ENOENT));
	}
}
