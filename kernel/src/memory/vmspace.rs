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

//! A task's virtual address space (C6): a page directory from C5 plus the ordered list of
//! mappings it resolves page faults against.
//!
//! The directory is never populated eagerly for a mapping: [`VmSpace::add_map`] only records
//! the range, and the backing pages are installed one at a time as [`VmSpace::resolve`] handles
//! the fault each one raises the first time it's touched.

use crate::memory::{
	PhysAddr, VirtAddr, buddy,
	vmem::{VMem, x86},
};
use utils::{
	collections::vec::Vec,
	errno::{EResult, Errno},
};

/// A mapping can be read from.
pub const MAP_READ: u32 = 0x01;
/// A mapping can be written to.
pub const MAP_WRITE: u32 = 0x02;
/// A mapping can be executed.
pub const MAP_EXEC: u32 = 0x04;
/// A mapping's pages may be shared with another space.
pub const MAP_SHARED: u32 = 0x08;

/// A region of virtual memory within a [`VmSpace`], populated lazily.
#[derive(Clone, Copy)]
pub struct Mapping {
	/// First (inclusive) address of the range.
	pub start: VirtAddr,
	/// Last (exclusive) address of the range.
	pub end: VirtAddr,
	/// Permission/kind flags (`MAP_*`).
	pub flags: u32,
}

impl Mapping {
	/// Tells whether `addr` falls within this mapping.
	fn contains(&self, addr: VirtAddr) -> bool {
		addr >= self.start && addr < self.end
	}

	/// Translates this mapping's flags to the architecture's page flags.
	fn arch_flags(&self) -> u32 {
		let mut flags = 0;
		if self.flags & MAP_WRITE != 0 {
			flags |= x86::FLAG_WRITE;
		}
		flags | x86::FLAG_USER
	}
}

/// A task's virtual address space.
pub struct VmSpace {
	vmem: VMem,
	mappings: Vec<Mapping>,
	/// Number of tasks sharing this space.
	users: usize,
}

impl VmSpace {
	/// Creates a new, empty address space with a fresh directory already carrying the kernel
	/// half.
	pub fn new() -> EResult<Self> {
		let vmem = VMem::new().map_err(|_| Errno::ENOMEM)?;
		Ok(Self {
			vmem,
			mappings: Vec::new(),
			users: 1,
		})
	}

	/// Increments the reference count of this space, for a new task sharing it.
	pub fn acquire(&mut self) {
		self.users += 1;
	}

	/// Returns the number of tasks currently using this space.
	pub fn users(&self) -> usize {
		self.users
	}

	/// Records a new mapping, to be populated lazily on the first fault within its range.
	pub fn add_map(&mut self, start: VirtAddr, end: VirtAddr, flags: u32) -> EResult<()> {
		if start >= end {
			return Err(Errno::EINVAL);
		}
		self.mappings
			.push(Mapping { start, end, flags })
			.map_err(|_| Errno::ENOMEM)
	}

	/// Removes the mapping starting at `start`, if any. Does not touch whatever was already
	/// populated in the directory for it.
	pub fn delete_map(&mut self, start: VirtAddr) {
		let pos = self.mappings.iter().position(|m| m.start == start);
		if let Some(pos) = pos {
			self.mappings.remove(pos);
		}
	}

	/// Finds the mapping covering `addr`, if any.
	fn find(&self, addr: VirtAddr) -> Option<&Mapping> {
		self.mappings.iter().find(|m| m.contains(addr))
	}

	/// Resolves a page fault at `fault_va`.
	///
	/// On a hit, allocates one page from C2 and installs it at `fault_va` with the covering
	/// mapping's flags. On a miss (no mapping covers the address), returns
	/// [`Errno::ENOENT`] — the fault is unhandled at this layer.
	///
	/// Does not check whether `fault_va` was already populated: the hardware only faults
	/// because it is absent, so a spurious fault here is a caller bug, not a case this
	/// function recovers from.
	pub fn resolve(&mut self, fault_va: VirtAddr) -> EResult<()> {
		let mapping = *self.find(fault_va).ok_or(Errno::ENOENT)?;
		let page = buddy::alloc(0, buddy::ZONE_LOWMEM)?;
		let page_addr = fault_va.down_align_to(crate::memory::PAGE_SIZE);
		let mut transaction = self.vmem.transaction();
		transaction.map(page, page_addr, mapping.arch_flags())?;
		transaction.commit();
		Ok(())
	}

	/// Returns the physical address backing `addr`, if mapped.
	pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
		self.vmem.translate(addr)
	}

	/// Binds this space's directory to the current CPU.
	pub fn bind(&self) {
		self.vmem.bind();
	}

	/// Destroys the address space: frees the directory (and every page it still owns) and
	/// drops the mapping list.
	pub fn destroy(self) {
		// `VMem::drop` frees the directory; `Vec::drop` frees the mapping list.
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn vmspace_resolve_populates_page() {
		let mut space = VmSpace::new().unwrap();
		let base = VirtAddr(0x4000_0000);
		space.add_map(base, base + 0x1000, MAP_READ | MAP_WRITE).unwrap();
		assert!(space.translate(base).is_none());
		space.resolve(base).unwrap();
		assert!(space.translate(base).is_some());
	}

	#[test_case]
	fn vmspace_resolve_unmapped_fails() {
		let mut space = VmSpace::new().unwrap();
		assert_eq!(space.resolve(VirtAddr(0x4000_0000)), Err(Errno::ENOENT));
	}

	#[test_case]
	fn vmspace_destroy_frees_populated_pages() {
		let before = buddy::allocated_pages_count();
		let mut space = VmSpace::new().unwrap();
		let base = VirtAddr(0x4000_0000);
		space.add_map(base, base + 0x3000, MAP_READ | MAP_WRITE).unwrap();
		space.resolve(base).unwrap();
		space.resolve(base + 0x1000).unwrap();
		space.resolve(base + 0x2000).unwrap();
		assert!(buddy::allocated_pages_count() >= before + 3);
		space.destroy();
		assert_eq!(buddy::allocated_pages_count(), before);
	}
}
