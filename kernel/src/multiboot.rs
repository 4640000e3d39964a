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

//! Reads just enough of the Multiboot2 information structure to feed the boot memory map into
//! C1: the memory-map tag. Command line, modules, ELF sections and every other tag this
//! bootloader can hand over are an external collaborator's concern, not parsed here.

use crate::memory::{
	PhysAddr,
	bootmem::{self, RegionKind},
};
use core::{ffi::c_void, mem::size_of};

/// Magic value the bootloader passes in `eax` for a Multiboot2 boot.
pub const BOOTLOADER_MAGIC: u32 = 0x36d76289;

const TAG_TYPE_END: u32 = 0;
const TAG_TYPE_MMAP: u32 = 6;
const MEMORY_AVAILABLE: u32 = 1;

#[repr(C)]
struct Tag {
	type_: u32,
	size: u32,
}

impl Tag {
	/// Returns a pointer to the tag following this one, 8-byte aligned.
	fn next(&self) -> *const Self {
		((self as *const _ as usize) + ((self.size as usize + 7) & !7)) as *const _
	}
}

#[repr(C)]
struct MmapEntry {
	addr: u64,
	len: u64,
	type_: u32,
	zero: u32,
}

#[repr(C)]
struct TagMmap {
	type_: u32,
	size: u32,
	entry_size: u32,
	entry_version: u32,
	entries: [MmapEntry; 0],
}

/// Walks the Multiboot2 tag list at `ptr` and registers every memory-map entry into the boot
/// memory region table.
///
/// # Safety
///
/// `ptr` must point to a valid Multiboot2 information structure, as handed to the kernel entry
/// point by a compliant bootloader.
pub unsafe fn register_regions(ptr: *const c_void) {
	let mut tag = ptr.byte_add(8) as *const Tag;
	while (*tag).type_ != TAG_TYPE_END {
		if (*tag).type_ == TAG_TYPE_MMAP {
			register_mmap(&*(tag as *const TagMmap));
		}
		tag = (*tag).next();
	}
}

unsafe fn register_mmap(mmap: &TagMmap) {
	let count = (mmap.size as usize - size_of::<TagMmap>()) / mmap.entry_size as usize;
	let entries = mmap.entries.as_ptr();
	for i in 0..count {
		let entry = &*(entries as *const u8).add(i * mmap.entry_size as usize).cast::<MmapEntry>();
		if entry.addr > usize::MAX as u64 {
			continue;
		}
		let kind = if entry.type_ == MEMORY_AVAILABLE {
			RegionKind::Available
		} else {
			RegionKind::Reserved
		};
		let start = PhysAddr(entry.addr as usize);
		let end = PhysAddr(entry.addr.saturating_add(entry.len).min(usize::MAX as u64) as usize);
		let _ = bootmem::add_region(start, end, kind);
	}
}
