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

//! A preemptive multitasking kernel for 32-bit x86. This reference documents interfaces for
//! modules and the kernel's internals.
//!
//! The interrupt layer that would actually fire `timer_tick`/`page_fault` (IDT, legacy PIC,
//! keyboard, shell) is an external collaborator not carried by this tree: boot brings memory
//! management and the scheduler up to the idle task and then halts, interrupts masked, since
//! nothing would ever unmask them.

#![no_std]
#![no_main]
#![feature(adt_const_params)]
#![feature(alloc_layout_extra)]
#![feature(allocator_api)]
#![feature(allow_internal_unstable)]
#![feature(array_chunks)]
#![feature(custom_test_frameworks)]
#![feature(debug_closure_helpers)]
#![feature(lang_items)]
#![feature(likely_unlikely)]
#![feature(negative_impls)]
#![feature(non_null_from_ref)]
#![feature(offset_of_enum)]
#![feature(once_cell_try)]
#![feature(pointer_is_aligned_to)]
#![feature(ptr_metadata)]
#![feature(strict_provenance_lints)]
#![feature(unsigned_nonzero_div_ceil)]
#![deny(fuzzy_provenance_casts)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(dead_code)]
#![allow(incomplete_features)]
#![allow(internal_features)]
#![allow(unsafe_op_in_unsafe_fn)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]

pub mod arch;
mod boot;
#[macro_use]
pub mod config;
pub mod gdt;
pub mod logger;
pub mod memory;
pub mod multiboot;
#[macro_use]
pub mod panic;
pub mod power;
#[macro_use]
pub mod print;
pub mod process;
pub mod selftest;

use core::{
	alloc::{GlobalAlloc, Layout},
	ffi::c_void,
	ptr::NonNull,
};
use memory::{bootmem, buddy, malloc, vmem};
use process::{scheduler, tss};
pub use utils;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The global allocator backing `alloc`, dispatching straight to the kmalloc facade (C4).
///
/// Does not honor `layout.align()`: every size class is itself a power of two and every type
/// allocated through `alloc` in this core needs no more alignment than its own size.
struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		match malloc::kmalloc(layout.size()) {
			Ok(ptr) => ptr.as_ptr(),
			Err(_) => core::ptr::null_mut(),
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
		let Some(ptr) = NonNull::new(ptr) else {
			return;
		};
		let _ = malloc::kfree(ptr);
	}
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// This is the main function of the Rust source code, responsible for the initialization of the
/// kernel.
///
/// When calling this function, the CPU must be in Protected Mode with the temporary boot GDT
/// from [`boot`] loaded.
///
/// Arguments:
/// - `magic` is the magic number passed by the bootloader; checked against
///   [`multiboot::BOOTLOADER_MAGIC`].
/// - `multiboot_ptr` is the pointer to the Multiboot information structure.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(magic: u32, multiboot_ptr: *const c_void) -> ! {
	arch::init();

	println!("Boot {NAME} version {VERSION}");
	if magic != multiboot::BOOTLOADER_MAGIC {
		panic!("invalid bootloader magic number: {magic:#x}");
	}

	println!("Setup memory management");
	unsafe {
		multiboot::register_regions(multiboot_ptr);
	}
	buddy::init(bootmem::highest_pfn()).expect("buddy allocator initialization failed");
	bootmem::mark_free();
	vmem::init().expect("virtual memory initialization failed");

	println!("Setup GDT and TSS");
	gdt::init();
	tss::TSS::init();

	println!("Setup processes");
	scheduler::init().expect("scheduler initialization failed");

	#[cfg(test)]
	kernel_selftest();

	println!("{NAME} is up");
	power::halt();
}
