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

//! This module implements kernel panics handling.
//!
//! A kernel panic occurs when an error is raised that the kernel cannot recover
//! from. This is an undesirable state which requires to reboot the host
//! machine.

use crate::{arch::x86::cli, logger::LOGGER, memory::VirtAddr, power, println, register_get};
use core::{
	fmt,
	panic::{Location, PanicInfo},
};

fn panic_impl(msg: impl fmt::Display, loc: Option<&Location>) -> ! {
	cli();
	LOGGER.lock().silent = false;
	println!("-- KERNEL PANIC! --");
	if let Some(loc) = loc {
		println!("Reason: {msg} Location: {loc}");
	} else {
		println!("Reason: {msg}");
	}
	#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
	{
		let cr2 = VirtAddr(register_get!("cr2"));
		let cr3 = VirtAddr(register_get!("cr3"));
		println!("CR2: {cr2:?} CR3: {cr3:?}");
	}
	println!("-- end trace --");
	power::halt();
}

/// Called on Rust panic.
#[panic_handler]
fn panic(panic_info: &PanicInfo) -> ! {
	panic_impl(panic_info.message(), panic_info.location());
}

#[lang = "eh_personality"]
fn eh_personality() {}
