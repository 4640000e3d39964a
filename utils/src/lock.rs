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

//! Mutual exclusion primitives.
//!
//! This core never sleeps on an allocation or a lock (§5): every lock here
//! is a spinlock, acquired by a test-and-set loop with acquire/release
//! ordering. The `INT` generic parameter tells whether interrupts are
//! masked while the lock is held, which matters for locks that can be
//! taken from interrupt context (the task list, the buddy free lists).

pub mod once;

use core::{
	cell::UnsafeCell,
	fmt,
	fmt::Formatter,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering::Acquire, Ordering::Release},
};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn interrupts_enabled() -> bool {
	let flags: usize;
	unsafe {
		core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(nomem, preserves_flags));
	}
	flags & 0x200 != 0
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn cli() {
	unsafe {
		core::arch::asm!("cli", options(nomem, nostack));
	}
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn sti() {
	unsafe {
		core::arch::asm!("sti", options(nomem, nostack));
	}
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline(always)]
fn interrupts_enabled() -> bool {
	false
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline(always)]
fn cli() {}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline(always)]
fn sti() {}

/// Releases the associated lock when dropped.
pub struct SpinGuard<'m, T: ?Sized, const INT: bool> {
	spin: &'m Spin<T, INT>,
	/// Interrupt state observed before locking. Only meaningful when `INT == false`.
	int_state: bool,
}

impl<T: ?Sized, const INT: bool> Deref for SpinGuard<'_, T, INT> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.spin.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> DerefMut for SpinGuard<'_, T, INT> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		unsafe { &mut *self.spin.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> !Send for SpinGuard<'_, T, INT> {}

unsafe impl<T: ?Sized + Sync, const INT: bool> Sync for SpinGuard<'_, T, INT> {}

impl<T: ?Sized + fmt::Debug, const INT: bool> fmt::Debug for SpinGuard<'_, T, INT> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self.deref(), f)
	}
}

impl<T: ?Sized, const INT: bool> Drop for SpinGuard<'_, T, INT> {
	fn drop(&mut self) {
		unsafe {
			self.spin.unlock(self.int_state);
		}
	}
}

/// A spinlock guarding `T`.
///
/// `INT` tells whether interrupts stay enabled while the lock is held. The
/// default, `true`, leaves interrupts alone; set it to `false` to mask
/// interrupts for the duration of the critical section (see [`IntMutex`]).
pub struct Spin<T: ?Sized, const INT: bool = true> {
	lock: AtomicBool,
	data: UnsafeCell<T>,
}

impl<T, const INT: bool> Spin<T, INT> {
	/// Creates a new instance wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			lock: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: Default, const INT: bool> Default for Spin<T, INT> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized, const INT: bool> Spin<T, INT> {
	/// Acquires the lock, spinning until it becomes available.
	pub fn lock(&self) -> SpinGuard<T, INT> {
		let int_state = if !INT {
			let enabled = interrupts_enabled();
			cli();
			enabled
		} else {
			false
		};
		while self.lock.swap(true, Acquire) {
			hint::spin_loop();
		}
		SpinGuard {
			spin: self,
			int_state,
		}
	}

	/// Releases the lock. Called automatically when the guard drops.
	///
	/// # Safety
	///
	/// Must only be called once, by the guard that currently holds the lock.
	unsafe fn unlock(&self, int_state: bool) {
		self.lock.store(false, Release);
		if !INT && int_state {
			sti();
		}
	}
}

unsafe impl<T: ?Sized, const INT: bool> Sync for Spin<T, INT> {}

impl<T: ?Sized + fmt::Debug, const INT: bool> fmt::Debug for Spin<T, INT> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.lock(), f)
	}
}

/// A plain spinlock: interrupts are left as-is while held.
///
/// Used for locks never taken from interrupt context, e.g. a slab cache's
/// per-cache lock.
pub type Mutex<T> = Spin<T, true>;
/// Alias of [`SpinGuard`] for [`Mutex`].
pub type MutexGuard<'m, T> = SpinGuard<'m, T, true>;

/// An interrupt-masking spinlock.
///
/// Used for locks that may be taken from interrupt context, e.g. the task
/// list lock and the buddy allocator's free-list lock (§5).
pub type IntMutex<T> = Spin<T, false>;
/// Alias of [`SpinGuard`] for [`IntMutex`].
pub type IntMutexGuard<'m, T> = SpinGuard<'m, T, false>;
