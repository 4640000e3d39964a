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

//! Utility crate shared by the kernel and its build scripts.
//!
//! This crate has no dependency on the kernel crate itself: it provides the
//! primitives (error taxonomy, locks, fallible collections, math helpers)
//! the kernel builds its memory and scheduling substrate on top of.

#![cfg_attr(not(feature = "std"), no_std)]
#![feature(allocator_api)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]

extern crate alloc;

pub mod collections;
pub mod errno;
pub mod limits;
pub mod lock;
pub mod math;
pub mod ptr;

/// Trait for fallible cloning, mirroring [`Clone`] but allowing allocation
/// failure to be reported instead of aborting.
pub trait TryClone: Sized {
	/// The error type returned on failure.
	type Error;

	/// Attempts to clone `self`, returning an error on allocation failure.
	fn try_clone(&self) -> Result<Self, Self::Error>;
}
