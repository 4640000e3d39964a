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

//! This crate implements derive macros for the Maestro kernel.

#![deny(warnings)]

extern crate proc_macro;

mod allocator;

use proc_macro::TokenStream;

/// Attribute macro wrapping an allocator entry point (`name = ..., op = alloc|realloc|free, ptr
/// = ..., size = ..., scale = linear|log2`) with a call to the memory tracer, compiled out
/// unless the `memtrace` feature is enabled.
#[proc_macro_attribute]
pub fn instrument_allocator(metadata: TokenStream, input: TokenStream) -> TokenStream {
	allocator::instrument_allocator(metadata, input)
}
