// Copyright 2017 The Australian National University
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Utility crate that serves the runtime heap core
//!
//! It includes:
//!
//! * Address/ObjectReference type
//! * utility functions for
//!   * memory
//!   * mathematics
//!   * bit operations

// these type aliases make source code easier to read

/// size in bits
pub type BitSize = usize;
/// size in bytes
pub type ByteSize = usize;
/// offset in bytes
pub type ByteOffset = isize;
/// word value
pub type Word = usize;

/// the collector assumes a 64 bits architecture
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub const LOG_POINTER_SIZE: usize = 3;

/// pointer size in bytes
pub const POINTER_SIZE: ByteSize = 1 << LOG_POINTER_SIZE;
/// word size in bytes
pub const WORD_SIZE: ByteSize = 1 << LOG_POINTER_SIZE;

/// print trace!() log if condition is true (the condition should be a
/// constant boolean)
#[macro_export]
macro_rules! trace_if {
    ($cond: expr, $($arg:tt)*) => {
        if $cond {
            trace!($($arg)*)
        }
    }
}

/// mem module:
/// * mmap/munmap for backing stores
/// * zeroed malloc for side tables
pub mod mem;

/// mathematics utilities
pub mod math;

/// bit operations
pub mod bit_utils;

mod address;
/// Address represents an arbitrary memory address (valid or not)
pub use address::Address;
/// ObjectReference is an opaque handle to a heap object (the address is
/// guaranteed to point at an initialized object header)
pub use address::ObjectReference;
