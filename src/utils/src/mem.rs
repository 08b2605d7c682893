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

extern crate libc;

/// secured memory operations: malloc, memzero, free
pub extern crate memsec;

use Address;
use ByteSize;
use std::ptr;

#[cfg(target_os = "macos")]
fn mmap_flags() -> libc::c_int {
    libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE
}
#[cfg(target_os = "linux")]
fn mmap_flags() -> libc::c_int {
    libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_NORESERVE
}

/// maps a zero-filled region of the given size, panicking on failure.
/// Use try_mmap_large() when the caller has a fallback.
pub fn mmap_large(size: ByteSize) -> Address {
    match try_mmap_large(size) {
        Some(addr) => addr,
        None => panic!("failed to mmap {} bytes", size)
    }
}

/// maps a zero-filled region of the given size, None if the platform
/// cannot provide the range
pub fn try_mmap_large(size: ByteSize) -> Option<Address> {
    use self::libc::*;

    let ret = unsafe {
        mmap(
            ptr::null_mut(),
            size as size_t,
            PROT_READ | PROT_WRITE,
            mmap_flags(),
            -1,
            0
        )
    };

    if ret == MAP_FAILED {
        None
    } else {
        Some(Address::from_mut_ptr(ret))
    }
}

pub fn munmap(addr: Address, size: ByteSize) {
    use self::libc::*;
    unsafe {
        munmap(addr.to_ptr_mut() as *mut c_void, size as size_t);
    }
}

/// malloc's and zeroes the memory
pub unsafe fn malloc_zero(size: usize) -> *mut u8 {
    use self::memsec;
    match memsec::malloc(size) {
        Some(ptr) => {
            memsec::memzero(ptr, size);
            ptr
        }
        None => panic!("failed to malloc_zero() {} bytes", size)
    }
}

/// frees memory from malloc_zero()
pub unsafe fn free(ptr: *mut u8) {
    use self::memsec;
    memsec::free(ptr);
}
