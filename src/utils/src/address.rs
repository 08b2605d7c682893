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

use std::fmt;
use std::mem;
use std::ops::{Add, Sub};
use std::ptr;

use ByteOffset;
use ByteSize;
use Word;

/// Address is a word that may or may not point at valid memory. All pointer
/// arithmetic in the heap core goes through this type so that raw pointer
/// manipulation is confined to this module.
#[repr(C)]
#[derive(Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Address(Word);

impl Address {
    /// an address of zero. Unsafe: the result must not be dereferenced,
    /// it only serves as an initialization/sentinel value.
    pub unsafe fn zero() -> Address {
        Address(0)
    }

    #[inline(always)]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn from_usize(raw: Word) -> Address {
        Address(raw)
    }

    #[inline(always)]
    pub fn as_usize(&self) -> Word {
        self.0
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as Word)
    }

    #[inline(always)]
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as Word)
    }

    #[inline(always)]
    pub fn to_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    #[inline(always)]
    pub fn to_ptr_mut<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    #[inline(always)]
    pub fn align_up(&self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address((self.0 + align - 1) & !(align - 1))
    }

    #[inline(always)]
    pub fn align_down(&self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address(self.0 & !(align - 1))
    }

    #[inline(always)]
    pub fn is_aligned_to(&self, align: ByteSize) -> bool {
        self.0 % align == 0
    }

    #[inline(always)]
    pub fn mask(&self, mask: Word) -> Address {
        Address(self.0 & mask)
    }

    #[inline(always)]
    pub fn offset(&self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as Word)
    }

    /// loads a value of type T at this address
    #[inline(always)]
    pub unsafe fn load<T: Copy>(&self) -> T {
        *(self.0 as *const T)
    }

    /// stores a value of type T at this address
    #[inline(always)]
    pub unsafe fn store<T: Copy>(&self, value: T) {
        *(self.0 as *mut T) = value;
    }

    pub unsafe fn memset(&self, char: u8, length: ByteSize) {
        ptr::write_bytes::<u8>(self.0 as *mut u8, char, length);
    }

    /// copies `length` bytes from `src` to this address. The ranges must
    /// not overlap.
    pub unsafe fn memcpy(&self, src: Address, length: ByteSize) {
        ptr::copy_nonoverlapping::<u8>(src.to_ptr(), self.0 as *mut u8, length);
    }

    /// copies `length` bytes from `src` to this address, ranges may overlap
    pub unsafe fn memmove(&self, src: Address, length: ByteSize) {
        ptr::copy::<u8>(src.to_ptr(), self.0 as *mut u8, length);
    }

    /// converts the address to an ObjectReference. Unsafe: the caller
    /// guarantees an initialized object header sits at this address.
    #[inline(always)]
    pub unsafe fn to_object_reference(&self) -> ObjectReference {
        mem::transmute(self.0)
    }

    pub fn diff(&self, another: Address) -> ByteSize {
        debug_assert!(self.0 >= another.0, "for a.diff(b), a needs to be larger than b");
        self.0 - another.0
    }
}

impl Add<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn add(self, bytes: ByteSize) -> Address {
        Address(self.0 + bytes)
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    #[inline(always)]
    fn sub(self, bytes: ByteSize) -> Address {
        Address(self.0 - bytes)
    }
}

impl Sub<Address> for Address {
    type Output = ByteSize;
    #[inline(always)]
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(self.0 >= other.0);
        self.0 - other.0
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// ObjectReference is a handle to a heap object. Outside the object model
/// it is fully opaque: nothing but the object model may resolve it to an
/// address and read through it, which is what allows a compacting collector
/// to relocate the referent.
#[repr(C)]
#[derive(Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct ObjectReference(Word);

impl ObjectReference {
    /// the null reference; also the "dead" sentinel a cleared weak
    /// reference reads as
    pub fn null() -> ObjectReference {
        ObjectReference(0)
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn to_address(&self) -> Address {
        Address(self.0)
    }

    pub fn value(&self) -> Word {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        let addr = Address::from_usize(0x1001);
        assert_eq!(addr.align_up(8), Address::from_usize(0x1008));
        assert_eq!(addr.align_up(1), addr);
        assert!(Address::from_usize(0x1000).is_aligned_to(8));
        assert!(!addr.is_aligned_to(8));
    }

    #[test]
    fn test_arithmetic() {
        let a = Address::from_usize(0x1000);
        let b = a + 24usize;
        assert_eq!(b - a, 24);
        assert_eq!(b.offset(-8), a + 16usize);
        assert_eq!(b.diff(a), 24);
    }

    #[test]
    fn test_load_store() {
        let mut slot: u64 = 0;
        let addr = Address::from_mut_ptr(&mut slot as *mut u64);
        unsafe {
            addr.store::<u64>(0xdead_beef);
            assert_eq!(addr.load::<u64>(), 0xdead_beef);
        }
    }
}
