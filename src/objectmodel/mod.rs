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

//! Object model: the one-word header that precedes every heap object, and
//! the read-only type table that describes object field layouts.
//!
//! An `ObjectReference` points at the first payload word; the header sits
//! one word before it. Nothing outside this module reads or writes headers.

use utils::bit_utils;
use utils::Address;
use utils::ObjectReference;
use utils::ByteOffset;
use utils::ByteSize;

mod types;
pub mod hashcons;

pub use self::types::ObjectKind;
pub use self::types::ObjectType;
pub use self::types::TypeIndex;
pub use self::types::WEAK_REFERENT_OFFSET;
pub use self::types::WEAK_LINK_OFFSET;

pub const MINIMAL_ALIGNMENT: ByteSize = 8;

pub const OBJECT_HEADER_SIZE: ByteSize = 8;
pub const OBJECT_HEADER_OFFSET: ByteOffset = -(OBJECT_HEADER_SIZE as ByteOffset);

/// * one word (64 bits) header, before the object reference
///
/// normal object
/// | mark (1) | fwd=0 (1) | weak cleared (1) | unused (29) | type index (32) |
///
/// forwarded object (only during a collection, at the old location)
/// | unused (1) | fwd=1 (1) | new address (62)                               |
pub const BIT_IS_MARKED: usize = 63;
pub const BIT_IS_FORWARDED: usize = 62;
pub const BIT_WEAK_CLEARED: usize = 61;

pub const MASK_TYPE_INDEX: u64 = 0xFFFF_FFFFu64;
pub const MASK_FORWARDING_ADDRESS: u64 = (1u64 << BIT_WEAK_CLEARED) - 1;

#[inline(always)]
fn header_addr(obj: ObjectReference) -> Address {
    obj.to_address().offset(OBJECT_HEADER_OFFSET)
}

#[inline(always)]
pub fn init_header(obj: ObjectReference, ty: TypeIndex) {
    unsafe { header_addr(obj).store::<u64>(ty as u64) }
}

#[inline(always)]
pub fn get_type_index(obj: ObjectReference) -> TypeIndex {
    let hdr = unsafe { header_addr(obj).load::<u64>() };
    debug_assert!(
        !bit_utils::test_nth_bit_u64(hdr, BIT_IS_FORWARDED, 1),
        "reading type index of a forwarded object {}",
        obj
    );
    (hdr & MASK_TYPE_INDEX) as TypeIndex
}

#[inline(always)]
pub fn is_marked(obj: ObjectReference) -> bool {
    let hdr = unsafe { header_addr(obj).load::<u64>() };
    bit_utils::test_nth_bit_u64(hdr, BIT_IS_MARKED, 1)
}

#[inline(always)]
pub fn set_marked(obj: ObjectReference, mark: bool) {
    let addr = header_addr(obj);
    let hdr = unsafe { addr.load::<u64>() };
    let hdr = bit_utils::set_nth_bit_u64(hdr, BIT_IS_MARKED, mark as u8);
    unsafe { addr.store::<u64>(hdr) }
}

#[inline(always)]
pub fn is_forwarded(obj: ObjectReference) -> bool {
    let hdr = unsafe { header_addr(obj).load::<u64>() };
    bit_utils::test_nth_bit_u64(hdr, BIT_IS_FORWARDED, 1)
}

/// overwrites the header at the old location with a forwarding reference.
/// The object bytes must already have been copied out: the type index is
/// destroyed by this store.
#[inline(always)]
pub fn set_forwarding(obj: ObjectReference, to: ObjectReference) {
    debug_assert!(!is_forwarded(obj));
    let hdr = (1u64 << BIT_IS_FORWARDED) | (to.value() as u64);
    unsafe { header_addr(obj).store::<u64>(hdr) }
}

#[inline(always)]
pub fn get_forwarding(obj: ObjectReference) -> ObjectReference {
    let hdr = unsafe { header_addr(obj).load::<u64>() };
    debug_assert!(bit_utils::test_nth_bit_u64(hdr, BIT_IS_FORWARDED, 1));
    unsafe { Address::from_usize((hdr & MASK_FORWARDING_ADDRESS) as usize).to_object_reference() }
}

#[inline(always)]
pub fn is_weak_cleared(obj: ObjectReference) -> bool {
    let hdr = unsafe { header_addr(obj).load::<u64>() };
    bit_utils::test_nth_bit_u64(hdr, BIT_WEAK_CLEARED, 1)
}

/// the Live -> Cleared transition of a weak node: flips the header state
/// and nulls the referent slot in one place, so no caller can observe a
/// half-cleared node
#[inline(always)]
pub fn set_weak_cleared(obj: ObjectReference) {
    let addr = header_addr(obj);
    let hdr = unsafe { addr.load::<u64>() };
    let hdr = bit_utils::set_nth_bit_u64(hdr, BIT_WEAK_CLEARED, 1);
    unsafe {
        addr.store::<u64>(hdr);
        (obj.to_address() + WEAK_REFERENT_OFFSET).store::<ObjectReference>(ObjectReference::null());
    }
}

#[inline(always)]
pub fn check_alignment(align: ByteSize) -> ByteSize {
    if align < MINIMAL_ALIGNMENT {
        MINIMAL_ALIGNMENT
    } else {
        align
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::Address;

    fn fake_object(storage: &mut [u64; 4]) -> ObjectReference {
        let base = Address::from_mut_ptr(storage.as_mut_ptr());
        unsafe { (base + OBJECT_HEADER_SIZE).to_object_reference() }
    }

    #[test]
    fn test_header_roundtrip() {
        let mut storage = [0u64; 4];
        let obj = fake_object(&mut storage);

        init_header(obj, 17);
        assert_eq!(get_type_index(obj), 17);
        assert!(!is_marked(obj));
        assert!(!is_forwarded(obj));

        set_marked(obj, true);
        assert!(is_marked(obj));
        assert_eq!(get_type_index(obj), 17);

        set_marked(obj, false);
        assert!(!is_marked(obj));
    }

    #[test]
    fn test_forwarding() {
        let mut storage = [0u64; 4];
        let mut target = [0u64; 4];
        let obj = fake_object(&mut storage);
        let new_obj = fake_object(&mut target);

        init_header(obj, 3);
        set_forwarding(obj, new_obj);
        assert!(is_forwarded(obj));
        assert_eq!(get_forwarding(obj), new_obj);
    }

    #[test]
    fn test_weak_cleared() {
        let mut storage = [0u64; 4];
        let obj = fake_object(&mut storage);

        init_header(obj, 5);
        // plant a referent in slot 0
        storage[1] = 0xdead0;
        assert!(!is_weak_cleared(obj));

        set_weak_cleared(obj);
        assert!(is_weak_cleared(obj));
        assert_eq!(storage[1], 0);
    }
}
