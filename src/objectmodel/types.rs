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

use objectmodel::check_alignment;
use objectmodel::MINIMAL_ALIGNMENT;
use utils::ByteSize;
use utils::POINTER_SIZE;

/// index into the executable-embedded object type table
pub type TypeIndex = u32;

/// payload offset of a weak node's referent slot
pub const WEAK_REFERENT_OFFSET: ByteSize = 0;
/// payload offset of a weak node's ledger link word (collector-owned, not a
/// traced field)
pub const WEAK_LINK_OFFSET: ByteSize = POINTER_SIZE;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// plain object: fields at the listed offsets are objptrs
    Normal,
    /// weak node: word 0 is the weakly-held referent, word 1 the ledger link
    Weak
}

/// one row of the object type table: everything the traversal engine needs
/// to discover the outgoing pointers of an object of this type. The table
/// is fixed by the compiler at process start and read-only afterwards.
#[derive(Clone, Debug)]
pub struct ObjectType {
    pub kind: ObjectKind,
    /// payload bytes, a multiple of the minimal alignment
    pub size: ByteSize,
    /// payload offsets of objptr-valued slots, in increasing order
    pub ref_offsets: Vec<ByteSize>,
    pub alignment: ByteSize
}

impl ObjectType {
    pub fn new(size: ByteSize, ref_offsets: Vec<ByteSize>) -> ObjectType {
        ObjectType {
            kind: ObjectKind::Normal,
            size,
            ref_offsets,
            alignment: MINIMAL_ALIGNMENT
        }
    }

    pub fn new_noref(size: ByteSize) -> ObjectType {
        ObjectType::new(size, vec![])
    }

    /// a repeating all-pointer layout, `count` objptr slots
    pub fn new_refarray(count: usize) -> ObjectType {
        ObjectType::new(
            count * POINTER_SIZE,
            (0..count).map(|i| i * POINTER_SIZE).collect()
        )
    }

    pub fn new_weak() -> ObjectType {
        ObjectType {
            kind: ObjectKind::Weak,
            size: 2 * POINTER_SIZE,
            ref_offsets: vec![WEAK_REFERENT_OFFSET],
            alignment: MINIMAL_ALIGNMENT
        }
    }

    /// checks the invariants the traversal engine relies on; used when the
    /// embedding runtime hands the table over
    pub fn validate(&self) -> Result<(), String> {
        if self.size % MINIMAL_ALIGNMENT != 0 || self.size == 0 {
            return Err(format!(
                "object size {} is not a positive multiple of {}",
                self.size, MINIMAL_ALIGNMENT
            ));
        }
        if check_alignment(self.alignment) != self.alignment {
            return Err(format!("alignment {} below minimum", self.alignment));
        }
        let mut last = None;
        for &off in self.ref_offsets.iter() {
            if off % POINTER_SIZE != 0 || off + POINTER_SIZE > self.size {
                return Err(format!("ref offset {} outside payload of {}", off, self.size));
            }
            if let Some(prev) = last {
                if off <= prev {
                    return Err(format!("ref offsets not strictly increasing at {}", off));
                }
            }
            last = Some(off);
        }
        if self.kind == ObjectKind::Weak {
            if self.size < 2 * POINTER_SIZE || self.ref_offsets != vec![WEAK_REFERENT_OFFSET] {
                return Err("weak type must be (referent, link) with one traced slot".to_string());
            }
        }
        Ok(())
    }
}
