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

//! The weak-reference ledger: a singly linked list threaded through the
//! link word of every live weak node. Nodes are linked at allocation and
//! relinked during every major mark; a sweep after the major traversal
//! clears nodes whose referent did not survive.

use objectmodel;
use objectmodel::WEAK_LINK_OFFSET;
use objectmodel::WEAK_REFERENT_OFFSET;
use utils::Address;
use utils::ObjectReference;

/// what the sweep decided for one referent
pub enum WeakFate {
    /// referent survived, possibly relocated
    Keep(ObjectReference),
    /// referent is unreachable: Live -> Cleared
    Clear
}

#[inline(always)]
fn link_slot(weak: ObjectReference) -> Address {
    weak.to_address() + WEAK_LINK_OFFSET
}

#[inline(always)]
fn referent_slot(weak: ObjectReference) -> Address {
    weak.to_address() + WEAK_REFERENT_OFFSET
}

/// prepends `weak` to the ledger
pub fn link(head: &mut ObjectReference, weak: ObjectReference) {
    unsafe { link_slot(weak).store::<ObjectReference>(*head) };
    *head = weak;
}

/// the nodes currently on the ledger, head first
pub fn nodes(head: ObjectReference) -> Vec<ObjectReference> {
    let mut ret = vec![];
    let mut cur = head;
    while !cur.is_null() {
        ret.push(cur);
        cur = unsafe { link_slot(cur).load::<ObjectReference>() };
    }
    ret
}

/// walks the ledger once and applies `fate` to every uncleared referent.
/// Nodes stay on the list either way: clearing is a payload transition,
/// removal is a separate mutator-visible operation.
pub fn sweep<F: FnMut(ObjectReference) -> WeakFate>(head: ObjectReference, mut fate: F) {
    let mut cleared = 0usize;
    let mut kept = 0usize;

    for node in nodes(head) {
        let referent = unsafe { referent_slot(node).load::<ObjectReference>() };
        if referent.is_null() {
            continue;
        }
        match fate(referent) {
            WeakFate::Keep(new_referent) => {
                kept += 1;
                unsafe { referent_slot(node).store::<ObjectReference>(new_referent) };
            }
            WeakFate::Clear => {
                cleared += 1;
                objectmodel::set_weak_cleared(node);
            }
        }
    }

    debug!("weak sweep: {} kept, {} cleared", kept, cleared);
}

/// rewrites the head and every link word through `translate`; used after
/// the heap's backing store moved wholesale
pub fn translate_links<F: Fn(ObjectReference) -> ObjectReference>(
    head: &mut ObjectReference,
    translate: F
) {
    *head = translate(*head);
    let mut cur = *head;
    while !cur.is_null() {
        let next = unsafe { link_slot(cur).load::<ObjectReference>() };
        let next = translate(next);
        unsafe { link_slot(cur).store::<ObjectReference>(next) };
        cur = next;
    }
}

/// after a minor collection: promoted nodes moved, dead nursery nodes must
/// leave the ledger. Rebuilds the list in order from the survivors.
/// `survivor` maps an old node address to its current one (None = dead).
pub fn relink_after_minor<F: Fn(ObjectReference) -> Option<ObjectReference>>(
    head: &mut ObjectReference,
    survivor: F
) {
    let mut survivors = vec![];
    let mut cur = *head;
    while !cur.is_null() {
        // the old copy of a moved node is intact until the nursery is
        // reset, so its link word is still readable here
        let next = unsafe { link_slot(cur).load::<ObjectReference>() };
        if let Some(new_node) = survivor(cur) {
            survivors.push(new_node);
        }
        cur = next;
    }

    *head = ObjectReference::null();
    for &node in survivors.iter().rev() {
        link(head, node);
    }

    debug!("weak ledger relinked: {} nodes survive the minor gc", survivors.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectmodel;
    use objectmodel::OBJECT_HEADER_SIZE;
    use utils::Address;

    // weak nodes faked on the Rust heap: [header, referent, link]
    fn fake_weak(storage: &mut Vec<[u64; 3]>, i: usize) -> ObjectReference {
        let base = Address::from_mut_ptr(&mut storage[i] as *mut [u64; 3]);
        let obj = unsafe { (base + OBJECT_HEADER_SIZE).to_object_reference() };
        objectmodel::init_header(obj, 0);
        obj
    }

    #[test]
    fn test_link_order() {
        let mut storage = vec![[0u64; 3]; 3];
        let mut head = ObjectReference::null();

        let a = fake_weak(&mut storage, 0);
        let b = fake_weak(&mut storage, 1);
        let c = fake_weak(&mut storage, 2);

        link(&mut head, a);
        link(&mut head, b);
        link(&mut head, c);

        assert_eq!(nodes(head), vec![c, b, a]);
    }

    #[test]
    fn test_sweep_clears_and_keeps() {
        let mut storage = vec![[0u64; 3]; 2];
        let mut head = ObjectReference::null();

        let dead = Address::from_usize(0xd0d0).as_usize();
        let live = Address::from_usize(0xa1a0).as_usize();

        let a = fake_weak(&mut storage, 0);
        let b = fake_weak(&mut storage, 1);
        link(&mut head, a);
        link(&mut head, b);

        unsafe {
            referent_slot(a).store::<usize>(dead);
            referent_slot(b).store::<usize>(live);
        }

        let moved = Address::from_usize(0xb1b0);
        sweep(head, |referent| {
            if referent.to_address().as_usize() == live {
                WeakFate::Keep(unsafe { moved.to_object_reference() })
            } else {
                WeakFate::Clear
            }
        });

        assert!(objectmodel::is_weak_cleared(a));
        assert_eq!(
            unsafe { referent_slot(a).load::<ObjectReference>() },
            ObjectReference::null()
        );
        assert!(!objectmodel::is_weak_cleared(b));
        assert_eq!(
            unsafe { referent_slot(b).load::<ObjectReference>() }.to_address(),
            moved
        );
    }

    #[test]
    fn test_relink_drops_dead_nodes() {
        let mut storage = vec![[0u64; 3]; 3];
        let mut head = ObjectReference::null();

        let a = fake_weak(&mut storage, 0);
        let b = fake_weak(&mut storage, 1);
        let c = fake_weak(&mut storage, 2);
        link(&mut head, a);
        link(&mut head, b);
        link(&mut head, c);

        // b dies, a and c survive in place
        relink_after_minor(&mut head, |node| if node == b { None } else { Some(node) });

        assert_eq!(nodes(head), vec![c, a]);
    }
}
