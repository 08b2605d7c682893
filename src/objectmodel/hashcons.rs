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

//! Hash-consing seam. Structural deduplication of immutable objects is a
//! pluggable post-mark pass: the collector plumbs the `should_hash_cons`
//! flag through the mark state and offers each live object to the installed
//! `HashConser` after a major mark, but ships only the disabled
//! implementation.

use objectmodel::ObjectType;
use utils::ObjectReference;

pub trait HashConser {
    /// offered each live object once per major collection; returns the
    /// canonical object to share with, or None to keep `obj` as is
    fn try_share(&mut self, obj: ObjectReference, ty: &ObjectType) -> Option<ObjectReference>;
}

/// hash-consing disabled; every object is its own canonical representative
pub struct NoHashCons;

impl HashConser for NoHashCons {
    fn try_share(&mut self, _obj: ObjectReference, _ty: &ObjectType) -> Option<ObjectReference> {
        None
    }
}
