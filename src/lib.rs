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

//! A generational garbage collector for a compiled ML-family runtime.
//!
//! The heap is one contiguous range with an old generation and a nursery;
//! the mutator bump-allocates in the nursery. Minor collections evacuate
//! live nursery objects into the old generation, guided by a card-marking
//! write barrier. Major collections copy the whole live set into a fresh
//! heap, or compact in place when no second heap can be mapped. Everything
//! runs single-threaded with the world stopped; there is no global
//! collector instance, the embedding runtime owns an explicit [`state::Gc`]
//! value.

#[macro_use]
extern crate utils;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate stderrlog;
#[macro_use]
extern crate field_offset;
extern crate time;

pub mod common;
pub mod objectmodel;
pub mod heap;
pub mod roots;
pub mod weak;
pub mod state;

pub use heap::gc::CollectionKind;
pub use heap::gc::Phase;
pub use state::Gc;
pub use state::GcConfig;
pub use state::RuntimeTables;
pub use utils::Address;
pub use utils::ObjectReference;

use log::Level;

pub fn start_logging_trace() {
    start_logging_internal(Level::Trace)
}

pub fn start_logging(level: Level) {
    start_logging_internal(level)
}

fn start_logging_internal(level: Level) {
    let verbose = match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4
    };

    match stderrlog::new().verbosity(verbose).init() {
        Ok(()) => info!("logger initialized"),
        Err(e) => debug!("failed to init logger, probably already initialized: {:?}", e)
    }
}
