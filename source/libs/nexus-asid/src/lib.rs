// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded hardware context (ASID) allocator with round-robin stealing
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, proptest sequences (tests_prop.rs), tests/ suite
//! PUBLIC API: ContextAllocator, AddressSpace, Processor, Mmu, AllocatorConfig
//! DEPENDS_ON: spin::Mutex (allocator lock), log, thiserror, serde (+toml with `std`)
//! INVARIANTS: ID free iff unowned; free_count == free IDs; context 0 never handed out;
//!             invalidation precedes re-binding of an ID
//!
//! Address spaces receive one of a fixed number of hardware context IDs the
//! first time they are scheduled. When every ID is taken, the allocator steals
//! the ID under its rotating cursor from the current holder, flushing the
//! holder's translations before the new owner may use it.
//!
//! ```
//! use std::sync::Arc;
//! use nexus_asid::{AddressSpace, AllocatorConfig, ContextAllocator, CpuId, NoopMmu, Processor};
//!
//! let alloc = ContextAllocator::new(AllocatorConfig::default(), NoopMmu).unwrap();
//! let space = AddressSpace::new(0x8020_0000);
//! let mut cpu = Processor::new(CpuId::BOOT);
//! let ctx = alloc.bind_for_execution(&space, &mut cpu);
//! assert_eq!(space.context(), Some(ctx));
//! alloc.unbind_from_execution(&space, &cpu);
//! alloc.release(&space);
//! assert_eq!(space.context(), None);
//! # let _ = Arc::clone(&space);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(missing_docs)]

extern crate alloc;

mod allocator;
mod config;
mod cpu;
mod error;
mod map;
mod mmu;
mod space;
mod types;

#[cfg(feature = "backend-host")]
pub mod host;

#[cfg(test)]
mod tests_prop;

pub use allocator::{AllocatorStats, ContextAllocator};
pub use config::{AllocatorConfig, VictimPolicy, MAX_CPUS};
pub use cpu::{Processor, ProcessorView};
pub use error::{ConfigError, Violation};
pub use mmu::{Mmu, NoopMmu};
pub use space::AddressSpace;
pub use types::{ContextId, CpuId, FIRST_CONTEXT, KERNEL_CONTEXT, LAST_CONTEXT};
