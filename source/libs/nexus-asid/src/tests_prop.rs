// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the context allocator
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no allocator logic. Drives random acquire/release/bind/unbind sequences.
//!
//! TEST_SCOPE:
//!   - Uniqueness and boundedness of assigned contexts
//!   - Bitmap / owner table / free count consistency after every step
//!   - Idempotent re-acquire, release returning exactly one context
//!   - Running spaces keep their context under the skip-active policy
//!   - No stale translations observed by the simulated MMU
//!
//! TEST_SCENARIOS:
//!   - random_sequences_keep_invariants(): every step leaves verify() clean and contexts unique
//!   - skip_active_never_strands_running_space(): running spaces always hold a context
//!   - steals_never_expose_stale_translations(): RecordingMmu sees zero stale loads and,
//!     under skip-active, no flush of a running space

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::collections::BTreeSet;

use proptest::prelude::*;

use crate::{
    AddressSpace, AllocatorConfig, ContextAllocator, CpuId, Mmu, NoopMmu, Processor, VictimPolicy,
};

const SPACES: usize = 8;
const CPUS: u16 = 2;

#[derive(Clone, Copy, Debug)]
enum Op {
    Acquire(usize),
    Release(usize),
    Run(usize, u16),
    Stop(u16),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SPACES).prop_map(Op::Acquire),
        (0..SPACES).prop_map(Op::Release),
        (0..SPACES, 0..CPUS).prop_map(|(space, cpu)| Op::Run(space, cpu)),
        (0..CPUS).prop_map(Op::Stop),
    ]
}

fn arb_policy() -> impl Strategy<Value = VictimPolicy> {
    prop_oneof![Just(VictimPolicy::RoundRobin), Just(VictimPolicy::SkipActive)]
}

struct Harness<M: Mmu> {
    alloc: ContextAllocator<M>,
    spaces: Vec<Arc<AddressSpace>>,
    cpus: Vec<Processor>,
    running: Vec<Option<usize>>,
}

impl<M: Mmu> Harness<M> {
    fn new(first: u16, last: u16, policy: VictimPolicy, mmu: M) -> Self {
        let cfg = AllocatorConfig::with_range(first, last)
            .max_cpus(usize::from(CPUS))
            .victim_policy(policy);
        Self {
            alloc: ContextAllocator::new(cfg, mmu).unwrap(),
            spaces: (0..SPACES).map(|i| AddressSpace::new(i * 0x1000)).collect(),
            cpus: (0..CPUS).map(|c| Processor::new(CpuId::from_raw(c))).collect(),
            running: vec![None; CPUS as usize],
        }
    }

    fn apply(&mut self, op: Op) -> Result<(), TestCaseError> {
        match op {
            Op::Acquire(i) => {
                let space = &self.spaces[i];
                let ctx = self.alloc.acquire(space);
                let free = self.alloc.free_count();
                let cursor = self.alloc.cursor();
                prop_assert_eq!(self.alloc.acquire(space), ctx);
                prop_assert_eq!(self.alloc.free_count(), free);
                prop_assert_eq!(self.alloc.cursor(), cursor);
                prop_assert_eq!(space.context(), Some(ctx));
            }
            Op::Release(i) => {
                let space = &self.spaces[i];
                if space.is_active() {
                    return Ok(());
                }
                let held = space.context().is_some();
                let before = self.alloc.free_count();
                self.alloc.release(space);
                prop_assert_eq!(space.context(), None);
                prop_assert_eq!(self.alloc.free_count(), before + usize::from(held));
            }
            Op::Run(i, c) => {
                let cpu = &mut self.cpus[c as usize];
                let prev = self.running[c as usize].map(|p| &self.spaces[p]);
                let ctx = self.alloc.switch_mm(cpu, prev, &self.spaces[i]);
                self.running[c as usize] = Some(i);
                prop_assert_eq!(self.spaces[i].context(), Some(ctx));
                prop_assert!(self.spaces[i].is_active_on(cpu.id()));
            }
            Op::Stop(c) => {
                if let Some(p) = self.running[c as usize].take() {
                    self.alloc.unbind_from_execution(&self.spaces[p], &self.cpus[c as usize]);
                }
            }
        }
        self.check()
    }

    fn check(&self) -> Result<(), TestCaseError> {
        prop_assert_eq!(self.alloc.verify(), Ok(()));
        let assigned: Vec<_> = self.spaces.iter().filter_map(|space| space.context()).collect();
        let unique: BTreeSet<_> = assigned.iter().copied().collect();
        prop_assert_eq!(unique.len(), assigned.len());
        prop_assert!(assigned.len() <= self.alloc.capacity());
        prop_assert!(assigned.iter().all(|ctx| !ctx.is_kernel()));
        prop_assert_eq!(self.alloc.free_count() + assigned.len(), self.alloc.capacity());
        for ctx in &assigned {
            let owner = self.alloc.owner_of(*ctx);
            prop_assert!(owner.is_some_and(|owner| owner.context() == Some(*ctx)));
        }
        Ok(())
    }
}

proptest! {
    #[test]
    fn random_sequences_keep_invariants(
        last in 3u16..=6,
        policy in arb_policy(),
        ops in proptest::collection::vec(arb_op(), 1..64),
    ) {
        let mut harness = Harness::new(1, last, policy, NoopMmu);
        for op in ops {
            harness.apply(op)?;
        }
    }

    #[test]
    fn skip_active_never_strands_running_space(
        last in 3u16..=6,
        ops in proptest::collection::vec(arb_op(), 1..64),
    ) {
        let mut harness = Harness::new(1, last, VictimPolicy::SkipActive, NoopMmu);
        for op in ops {
            harness.apply(op)?;
            for running in harness.running.iter().flatten() {
                prop_assert!(harness.spaces[*running].context().is_some());
            }
        }
    }
}

#[cfg(feature = "backend-host")]
proptest! {
    #[test]
    fn steals_never_expose_stale_translations(
        last in 3u16..=5,
        policy in arb_policy(),
        ops in proptest::collection::vec(arb_op(), 1..96),
    ) {
        let mmu = Arc::new(crate::host::RecordingMmu::new());
        let mut harness = Harness::new(1, last, policy, Arc::clone(&mmu));
        for op in ops {
            harness.apply(op)?;
        }
        prop_assert_eq!(mmu.stale_loads(), 0);
        if policy == VictimPolicy::SkipActive {
            prop_assert_eq!(mmu.running_evictions(), 0);
        }
    }
}
