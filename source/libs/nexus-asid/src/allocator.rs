// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Single-lock context allocator with round-robin stealing
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, proptest sequences in tests_prop.rs, tests/ integration suite
//! PUBLIC API: ContextAllocator::{new, acquire, release, bind_for_execution,
//!             unbind_from_execution, switch_mm, teardown, verify, stats}
//! DEPENDS_ON: spin::Mutex, Mmu collaborator
//! INVARIANTS: Context free iff unowned; cached free count matches the bitmap;
//!             a stolen context is invalidated before the new owner is published;
//!             hardware loads happen outside the lock

use alloc::{sync::Arc, vec, vec::Vec};
use core::ptr;

use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::config::{AllocatorConfig, VictimPolicy};
use crate::cpu::Processor;
use crate::error::{ConfigError, Violation};
use crate::map::ContextMap;
use crate::mmu::{Mmu, NoopMmu};
use crate::space::AddressSpace;
use crate::types::ContextId;

/// Counters maintained under the allocator lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Contexts taken from the free pool.
    pub fresh: u64,
    /// Acquires satisfied by the context the space already held.
    pub hits: u64,
    /// Contexts stolen from another space.
    pub steals: u64,
    /// Contexts returned by `release`.
    pub releases: u64,
}

struct State {
    map: ContextMap,
    owners: Vec<Option<Arc<AddressSpace>>>,
    stats: AllocatorStats,
}

impl State {
    fn owner(&self, ctx: ContextId) -> Option<&Arc<AddressSpace>> {
        self.owners.get(ctx.as_index()).and_then(|slot| slot.as_ref())
    }

    fn bind(&mut self, ctx: ContextId, space: &Arc<AddressSpace>) {
        self.owners[ctx.as_index()] = Some(Arc::clone(space));
        space.set_context(Some(ctx));
    }
}

/// Hands out hardware contexts to address spaces.
///
/// All bookkeeping sits behind one spin lock; critical sections are bounded
/// scans of the context range and never block, so the allocator may be used
/// from paths that cannot sleep.
pub struct ContextAllocator<M: Mmu = NoopMmu> {
    config: AllocatorConfig,
    state: Mutex<State>,
    mmu: M,
}

impl<M: Mmu> ContextAllocator<M> {
    /// Builds an allocator with every context in `config`'s range free.
    pub fn new(config: AllocatorConfig, mmu: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let map = ContextMap::new(config.first_context(), config.last_context());
        let owners = vec![None; config.last_context().as_index() + 1];
        info!(
            target: "asid",
            "ASID: init contexts {}..={} cpus={} policy={:?}",
            config.first, config.last, config.max_cpus, config.victim_policy
        );
        let state = State { map, owners, stats: AllocatorStats::default() };
        Ok(Self { config, state: Mutex::new(state), mmu })
    }

    /// Configuration the allocator was built with.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Hardware collaborator.
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// Returns the context of `space`, assigning one if it has none.
    ///
    /// Takes a free context at or after the cursor; with the pool exhausted,
    /// steals the context chosen by the victim policy. Never fails.
    ///
    /// If `space` already holds a context the bitmap, owner table and cursor
    /// are left untouched; only the `hits` counter in [`AllocatorStats`]
    /// moves.
    pub fn acquire(&self, space: &Arc<AddressSpace>) -> ContextId {
        let mut state = self.state.lock();
        let ctx = self.acquire_locked(&mut state, space);
        debug_verify(&state);
        ctx
    }

    fn acquire_locked(&self, state: &mut State, space: &Arc<AddressSpace>) -> ContextId {
        if let Some(ctx) = space.context() {
            state.stats.hits += 1;
            return ctx;
        }
        if let Some(ctx) = state.map.allocate() {
            state.bind(ctx, space);
            state.stats.fresh += 1;
            trace!(target: "asid", "ASID: ctx={} -> as={}", ctx, space.serial());
            return ctx;
        }
        self.steal_locked(state, space)
    }

    fn steal_locked(&self, state: &mut State, space: &Arc<AddressSpace>) -> ContextId {
        let ctx = self.pick_victim(state);
        if let Some(victim) = state.owners[ctx.as_index()].take() {
            // Stale translations must be gone before the context changes hands.
            self.mmu.invalidate_context(ctx, &victim);
            victim.set_context(None);
            debug!(
                target: "asid",
                "ASID: steal ctx={} from as={} (active={}) for as={}",
                ctx,
                victim.serial(),
                victim.active_count(),
                space.serial()
            );
        }
        state.bind(ctx, space);
        state.map.advance_past(ctx);
        state.stats.steals += 1;
        ctx
    }

    fn pick_victim(&self, state: &State) -> ContextId {
        let cursor = state.map.cursor();
        if self.config.victim_policy == VictimPolicy::RoundRobin {
            return cursor;
        }
        let mut ctx = cursor;
        for _ in 0..state.map.capacity() {
            match state.owner(ctx) {
                Some(owner) if owner.is_active() => ctx = state.map.step(ctx),
                _ => return ctx,
            }
        }
        // Unreachable with a validated config unless a processor is bound to
        // several spaces without unbinding.
        panic!("ASID: every context owner is running; no victim for ctx={}", cursor);
    }

    /// Returns the context held by `space` to the pool.
    ///
    /// # Panics
    ///
    /// If `space` is still active on any processor.
    pub fn release(&self, space: &AddressSpace) {
        assert!(
            !space.is_active(),
            "ASID: release of as={} while active on {} cpu(s)",
            space.serial(),
            space.active_count()
        );
        let mut state = self.state.lock();
        let Some(ctx) = space.context() else {
            return;
        };
        let owned = state.owner(ctx).is_some_and(|owner| ptr::eq(Arc::as_ptr(owner), space));
        debug_assert!(owned, "ASID: ctx={} not owned by as={}", ctx, space.serial());
        if owned {
            state.owners[ctx.as_index()] = None;
            self.mmu.invalidate_context(ctx, space);
            state.map.free(ctx);
            state.stats.releases += 1;
            trace!(target: "asid", "ASID: ctx={} released by as={}", ctx, space.serial());
        }
        space.set_context(None);
        debug_verify(&state);
    }

    /// Prepares `cpu` to execute in `space`.
    ///
    /// Marks the processor active in the space and assigns a context under
    /// the lock, then loads the context into the hardware unless `cpu`
    /// already has exactly this space and context loaded.
    ///
    /// # Panics
    ///
    /// If the processor index is outside the configured CPU ceiling.
    pub fn bind_for_execution(&self, space: &Arc<AddressSpace>, cpu: &mut Processor) -> ContextId {
        self.check_ceiling(cpu);
        let ctx = {
            let mut state = self.state.lock();
            space.mark_active(cpu.id());
            let ctx = self.acquire_locked(&mut state, space);
            debug_verify(&state);
            ctx
        };
        if !cpu.has_loaded(space, ctx) {
            self.mmu.load_context(cpu.id(), ctx, space);
            cpu.record_load(space, ctx);
        }
        ctx
    }

    /// Records that `cpu` stopped executing in `space`.
    ///
    /// # Panics
    ///
    /// If the processor index is outside the configured CPU ceiling.
    pub fn unbind_from_execution(&self, space: &AddressSpace, cpu: &Processor) {
        self.check_ceiling(cpu);
        let _state = self.state.lock();
        space.clear_active(cpu.id());
    }

    fn check_ceiling(&self, cpu: &Processor) {
        assert!(
            cpu.id().as_index() < self.config.max_cpus,
            "ASID: cpu {} beyond ceiling {}",
            cpu.id(),
            self.config.max_cpus
        );
    }

    /// Context switch on `cpu` from `prev` to `next`.
    pub fn switch_mm(
        &self,
        cpu: &mut Processor,
        prev: Option<&Arc<AddressSpace>>,
        next: &Arc<AddressSpace>,
    ) -> ContextId {
        if let Some(prev) = prev {
            if !Arc::ptr_eq(prev, next) {
                self.unbind_from_execution(prev, cpu);
            }
        }
        self.bind_for_execution(next, cpu)
    }

    /// Number of unassigned contexts.
    pub fn free_count(&self) -> usize {
        self.state.lock().map.free_count()
    }

    /// Number of contexts in the pool.
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Context the next allocation or steal starts probing from.
    pub fn cursor(&self) -> ContextId {
        self.state.lock().map.cursor()
    }

    /// Space currently holding `ctx`.
    pub fn owner_of(&self, ctx: ContextId) -> Option<Arc<AddressSpace>> {
        self.state.lock().owner(ctx).cloned()
    }

    /// Snapshot of the allocation counters.
    pub fn stats(&self) -> AllocatorStats {
        self.state.lock().stats
    }

    /// Checks bitmap, owner table and back-references against each other.
    pub fn verify(&self) -> Result<(), Violation> {
        verify_locked(&self.state.lock())
    }

    /// Shuts the allocator down, invalidating and detaching every assigned
    /// context. Returns how many spaces lost their context.
    pub fn teardown(self) -> usize {
        let ContextAllocator { state, mmu, .. } = self;
        let state = state.into_inner();
        let mut reclaimed = 0;
        for (index, slot) in state.owners.into_iter().enumerate() {
            let Some(space) = slot else {
                continue;
            };
            let ctx = ContextId::from_raw(index as u16);
            if space.is_active() {
                warn!(
                    target: "asid",
                    "ASID: teardown with as={} active on {} cpu(s)",
                    space.serial(),
                    space.active_count()
                );
            }
            mmu.invalidate_context(ctx, &space);
            space.set_context(None);
            reclaimed += 1;
        }
        info!(target: "asid", "ASID: teardown reclaimed {} context(s)", reclaimed);
        reclaimed
    }
}

fn debug_verify(state: &State) {
    if cfg!(debug_assertions) {
        if let Err(violation) = verify_locked(state) {
            error!(target: "asid", "ASID-VERIFY: {}", violation);
        }
    }
}

fn verify_locked(state: &State) -> Result<(), Violation> {
    let first = state.map.range().next().map_or(0, |ctx| ctx.as_index());
    if !state.map.reserved_intact() || state.owners[..first].iter().any(Option::is_some) {
        return Err(Violation::KernelContext);
    }
    for ctx in state.map.range() {
        match (state.map.is_assigned(ctx), state.owner(ctx)) {
            (true, Some(owner)) if owner.context() != Some(ctx) => {
                return Err(Violation::BackReference(ctx));
            }
            (true, Some(_)) | (false, None) => {}
            _ => return Err(Violation::TableMismatch(ctx)),
        }
    }
    let counted = state.map.count_free();
    let cached = state.map.free_count();
    if counted != cached {
        return Err(Violation::FreeCount { cached, counted });
    }
    Ok(())
}
