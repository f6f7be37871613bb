// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host backend simulating tagged translation caches for tests and tools
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! PUBLIC API: RecordingMmu, MmuEvent
//! DEPENDS_ON: parking_lot::Mutex (feature `backend-host`)
//! INVARIANTS: A load of a context still tagged by a different space counts as a stale load;
//!             flushing a context whose owner is still executing counts as a running eviction

use std::collections::HashMap;
use std::num::NonZeroU64;

use log::error;
use parking_lot::Mutex;

use crate::mmu::Mmu;
use crate::space::AddressSpace;
use crate::types::{ContextId, CpuId};

/// One request observed by [`RecordingMmu`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmuEvent {
    /// `cpu` switched to `ctx` for space `owner`.
    Load {
        /// Processor issuing the load.
        cpu: CpuId,
        /// Context loaded.
        ctx: ContextId,
        /// Serial of the space.
        owner: NonZeroU64,
    },
    /// Translations tagged `ctx` were flushed on behalf of `owner`.
    Invalidate {
        /// Context flushed.
        ctx: ContextId,
        /// Serial of the space losing the context.
        owner: NonZeroU64,
    },
}

#[derive(Default)]
struct Inner {
    events: Vec<MmuEvent>,
    tags: HashMap<ContextId, NonZeroU64>,
    stale_loads: usize,
    running_evictions: usize,
}

/// MMU that records every request and tracks which space last filled each
/// context's translations.
///
/// If a space loads a context whose cached translations still belong to
/// another space, the load is counted as stale: on real hardware it would
/// read the other space's memory.
///
/// A flush issued while the losing space is still executing on some
/// processor is counted as a running eviction. That processor keeps the
/// context loaded and refills it from its own tables, so two running spaces
/// end up sharing one context even though the load itself looks clean.
#[derive(Default)]
pub struct RecordingMmu {
    inner: Mutex<Inner>,
}

impl RecordingMmu {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in the order they were issued.
    pub fn events(&self) -> Vec<MmuEvent> {
        self.inner.lock().events.clone()
    }

    /// Loads that would have used another space's translations.
    pub fn stale_loads(&self) -> usize {
        self.inner.lock().stale_loads
    }

    /// Flushes issued while the losing space was still executing.
    pub fn running_evictions(&self) -> usize {
        self.inner.lock().running_evictions
    }

    /// Number of invalidations issued for the space with `serial`.
    pub fn invalidations_for(&self, serial: NonZeroU64) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, MmuEvent::Invalidate { owner, .. } if *owner == serial))
            .count()
    }

    /// Forgets recorded events; cached tags are kept.
    pub fn clear_events(&self) {
        self.inner.lock().events.clear();
    }
}

impl Mmu for RecordingMmu {
    fn load_context(&self, cpu: CpuId, ctx: ContextId, space: &AddressSpace) {
        let mut inner = self.inner.lock();
        let owner = space.serial();
        if let Some(tagged) = inner.tags.insert(ctx, owner) {
            if tagged != owner {
                inner.stale_loads += 1;
                error!(
                    target: "asid",
                    "MMU: ctx={} loaded for as={} still tagged as={}",
                    ctx,
                    owner,
                    tagged
                );
            }
        }
        inner.events.push(MmuEvent::Load { cpu, ctx, owner });
    }

    fn invalidate_context(&self, ctx: ContextId, space: &AddressSpace) {
        let mut inner = self.inner.lock();
        inner.tags.remove(&ctx);
        if space.is_active() {
            inner.running_evictions += 1;
            error!(
                target: "asid",
                "MMU: ctx={} flushed while as={} runs on {} cpu(s)",
                ctx,
                space.serial(),
                space.active_count()
            );
        }
        inner.events.push(MmuEvent::Invalidate { ctx, owner: space.serial() });
    }
}
