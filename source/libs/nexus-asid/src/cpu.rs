// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-processor record of the context currently loaded in hardware
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Processor (owned by its CPU/worker), ProcessorView (read-only, shareable)
//! INVARIANTS: Only the owning Processor writes its loaded slot; views never write

use alloc::sync::Arc;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::space::AddressSpace;
use crate::types::{ContextId, CpuId};

const NONE: u32 = u32::MAX;

#[derive(Debug)]
struct LoadedSlot {
    owner: AtomicU64,
    context: AtomicU32,
}

/// Per-processor state. Move it onto the thread that plays this processor.
#[derive(Debug)]
pub struct Processor {
    id: CpuId,
    slot: Arc<LoadedSlot>,
    loads: u64,
}

impl Processor {
    /// Creates the record for `id` with nothing loaded.
    pub fn new(id: CpuId) -> Self {
        let slot = LoadedSlot { owner: AtomicU64::new(0), context: AtomicU32::new(NONE) };
        Self { id, slot: Arc::new(slot), loads: 0 }
    }

    /// Processor identifier.
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Read-only handle other threads may hold.
    pub fn view(&self) -> ProcessorView {
        ProcessorView { id: self.id, slot: Arc::clone(&self.slot) }
    }

    /// Serial of the space and context last loaded on this processor.
    pub fn loaded(&self) -> Option<(NonZeroU64, ContextId)> {
        let owner = NonZeroU64::new(self.slot.owner.load(Ordering::Relaxed))?;
        match self.slot.context.load(Ordering::Relaxed) {
            NONE => None,
            raw => Some((owner, ContextId::from_raw(raw as u16))),
        }
    }

    /// Number of hardware context loads issued from this processor.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    pub(crate) fn has_loaded(&self, space: &AddressSpace, ctx: ContextId) -> bool {
        self.loaded() == Some((space.serial(), ctx))
    }

    pub(crate) fn record_load(&mut self, space: &AddressSpace, ctx: ContextId) {
        self.slot.context.store(ctx.as_raw() as u32, Ordering::Release);
        self.slot.owner.store(space.serial().get(), Ordering::Release);
        self.loads += 1;
    }
}

/// Shared, read-only view of a [`Processor`].
///
/// Values are advisory: the owning processor may change them at any time.
#[derive(Clone, Debug)]
pub struct ProcessorView {
    id: CpuId,
    slot: Arc<LoadedSlot>,
}

impl ProcessorView {
    /// Processor identifier.
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Context most recently loaded on the processor.
    pub fn loaded_context(&self) -> Option<ContextId> {
        match self.slot.context.load(Ordering::Acquire) {
            NONE => None,
            raw => Some(ContextId::from_raw(raw as u16)),
        }
    }

    /// Serial of the space most recently loaded on the processor.
    pub fn loaded_owner(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.slot.owner.load(Ordering::Acquire))
    }
}
