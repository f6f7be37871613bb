// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-space owner record tracked by the context allocator
//! OWNERS: @kernel-mm-team
//! PUBLIC API: AddressSpace::{new, context, root, serial, is_active, is_active_on, active_count}
//! INVARIANTS: context and active mask are written only while the allocator lock is held;
//!             a space starts with no context

use alloc::sync::Arc;
use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::{ContextId, CpuId};

const NO_CONTEXT: u32 = u32::MAX;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A user address space that can hold at most one hardware context.
pub struct AddressSpace {
    serial: NonZeroU64,
    root: usize,
    context: AtomicU32,
    active: AtomicU64,
}

impl AddressSpace {
    /// Creates a space whose translations are rooted at `root` (e.g. a page-table PPN).
    pub fn new(root: usize) -> Arc<Self> {
        let raw = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let serial = NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN);
        Arc::new(Self {
            serial,
            root,
            context: AtomicU32::new(NO_CONTEXT),
            active: AtomicU64::new(0),
        })
    }

    /// Unique, never-reused identity of this space.
    pub fn serial(&self) -> NonZeroU64 {
        self.serial
    }

    /// Translation root handed to the hardware on context load.
    pub fn root(&self) -> usize {
        self.root
    }

    /// Context currently assigned, if any.
    pub fn context(&self) -> Option<ContextId> {
        match self.context.load(Ordering::Acquire) {
            NO_CONTEXT => None,
            raw => Some(ContextId::from_raw(raw as u16)),
        }
    }

    /// True while any processor executes in this space.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// True while `cpu` executes in this space.
    pub fn is_active_on(&self, cpu: CpuId) -> bool {
        self.active.load(Ordering::Acquire) & cpu_bit(cpu) != 0
    }

    /// Number of processors executing in this space.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire).count_ones() as usize
    }

    pub(crate) fn set_context(&self, ctx: Option<ContextId>) {
        let raw = ctx.map_or(NO_CONTEXT, |ctx| ctx.as_raw() as u32);
        self.context.store(raw, Ordering::Release);
    }

    /// Marks `cpu` active. Returns true if it was not already marked.
    pub(crate) fn mark_active(&self, cpu: CpuId) -> bool {
        self.active.fetch_or(cpu_bit(cpu), Ordering::AcqRel) & cpu_bit(cpu) == 0
    }

    /// Clears `cpu`. Returns true if it was marked.
    pub(crate) fn clear_active(&self, cpu: CpuId) -> bool {
        self.active.fetch_and(!cpu_bit(cpu), Ordering::AcqRel) & cpu_bit(cpu) != 0
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("serial", &self.serial)
            .field("root", &format_args!("{:#x}", self.root))
            .field("context", &self.context())
            .field("active", &format_args!("{:#x}", self.active.load(Ordering::Relaxed)))
            .finish()
    }
}

// Processors past the mask width map to no bit; the allocator rejects them
// before any write.
fn cpu_bit(cpu: CpuId) -> u64 {
    u32::try_from(cpu.as_index()).ok().and_then(|shift| 1u64.checked_shl(shift)).unwrap_or(0)
}
