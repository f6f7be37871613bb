// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware collaborators used by the context allocator.

use alloc::sync::Arc;

use crate::space::AddressSpace;
use crate::types::{ContextId, CpuId};

/// Translation hardware seen by the allocator.
pub trait Mmu: Send + Sync {
    /// Makes `cpu` translate through `space` tagged with `ctx`.
    ///
    /// Called after the allocator lock is released.
    fn load_context(&self, cpu: CpuId, ctx: ContextId, space: &AddressSpace);

    /// Flushes every cached translation tagged with `ctx` on behalf of `space`.
    ///
    /// Called with the allocator lock held, before `ctx` is handed to
    /// another space. Must not block.
    fn invalidate_context(&self, ctx: ContextId, space: &AddressSpace);
}

impl<T: Mmu + ?Sized> Mmu for Arc<T> {
    fn load_context(&self, cpu: CpuId, ctx: ContextId, space: &AddressSpace) {
        (**self).load_context(cpu, ctx, space)
    }

    fn invalidate_context(&self, ctx: ContextId, space: &AddressSpace) {
        (**self).invalidate_context(ctx, space)
    }
}

impl<T: Mmu + ?Sized> Mmu for &T {
    fn load_context(&self, cpu: CpuId, ctx: ContextId, space: &AddressSpace) {
        (**self).load_context(cpu, ctx, space)
    }

    fn invalidate_context(&self, ctx: ContextId, space: &AddressSpace) {
        (**self).invalidate_context(ctx, space)
    }
}

/// MMU that ignores every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMmu;

impl Mmu for NoopMmu {
    fn load_context(&self, _cpu: CpuId, _ctx: ContextId, _space: &AddressSpace) {}

    fn invalidate_context(&self, _ctx: ContextId, _space: &AddressSpace) {}
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{AllocatorConfig, ContextAllocator, Processor, VictimPolicy};

    #[derive(Default)]
    struct Counting {
        loads: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl Mmu for Counting {
        fn load_context(&self, _cpu: CpuId, _ctx: ContextId, _space: &AddressSpace) {
            self.loads.fetch_add(1, Ordering::Relaxed);
        }

        fn invalidate_context(&self, _ctx: ContextId, _space: &AddressSpace) {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn borrowed_mmu_sees_steal_and_load() {
        let mmu = Counting::default();
        let cfg = AllocatorConfig::with_range(1, 2).victim_policy(VictimPolicy::RoundRobin);
        let alloc = ContextAllocator::new(cfg, &mmu).expect("valid config");
        let mut cpu = Processor::new(CpuId::BOOT);
        for _ in 0..3 {
            let space = AddressSpace::new(0);
            alloc.bind_for_execution(&space, &mut cpu);
            alloc.unbind_from_execution(&space, &cpu);
        }
        assert_eq!(mmu.loads.load(Ordering::Relaxed), 3);
        assert_eq!(mmu.flushes.load(Ordering::Relaxed), 1);
        assert!(core::ptr::eq(*alloc.mmu(), &mmu));
    }
}
