// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for hardware context IDs and processor IDs
//! OWNERS: @kernel-mm-team
//! PUBLIC API: ContextId, CpuId, KERNEL_CONTEXT, FIRST_CONTEXT, LAST_CONTEXT
//! INVARIANTS: Context 0 is reserved for the kernel and never handed to a user space

use core::fmt;

/// Hardware context identifier tagging an address space's translations.
///
/// **Invariant**: [`KERNEL_CONTEXT`] is never assigned to a user address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContextId(u16);

impl ContextId {
    /// Creates a context ID from a raw value.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw context value.
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub(crate) const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the reserved kernel context.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 == KERNEL_CONTEXT.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context used by the kernel's own mappings.
pub const KERNEL_CONTEXT: ContextId = ContextId(0);
/// Smallest context handed to user address spaces by default.
pub const FIRST_CONTEXT: ContextId = ContextId(1);
/// Largest context handed out by default.
pub const LAST_CONTEXT: ContextId = ContextId(255);

/// Logical processor index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u16);

impl CpuId {
    /// The boot processor.
    pub const BOOT: Self = Self(0);

    /// Creates a processor ID from a raw value.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw processor value.
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub(crate) const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
