// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for configuration and invariant checks.

use alloc::string::String;

use crate::types::ContextId;

/// Errors reported while validating or loading an allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The range includes the reserved kernel context.
    #[error("context 0 is reserved for the kernel")]
    ReservedContext,
    /// `first` is greater than `last`.
    #[error("context range inverted: first {first} > last {last}")]
    InvertedRange {
        /// Configured first context.
        first: u16,
        /// Configured last context.
        last: u16,
    },
    /// Stealing needs at least two usable contexts.
    #[error("context pool too small: {usable} usable, need at least 2")]
    PoolTooSmall {
        /// Number of usable contexts in the configured range.
        usable: usize,
    },
    /// CPU ceiling is zero or wider than the active-set mask.
    #[error("cpu ceiling {0} outside 1..={max}", max = crate::config::MAX_CPUS)]
    CpuCeiling(usize),
    /// Skip-active stealing needs more contexts than processors.
    #[error("context pool {usable} not above cpu ceiling {max_cpus} (skip-active)")]
    PoolBelowCpus {
        /// Number of usable contexts in the configured range.
        usable: usize,
        /// Configured CPU ceiling.
        max_cpus: usize,
    },
    /// The configuration text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Inconsistency between the bitmap, the owner table and the address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// The bitmap and owner table disagree about whether a context is free.
    #[error("context {0}: bitmap and owner table disagree")]
    TableMismatch(ContextId),
    /// The owner recorded for a context does not point back at it.
    #[error("context {0}: owner does not reference it")]
    BackReference(ContextId),
    /// The cached free count does not match the bitmap.
    #[error("free count {cached} != {counted}")]
    FreeCount {
        /// Cached count.
        cached: usize,
        /// Count derived from the bitmap.
        counted: usize,
    },
    /// The kernel context is marked free or owned.
    #[error("kernel context is not reserved")]
    KernelContext,
}
