// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Allocator configuration (context range, CPU ceiling, victim policy)
//! OWNERS: @kernel-mm-team
//! PUBLIC API: AllocatorConfig, VictimPolicy, MAX_CPUS
//! DEPENDS_ON: serde (derive), toml (feature `std`)
//! INVARIANTS: validate() rejects ranges touching context 0 and pools below two IDs

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{ContextId, FIRST_CONTEXT, LAST_CONTEXT};

/// Widest CPU set the per-space active mask can track.
pub const MAX_CPUS: usize = 64;

const DEFAULT_CPUS: usize = 4;

/// How the steal path picks its victim once the pool is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VictimPolicy {
    /// Take whatever owns the context under the cursor. Callers guarantee
    /// that owner is no longer running anywhere.
    RoundRobin,
    /// Walk forward from the cursor past owners that are running on some
    /// processor. Falls back to the cursor slot if every owner is running.
    #[default]
    SkipActive,
}

/// Boot-time parameters for a [`crate::ContextAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Smallest assignable context.
    pub first: u16,
    /// Largest assignable context.
    pub last: u16,
    /// Number of processors that may bind address spaces.
    pub max_cpus: usize,
    /// Victim selection on exhaustion.
    pub victim_policy: VictimPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            first: FIRST_CONTEXT.as_raw(),
            last: LAST_CONTEXT.as_raw(),
            max_cpus: DEFAULT_CPUS,
            victim_policy: VictimPolicy::default(),
        }
    }
}

impl AllocatorConfig {
    /// Config covering `first..=last` with defaults for everything else.
    pub fn with_range(first: u16, last: u16) -> Self {
        Self { first, last, ..Self::default() }
    }

    /// Returns a copy using `policy` for victim selection.
    pub fn victim_policy(mut self, policy: VictimPolicy) -> Self {
        self.victim_policy = policy;
        self
    }

    /// Returns a copy allowing `max_cpus` processors.
    pub fn max_cpus(mut self, max_cpus: usize) -> Self {
        self.max_cpus = max_cpus;
        self
    }

    /// First assignable context.
    pub fn first_context(&self) -> ContextId {
        ContextId::from_raw(self.first)
    }

    /// Last assignable context.
    pub fn last_context(&self) -> ContextId {
        ContextId::from_raw(self.last)
    }

    /// Number of contexts in the pool.
    pub fn capacity(&self) -> usize {
        if self.last < self.first {
            return 0;
        }
        (self.last - self.first) as usize + 1
    }

    /// Checks the configuration is usable.
    ///
    /// Under [`VictimPolicy::SkipActive`] the pool must be larger than the
    /// CPU ceiling, so a full pool always holds an owner that no processor
    /// is executing in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first == 0 {
            return Err(ConfigError::ReservedContext);
        }
        if self.first > self.last {
            return Err(ConfigError::InvertedRange { first: self.first, last: self.last });
        }
        let usable = self.capacity();
        if usable < 2 {
            return Err(ConfigError::PoolTooSmall { usable });
        }
        if self.max_cpus == 0 || self.max_cpus > MAX_CPUS {
            return Err(ConfigError::CpuCeiling(self.max_cpus));
        }
        // Skipping running owners only works if one of them is always idle.
        if self.victim_policy == VictimPolicy::SkipActive && usable <= self.max_cpus {
            return Err(ConfigError::PoolBelowCpus { usable, max_cpus: self.max_cpus });
        }
        Ok(())
    }

    /// Parses and validates the `[asid]` table of a TOML document.
    ///
    /// ```toml
    /// [asid]
    /// first = 1
    /// last = 255
    /// max-cpus = 4
    /// victim-policy = "skip-active"
    /// ```
    ///
    /// A document without an `[asid]` table yields the defaults.
    #[cfg(feature = "std")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Document {
            asid: AllocatorConfig,
        }

        let doc: Document =
            toml::from_str(text).map_err(|err| ConfigError::Parse(err.message().to_owned()))?;
        doc.asid.validate()?;
        Ok(doc.asid)
    }
}
