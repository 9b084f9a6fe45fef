//! Protocol conformance resolution.
//!
//! Answers "does type T conform to protocol P, and through which
//! declaration?" for every nominal type in a module. Each type gets a
//! [`ConformanceLookupTable`] that is brought up to date lazily through
//! four stages:
//!
//! 1. **`RecordedExplicit`**: conformances written in inheritance clauses
//! 2. **`Inherited`**: conformances copied from the superclass
//! 3. **`ExpandedImplied`**: conformances implied by protocol inheritance
//! 4. **`Resolved`**: one winner per protocol, losers diagnosed if needed
//!
//! Winning entries are backed by conformance objects (normal, specialized
//! or inherited) that carry the witness tables.
//!
//! Nothing here type-checks: checked inheritance clauses, superclasses and
//! witnesses come from an optional [`LazyResolver`], and conformances of
//! serialized declarations from a [`LazyMemberLoader`].

mod config;
mod conformance;
mod entry;
mod lookup;
mod ranking;
mod resolver;
mod stages;
mod table;
mod witness;

#[cfg(test)]
mod test_support;

pub use config::ConformanceConfig;
pub use conformance::{
    ConformanceArena, ConformanceId, ConformanceRef, ConformanceState, InheritedConformance,
    NormalConformance, ProtocolConformance, SpecializedConformance, TypeWitness, Witness,
};
pub use entry::{ConformanceEntry, ConformanceEntryKind, ConformanceSource, EntryArena, EntryId};
pub use lookup::{ConformanceDiagnostic, ConformanceLookupKind, ConformanceLookupResult};
pub use ranking::{compare_entries, Ranking};
pub use resolver::{LazyMemberLoader, LazyResolver, ResolutionContext};
pub use table::{ConformanceLookupTable, ConformanceStage, ConformanceTables, SatisfiedRequirement};

#[cfg(target_pointer_width = "64")]
mod size_asserts {
    use super::{ConformanceId, ConformanceRef, EntryId};
    ori_ir::static_assert_size!(EntryId, 4);
    ori_ir::static_assert_size!(ConformanceId, 4);
    ori_ir::static_assert_size!(ConformanceRef, 8);
}
