//! Enum layout for the Ori compiler.
//!
//! Decides how values of every enum type are represented in memory and
//! emits the code that builds, inspects, copies and destroys them:
//!
//! - [`TypeInfoStore`] computes and caches a [`TypeInfo`] (size, alignment,
//!   spare bits, extra inhabitants) for each concrete type.
//! - Enum types get an [`EnumImplStrategy`]: singleton, no-payload,
//!   C-compatible, single-payload, multi-payload or resilient.
//! - Operations are emitted into a small block-structured IR through an
//!   [`IrBuilder`]; [`interp`] runs that IR over byte memory.
//!
//! Layout problems (recursive enums without indirection, payloads in
//! C-compatible enums, duplicate raw values) are recorded as diagnostics
//! and layout carries on with a placeholder.

mod bits;
mod builder;
mod explosion;
mod inhabitants;
pub mod interp;
pub mod ir;
mod strategy;
mod target;
mod type_info;
mod value_ops;

#[cfg(test)]
mod test_support;

use std::sync::Once;

pub use bits::{deinterleave, gather, interleave, scatter, BitPattern, BitPatternError, SpareBitVector};
pub use builder::IrBuilder;
pub use explosion::Explosion;
pub use inhabitants::{ExtraInhabitants, MAX_EXTRA_INHABITANTS};
pub use strategy::{CaseSlot, CopyDestroyKind, EnumElement, EnumImplStrategy, EnumStrategyKind};
pub use target::TargetConfig;
pub use type_info::{FieldInfo, TypeInfo, TypeInfoKind, TypeInfoStore, TypeShape};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Enable with `RUST_LOG=ori_layout=debug`;
/// set `ORI_LOG_TREE=1` as well for indented, span-nested output.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_err() {
            return;
        }
        let filter = EnvFilter::from_default_env();
        let tree = std::env::var("ORI_LOG_TREE").is_ok();
        let tree_layer = tree.then(|| {
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true)
        });
        let fmt_layer = (!tree).then(|| fmt::layer().with_target(true).with_level(true));
        tracing_subscriber::registry()
            .with(filter)
            .with(tree_layer)
            .with(fmt_layer)
            .init();
    });
}

#[cfg(target_pointer_width = "64")]
mod size_asserts {
    use super::ir::{EmitBlockId, EmitVarId};
    ori_ir::static_assert_size!(EmitVarId, 4);
    ori_ir::static_assert_size!(EmitBlockId, 4);
}
