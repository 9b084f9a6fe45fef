//! Value operations on `TypeInfo`.
//!
//! Loadable types move through emitted code as explosions; everything else
//! is manipulated in memory through its value witnesses. Enum-shaped types
//! forward to their layout strategy, so a payload of any shape can be
//! copied, stored or destroyed the same way.

use smallvec::{smallvec, SmallVec};

use crate::builder::IrBuilder;
use crate::ir::{Callee, EmitVarId, ValueWitness};
use crate::{Explosion, TypeInfo, TypeShape};

impl TypeInfo {
    /// Widths of the integers a loadable value explodes to.
    pub fn explosion_widths(&self) -> SmallVec<[u32; 2]> {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.explosion_widths(),
            TypeShape::Opaque => self.no_loadable_representation(),
            TypeShape::Scalar | TypeShape::Reference | TypeShape::Aggregate(_) => {
                if self.size == 0 {
                    SmallVec::new()
                } else {
                    smallvec![self.storage_bits()]
                }
            }
        }
    }

    pub fn load(&self, b: &mut IrBuilder, addr: EmitVarId, offset: u64) -> Explosion {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.load(b, addr, offset),
            _ => {
                let mut value = Explosion::new();
                for width in self.explosion_widths() {
                    value.add(b.load(addr, offset, width));
                }
                value
            }
        }
    }

    pub fn store(&self, b: &mut IrBuilder, value: &Explosion, addr: EmitVarId, offset: u64) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.store(b, value, addr, offset),
            _ => {
                self.check_explosion(value);
                for &v in value.values() {
                    b.store(v, addr, offset);
                }
            }
        }
    }

    /// Merge an explosion into one integer of the storage width; `None`
    /// for zero-sized types.
    pub fn pack(&self, b: &mut IrBuilder, value: &Explosion) -> Option<EmitVarId> {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.pack(b, value),
            _ => {
                self.check_explosion(value);
                value.values().first().copied()
            }
        }
    }

    /// Inverse of [`pack`](Self::pack).
    pub fn unpack(&self, b: &mut IrBuilder, packed: Option<EmitVarId>) -> Explosion {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.unpack(b, packed),
            _ => {
                let widths = self.explosion_widths();
                match packed {
                    Some(v) if !widths.is_empty() => Explosion::single(v),
                    None if widths.is_empty() => Explosion::new(),
                    _ => panic!("packed value does not match the layout of {:?}", self.ty),
                }
            }
        }
    }

    /// Emit the retains that make `value` an independent copy.
    pub fn copy(&self, b: &mut IrBuilder, value: &Explosion) {
        self.visit_references(b, value, &mut |b, reference| b.retain(reference));
    }

    /// Emit the releases that end `value`'s lifetime.
    pub fn consume(&self, b: &mut IrBuilder, value: &Explosion) {
        self.visit_references(b, value, &mut |b, reference| b.release(reference));
    }

    pub(crate) fn visit_references(
        &self,
        b: &mut IrBuilder,
        value: &Explosion,
        f: &mut dyn FnMut(&mut IrBuilder, EmitVarId),
    ) {
        match &self.shape {
            TypeShape::Opaque => self.no_loadable_representation(),
            TypeShape::Enum(strategy) => strategy.visit_references(b, value, f),
            _ if self.pod => {}
            TypeShape::Scalar => {}
            TypeShape::Reference => {
                self.check_explosion(value);
                f(b, value.values()[0]);
            }
            TypeShape::Aggregate(fields) => {
                self.check_explosion(value);
                let whole = value.values()[0];
                for field in fields.iter().filter(|f| !f.info.pod) {
                    let shifted = b.lshr_const(whole, (field.offset * 8) as u32);
                    let bits = b.trunc(shifted, field.info.storage_bits());
                    let field_value = field.info.unpack(b, Some(bits));
                    field.info.visit_references(b, &field_value, f);
                }
            }
        }
    }

    // ── Indirect operations ─────────────────────────────────────────

    pub fn destroy(&self, b: &mut IrBuilder, addr: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.destroy(b, addr),
            TypeShape::Opaque => self.witness(b, ValueWitness::Destroy, vec![addr]),
            _ if self.pod => {}
            _ => {
                let value = self.load(b, addr, 0);
                self.consume(b, &value);
            }
        }
    }

    pub fn initialize_with_copy(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.initialize_with_copy(b, dest, src),
            TypeShape::Opaque => self.witness(b, ValueWitness::InitializeWithCopy, vec![dest, src]),
            _ => {
                let value = self.load(b, src, 0);
                self.copy(b, &value);
                self.store(b, &value, dest, 0);
            }
        }
    }

    pub fn initialize_with_take(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.initialize_with_take(b, dest, src),
            TypeShape::Opaque => self.witness(b, ValueWitness::InitializeWithTake, vec![dest, src]),
            _ => {
                let value = self.load(b, src, 0);
                self.store(b, &value, dest, 0);
            }
        }
    }

    pub fn assign_with_copy(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.assign_with_copy(b, dest, src),
            TypeShape::Opaque => self.witness(b, ValueWitness::AssignWithCopy, vec![dest, src]),
            _ => {
                let old = self.load(b, dest, 0);
                let value = self.load(b, src, 0);
                self.copy(b, &value);
                self.store(b, &value, dest, 0);
                self.consume(b, &old);
            }
        }
    }

    pub fn assign_with_take(&self, b: &mut IrBuilder, dest: EmitVarId, src: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.assign_with_take(b, dest, src),
            TypeShape::Opaque => self.witness(b, ValueWitness::AssignWithTake, vec![dest, src]),
            _ => {
                let old = self.load(b, dest, 0);
                let value = self.load(b, src, 0);
                self.store(b, &value, dest, 0);
                self.consume(b, &old);
            }
        }
    }

    // ── Extra inhabitants ───────────────────────────────────────────

    /// `i32` index of the extra inhabitant stored at `addr`, or `-1`.
    pub fn get_extra_inhabitant_index(&self, b: &mut IrBuilder, addr: EmitVarId) -> EmitVarId {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.emit_get_extra_inhabitant_index(b, addr),
            TypeShape::Opaque => b.call_i32(
                Callee::ValueWitness {
                    ty: self.ty,
                    witness: ValueWitness::GetExtraInhabitantIndex,
                },
                vec![addr],
            ),
            _ => match &self.extra_inhabitants {
                Some(ei) => {
                    let value = b.load(addr, 0, self.storage_bits());
                    ei.emit_index(b, value)
                }
                None => b.const_i32(-1),
            },
        }
    }

    /// Store extra inhabitant `index` (an `i32`) at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the type has no extra inhabitants.
    pub fn store_extra_inhabitant(&self, b: &mut IrBuilder, index: EmitVarId, addr: EmitVarId) {
        match &self.shape {
            TypeShape::Enum(strategy) => strategy.emit_store_extra_inhabitant(b, index, addr),
            TypeShape::Opaque => self.witness(b, ValueWitness::StoreExtraInhabitant, vec![index, addr]),
            _ => match &self.extra_inhabitants {
                Some(ei) => ei.emit_store(b, index, addr, 0),
                None => panic!("{:?} has no extra inhabitants", self.ty),
            },
        }
    }

    fn witness(&self, b: &mut IrBuilder, witness: ValueWitness, args: Vec<EmitVarId>) {
        b.call(Callee::ValueWitness { ty: self.ty, witness }, args, None);
    }

    fn check_explosion(&self, value: &Explosion) {
        assert_eq!(
            value.len(),
            self.explosion_widths().len(),
            "explosion of {:?} has the wrong number of values",
            self.ty
        );
    }

    fn no_loadable_representation(&self) -> ! {
        panic!("{:?} has no loadable representation", self.ty)
    }
}
