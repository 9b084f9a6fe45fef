//! Exploded values.
//!
//! A loadable value is carried between operations as a short list of
//! integer variables. Scalars, references and aggregates explode to one
//! integer of their storage width; a fixed enum explodes to its payload
//! integer followed by its extra-tag integer, omitting either when it has
//! no bits.

use smallvec::SmallVec;

use crate::ir::EmitVarId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Explosion {
    values: SmallVec<[EmitVarId; 2]>,
    cursor: usize,
}

impl Explosion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = EmitVarId>) -> Self {
        Explosion {
            values: values.into_iter().collect(),
            cursor: 0,
        }
    }

    pub fn single(value: EmitVarId) -> Self {
        Self::from_values([value])
    }

    pub fn add(&mut self, value: EmitVarId) {
        self.values.push(value);
    }

    /// Take the next unclaimed value.
    ///
    /// # Panics
    ///
    /// Panics when every value has been claimed.
    pub fn claim_next(&mut self) -> EmitVarId {
        let Some(&value) = self.values.get(self.cursor) else {
            panic!("explosion of {} values exhausted", self.values.len());
        };
        self.cursor += 1;
        value
    }

    pub fn values(&self) -> &[EmitVarId] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
