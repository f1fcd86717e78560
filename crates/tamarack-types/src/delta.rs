//! Modify-delta payloads.
//!
//! A modify update stores a value as a list of byte-range edits against the
//! next-newer version instead of a full copy. History store reconstruction
//! applies these deltas newest-to-oldest while rebuilding a full value.

// ---------------------------------------------------------------------------
// ModifyOp / ModifyDelta
// ---------------------------------------------------------------------------

/// A single byte-range edit: replace `replaced` bytes at `offset` with
/// `data`. Writing past the current end zero-pads the gap first.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModifyOp {
    pub offset: usize,
    pub replaced: usize,
    pub data: Vec<u8>,
}

/// An ordered list of byte-range edits.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ModifyDelta {
    pub ops: Vec<ModifyOp>,
}

impl ModifyDelta {
    /// A delta with a single edit.
    #[must_use]
    pub fn single(offset: usize, replaced: usize, data: Vec<u8>) -> Self {
        Self {
            ops: vec![ModifyOp {
                offset,
                replaced,
                data,
            }],
        }
    }

    /// Apply every edit, in order, against `base`.
    pub fn apply(&self, base: &mut Vec<u8>) {
        for op in &self.ops {
            if base.len() < op.offset {
                base.resize(op.offset, 0);
            }
            let end = (op.offset + op.replaced).min(base.len());
            base.splice(op.offset..end, op.data.iter().copied());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_in_place() {
        let mut base = b"hello world".to_vec();
        ModifyDelta::single(6, 5, b"there".to_vec()).apply(&mut base);
        assert_eq!(base, b"hello there");
    }

    #[test]
    fn grow_and_shrink() {
        let mut base = b"abc".to_vec();
        // Replace one byte with three: the value grows.
        ModifyDelta::single(1, 1, b"xyz".to_vec()).apply(&mut base);
        assert_eq!(base, b"axyzc");
        // Replace three bytes with one: the value shrinks.
        ModifyDelta::single(1, 3, b"b".to_vec()).apply(&mut base);
        assert_eq!(base, b"abc");
    }

    #[test]
    fn write_past_end_zero_pads() {
        let mut base = b"ab".to_vec();
        ModifyDelta::single(4, 0, b"cd".to_vec()).apply(&mut base);
        assert_eq!(base, b"ab\0\0cd");
    }

    #[test]
    fn ops_apply_in_order() {
        let mut base = b"....".to_vec();
        let delta = ModifyDelta {
            ops: vec![
                ModifyOp {
                    offset: 0,
                    replaced: 2,
                    data: b"ab".to_vec(),
                },
                ModifyOp {
                    offset: 2,
                    replaced: 2,
                    data: b"cd".to_vec(),
                },
            ],
        };
        delta.apply(&mut base);
        assert_eq!(base, b"abcd");
    }

    #[test]
    fn empty_delta_is_identity() {
        let mut base = b"unchanged".to_vec();
        ModifyDelta::default().apply(&mut base);
        assert_eq!(base, b"unchanged");
    }
}
