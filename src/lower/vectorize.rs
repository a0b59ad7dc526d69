//! Word planning for linear vectorized transfers.
//!
//! A group of `vec` consecutive elements moves as `n_words` integer words of
//! `width` bits. Elements narrower than a byte travel as bytes.

use tracing::trace;

use crate::sir::{Builder, Idx, Reg, Ty};
use crate::types::ElemType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordPlan {
    pub elem: ElemType,
    /// Elements per transfer.
    pub vec: u32,
    /// Bits per element in memory.
    pub elem_bits: u32,
    /// Bits per word.
    pub width: u32,
    pub n_words: u32,
    /// Elements per word.
    pub word_elems: u32,
}

impl WordPlan {
    pub fn new(elem: ElemType, vec: u32) -> Self {
        let elem_bits = elem.storage().bits();
        let total = elem_bits * vec;
        let width = total.min(elem_bits.max(32));
        let n_words = (total / width).max(1);
        let plan = Self {
            elem,
            vec,
            elem_bits,
            width,
            n_words,
            word_elems: width / elem_bits,
        };
        trace!(elem = %elem, vec, width, n_words, "transfer words");
        plan
    }

    pub fn word_ty(&self) -> Ty {
        Ty::Int(self.width)
    }

    /// Type of one transfer: a single word or a vector of words.
    pub fn ty(&self) -> Ty {
        if self.n_words == 1 {
            self.word_ty()
        } else {
            Ty::vector(self.word_ty(), self.n_words)
        }
    }

    /// Alignment of a transfer in bytes.
    pub fn align(&self) -> u32 {
        self.n_words * self.width / 8
    }

    fn storage_ty(&self) -> Ty {
        self.elem.storage().ty()
    }

    fn chunk_ty(&self) -> Ty {
        if self.word_elems == 1 {
            self.storage_ty()
        } else {
            Ty::vector(self.storage_ty(), self.word_elems)
        }
    }

    /// One word holding `word_elems` copies of the element pattern `bits`.
    pub fn splat_word(&self, bits: u64) -> u64 {
        let pattern = if self.elem == ElemType::I1 {
            if bits & 1 == 1 {
                0xff
            } else {
                0
            }
        } else if self.elem_bits >= 64 {
            bits
        } else {
            bits & ((1u64 << self.elem_bits) - 1)
        };
        (0..self.word_elems).fold(0u64, |word, i| word | (pattern << (i * self.elem_bits)))
    }

    /// Transfer value with every element set to the pattern `bits`.
    pub fn splat(&self, b: &mut Builder, bits: u64) -> Reg {
        let word = b.constant(self.word_ty(), self.splat_word(bits));
        if self.n_words == 1 {
            word
        } else {
            let words = vec![word; self.n_words as usize];
            b.build_vector(self.ty(), &words)
        }
    }

    /// Pack `vec` element registers into the transfer type.
    pub fn pack(&self, b: &mut Builder, elems: &[Reg]) -> Reg {
        debug_assert_eq!(elems.len() as u32, self.vec);
        let stored: Vec<Reg> = elems
            .iter()
            .map(|&e| match self.elem {
                ElemType::I1 => b.sext(e, Ty::i1(), Ty::i8()),
                _ => e,
            })
            .collect();

        let chunk_ty = self.chunk_ty();
        let words: Vec<Reg> = stored
            .chunks(self.word_elems as usize)
            .map(|chunk| {
                let packed = if chunk.len() == 1 {
                    chunk[0]
                } else {
                    b.build_vector(chunk_ty.clone(), chunk)
                };
                b.bitcast(packed, chunk_ty.clone(), self.word_ty())
            })
            .collect();

        if self.n_words == 1 {
            words[0]
        } else {
            b.build_vector(self.ty(), &words)
        }
    }

    /// Split a transfer value back into `vec` element registers.
    pub fn unpack(&self, b: &mut Builder, value: Reg) -> Vec<Reg> {
        let words = if self.n_words == 1 {
            vec![value]
        } else {
            (0..self.n_words)
                .map(|i| b.extract_element(self.ty(), value, Idx::Const(i)))
                .collect()
        };

        let chunk_ty = self.chunk_ty();
        let mut elems = Vec::with_capacity(self.vec as usize);
        for word in words {
            let chunk = b.bitcast(word, self.word_ty(), chunk_ty.clone());
            if self.word_elems == 1 {
                elems.push(chunk);
            } else {
                elems.extend(b.split_vector(&chunk_ty, chunk));
            }
        }

        if self.elem == ElemType::I1 {
            elems.iter().map(|&e| b.trunc(e, Ty::i1())).collect()
        } else {
            elems
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_shapes() {
        let p = WordPlan::new(ElemType::F16, 8);
        assert_eq!((p.width, p.n_words, p.word_elems), (32, 4, 2));
        assert_eq!(p.ty(), Ty::vector(Ty::i32(), 4));
        assert_eq!(p.align(), 16);

        let p = WordPlan::new(ElemType::I8, 2);
        assert_eq!((p.width, p.n_words, p.word_elems), (16, 1, 2));
        assert_eq!(p.ty(), Ty::i16());
        assert_eq!(p.align(), 2);

        let p = WordPlan::new(ElemType::I64, 2);
        assert_eq!((p.width, p.n_words, p.word_elems), (64, 2, 1));
        assert_eq!(p.align(), 16);

        let p = WordPlan::new(ElemType::F32, 1);
        assert_eq!((p.width, p.n_words), (32, 1));
        assert_eq!(p.align(), 4);
    }

    #[test]
    fn test_booleans_travel_as_bytes() {
        let p = WordPlan::new(ElemType::I1, 4);
        assert_eq!(p.elem_bits, 8);
        assert_eq!(p.ty(), Ty::i32());
        assert_eq!(p.splat_word(1), 0xffff_ffff);
        assert_eq!(p.splat_word(0), 0);
    }

    #[test]
    fn test_splat_replicates_pattern() {
        let p = WordPlan::new(ElemType::I8, 4);
        assert_eq!(p.splat_word(0x1ab), 0xabab_abab);
        let p = WordPlan::new(ElemType::I16, 2);
        assert_eq!(p.splat_word(0xbeef), 0xbeef_beef);
        let p = WordPlan::new(ElemType::I64, 1);
        assert_eq!(p.splat_word(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_single_element_words_skip_vectors() {
        let p = WordPlan::new(ElemType::I32, 1);
        let mut b = Builder::new(1, 0);
        let packed = p.pack(&mut b, &[Reg(0)]);
        assert_eq!(packed, Reg(0));
        assert_eq!(p.unpack(&mut b, packed), vec![Reg(0)]);
        assert!(b.ops().is_empty());
    }
}
