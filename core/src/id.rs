//! Positional identity for nodes that need a stable id.
//!
//! Every time rendering forks into siblings, the position of the child being
//! rendered is appended to a packed bit-field. The field always starts with a
//! marker bit so that leading zero slots stay distinguishable. Once the field
//! would grow past [`MAX_PACKED_BITS`], its low, already settled bits are moved
//! into a base-32 overflow suffix and packing continues on a fresh field.
//!
//! Ids only depend on sibling positions, never on the order in which
//! asynchronous work completes, so a retried subtree always derives the same id.
//!
//! ```
//! use cascade_core::id::TreeContext;
//!
//! let root = TreeContext::root();
//! assert_eq!(root.tree_id(), "0");
//! assert_eq!(root.fork(3, 1).tree_id(), "2");
//! ```

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

/// The widest packed field we allow, including the marker bit's position.
pub const MAX_PACKED_BITS: u32 = 30;

const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Packed fork path of the node currently being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeContext {
    id: u32,
    overflow: Rc<str>,
}

impl Default for TreeContext {
    fn default() -> Self {
        Self::root()
    }
}

impl TreeContext {
    /// The context of the root node: no forks recorded.
    #[must_use]
    pub fn root() -> Self {
        Self {
            id: 1,
            overflow: Rc::from(""),
        }
    }

    /// Returns the context for child `index` out of `total_children` siblings.
    ///
    /// `index` must be smaller than `total_children`.
    #[must_use]
    pub fn fork(&self, total_children: usize, index: usize) -> Self {
        debug_assert!(index < total_children, "fork index out of range");
        let total = u32::try_from(total_children).unwrap_or(u32::MAX >> 2);
        let slot = u32::try_from(index + 1).unwrap_or(total);

        let base_length = bit_length(self.id) - 1;
        let base_id = self.id & !(1 << base_length);
        let length = bit_length(total) + base_length;

        if length > MAX_PACKED_BITS {
            // Move every complete base-32 digit of the base id into the suffix.
            let overflow_bits = base_length - (base_length % 5);
            let mask = (1u32 << overflow_bits) - 1;
            let digits = (overflow_bits / 5) as usize;
            let mut overflow = to_base32_padded(base_id & mask, digits);
            overflow.push_str(&self.overflow);

            let rest_of_base_id = base_id >> overflow_bits;
            let rest_of_base_length = base_length - overflow_bits;
            let rest_of_length = bit_length(total) + rest_of_base_length;
            let id = (slot << rest_of_base_length) | rest_of_base_id;
            Self {
                id: (1 << rest_of_length) | id,
                overflow: Rc::from(overflow),
            }
        } else {
            let id = (slot << base_length) | base_id;
            Self {
                id: (1 << length) | id,
                overflow: self.overflow.clone(),
            }
        }
    }

    /// Renders the id as a string: the packed remainder in base 32 followed by
    /// the overflow suffix.
    #[must_use]
    pub fn tree_id(&self) -> String {
        let id = self.id & !leading_bit(self.id);
        let mut out = to_base32(id);
        out.push_str(&self.overflow);
        out
    }

    /// Number of bits currently packed, not counting the marker bit.
    #[must_use]
    pub const fn packed_bits(&self) -> u32 {
        bit_length(self.id) - 1
    }
}

/// Reconstructs the fork path encoded in `id`.
///
/// `totals` lists the sibling count of every fork from the root down, which
/// determines how wide each slot is. Returns `None` when the id does not
/// describe a valid path for those totals.
#[must_use]
pub fn decode_tree_id(id: &str, totals: &[usize]) -> Option<Vec<usize>> {
    let mut bits = Vec::with_capacity(id.len() * 5);
    for byte in id.bytes().rev() {
        let digit = BASE32_DIGITS.iter().position(|&d| d == byte)?;
        for shift in 0..5 {
            bits.push((digit >> shift) & 1 == 1);
        }
    }

    let mut cursor = 0;
    let mut path = Vec::with_capacity(totals.len());
    for &total in totals {
        let total = u32::try_from(total).ok()?;
        let width = bit_length(total) as usize;
        let mut slot = 0usize;
        for bit in 0..width {
            if bits.get(cursor + bit).copied().unwrap_or(false) {
                slot |= 1 << bit;
            }
        }
        cursor += width;
        if slot == 0 || slot > total as usize {
            return None;
        }
        path.push(slot - 1);
    }

    if bits.iter().skip(cursor).any(|&bit| bit) {
        return None;
    }
    Some(path)
}

const fn bit_length(number: u32) -> u32 {
    32 - number.leading_zeros()
}

const fn leading_bit(id: u32) -> u32 {
    1 << (bit_length(id) - 1)
}

/// Formats `value` in base 32 without leading zeros (`0` for zero).
#[must_use]
pub fn to_base32(mut value: u32) -> String {
    if value == 0 {
        return String::from("0");
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE32_DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    digits.iter().rev().map(|&d| char::from(d)).collect()
}

fn to_base32_padded(mut value: u32, digits: usize) -> String {
    let mut out = alloc::vec![b'0'; digits];
    for slot in out.iter_mut().rev() {
        *slot = BASE32_DIGITS[(value % 32) as usize];
        value /= 32;
    }
    out.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use std::collections::HashSet;

    fn walk(path: &[(usize, usize)]) -> TreeContext {
        path.iter()
            .fold(TreeContext::root(), |ctx, &(total, index)| ctx.fork(total, index))
    }

    #[test]
    fn root_and_shallow_ids() {
        assert_eq!(TreeContext::root().tree_id(), "0");
        assert_eq!(walk(&[(3, 1)]).tree_id(), "2");
        assert_eq!(walk(&[(3, 1), (2, 0)]).tree_id(), "6");
        assert_eq!(walk(&[(1, 0)]).tree_id(), "1");
    }

    #[test]
    fn same_position_same_id() {
        let a = walk(&[(4, 2), (7, 6), (2, 1)]);
        let b = walk(&[(4, 2), (7, 6), (2, 1)]);
        assert_eq!(a, b);
        assert_eq!(a.tree_id(), b.tree_id());
    }

    #[test]
    fn deep_paths_overflow_and_round_trip() {
        let path: Vec<(usize, usize)> = (0..40).map(|depth| (7, depth % 7)).collect();
        let ctx = walk(&path);
        assert!(ctx.packed_bits() <= MAX_PACKED_BITS);
        assert!(!ctx.overflow.is_empty(), "deep path should overflow");

        let totals: Vec<usize> = path.iter().map(|&(total, _)| total).collect();
        let expected: Vec<usize> = path.iter().map(|&(_, index)| index).collect();
        let decoded = decode_tree_id(&ctx.tree_id(), &totals).expect("id should decode");
        assert_eq!(decoded, expected);
    }

    #[test]
    fn overflow_keeps_leading_zero_digits() {
        // Wide slots holding index zero leave the top digit of the suffix empty.
        let mut path = vec![(32, 0); 6];
        path.extend((0..4).map(|_| (3, 2)));
        let ctx = walk(&path);
        assert_eq!(ctx.overflow.len(), 6);
        assert!(ctx.overflow.starts_with('0'));
        let totals: Vec<usize> = path.iter().map(|&(total, _)| total).collect();
        let decoded = decode_tree_id(&ctx.tree_id(), &totals).expect("id should decode");
        assert!(decoded[..6].iter().all(|&index| index == 0));
        assert!(decoded[6..].iter().all(|&index| index == 2));
    }

    #[test]
    fn ten_thousand_fork_points_are_unique() {
        let mut seen = HashSet::new();
        let root = TreeContext::root();
        for outer in 0..100 {
            let parent = root.fork(100, outer);
            for inner in 0..100 {
                assert!(seen.insert(parent.fork(100, inner).tree_id()));
            }
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn decode_rejects_mismatched_totals() {
        let ctx = walk(&[(3, 2)]);
        assert_eq!(decode_tree_id(&ctx.tree_id(), &[3]), Some(vec![2]));
        assert_eq!(decode_tree_id(&ctx.tree_id(), &[2]), None);
        assert_eq!(decode_tree_id("!", &[]), None);
    }
}
