//! 8-bit sequence-number arithmetic.
//!
//! Sequence numbers wrap modulo 256.  `b` is considered *after* `a` when the
//! forward distance `b - a (mod 256)` lies in `1..128`; this stays correct
//! across the `255 → 0` boundary as long as fewer than 128 numbers are in
//! use at once.  Window sizes are capped at [`MAX_WINDOW`].

/// Largest window for which modular comparisons remain unambiguous.
pub const MAX_WINDOW: usize = 127;

const HALF: u8 = 128;

#[inline]
pub fn seq_next(s: u8) -> u8 {
    s.wrapping_add(1)
}

#[inline]
pub fn seq_prev(s: u8) -> u8 {
    s.wrapping_sub(1)
}

/// Forward distance from `from` to `to`.
#[inline]
pub fn seq_distance(from: u8, to: u8) -> u8 {
    to.wrapping_sub(from)
}

/// `a` strictly precedes `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u8, b: u8) -> bool {
    let d = seq_distance(a, b);
    d != 0 && d < HALF
}

/// `a` precedes or equals `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u8, b: u8) -> bool {
    seq_distance(a, b) < HALF
}

/// `true` when `s` is one of the `len` contiguous numbers starting at `base`.
#[inline]
pub fn seq_in_window(base: u8, len: usize, s: u8) -> bool {
    (seq_distance(base, s) as usize) < len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_across_the_wrap() {
        let walked: Vec<u8> = std::iter::successors(Some(254u8), |s| Some(seq_next(*s)))
            .take(4)
            .collect();
        assert_eq!(walked, [254, 255, 0, 1]);
        assert_eq!(seq_prev(0), 255);
    }

    #[test]
    fn ordering_survives_wraparound() {
        assert!(seq_lt(254, 255));
        assert!(seq_lt(255, 0));
        assert!(seq_lt(254, 1));
        assert!(!seq_lt(1, 254));
        assert!(!seq_lt(7, 7));
        assert!(seq_le(7, 7));
        assert_eq!(seq_distance(250, 3), 9);
    }

    #[test]
    fn window_membership() {
        assert!(seq_in_window(254, 4, 254));
        assert!(seq_in_window(254, 4, 1));
        assert!(!seq_in_window(254, 4, 2));
        assert!(!seq_in_window(254, 4, 253));
        assert!(!seq_in_window(0, 0, 0));
    }
}
