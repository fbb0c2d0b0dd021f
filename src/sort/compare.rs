//! Comparison functions for sorting.
//!
//! Rust's standard String comparison is based on code points, not dictionary order; the
//! functions here can be handed to `Pipeline::sorted_by()` instead.

use std::cmp::Ordering;
use std::sync::Arc;

use super::Comparator;

/// Plain `Ord`.
pub fn natural<T: Ord + 'static>() -> Comparator<T> {
    Arc::new(|a: &T, b: &T| a.cmp(b))
}

/// Lexicographic order over chars, with `f` deciding between two chars. A string sorts after
/// its own prefixes.
fn compare_chars_by<F: Fn(char, char) -> Ordering>(a: &str, b: &str, f: F) -> Ordering {
    let mut cb = b.chars();
    for ca in a.chars() {
        match cb.next() {
            None => return Ordering::Greater,
            Some(c) => match f(ca, c) {
                Ordering::Equal => {}
                o => return o,
            },
        }
    }
    if cb.next().is_some() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Compares a with b in a totally case insensitive manner
/// (like coreutil sort)
pub fn dict_string_compare(a: &str, b: &str) -> Ordering {
    compare_chars_by(a, b, dict_char_compare)
}

/// Compares a with b in dictionary order (case insensitive, but lower case first among
/// otherwise equal letters)
pub fn sane_string_compare(a: &str, b: &str) -> Ordering {
    compare_chars_by(a, b, sane_char_compare)
}

#[inline]
fn sane_char_compare(a: char, b: char) -> Ordering {
    let cmp = dict_char_compare(a, b);

    // Same letter with different case. Native: 'B' < 'a'; we want: 'B' > 'a'
    if cmp == Ordering::Equal {
        b.cmp(&a)
    } else {
        cmp
    }
}

#[inline]
fn dict_char_compare(a: char, b: char) -> Ordering {
    a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
}

/// `dict_string_compare` as a sort comparator.
pub fn dictionary() -> Comparator<String> {
    Arc::new(|a: &String, b: &String| dict_string_compare(a, b))
}

/// `sane_string_compare` as a sort comparator.
pub fn sane() -> Comparator<String> {
    Arc::new(|a: &String, b: &String| sane_string_compare(a, b))
}
