//! Combinators and collection helpers for `Option<T>`.
//!
//! `Option` already carries the core algebra (`map`, `and_then`,
//! `filter`, `or_else`, `unwrap_or`, `ok_or`); this module adds the
//! side-effect taps, the fallible extractor, and the collection-level
//! operations (`sequence`, `traverse`, `choose`, joins).

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use either::Either;

use crate::fault::Fault;

/// Extra combinators on `Option<T>`.
pub trait OptionExt<T> {
    /// Run a side effect on the contained value, passing the option
    /// through unchanged.
    fn tap(self, f: impl FnOnce(&T)) -> Self;

    /// Run a side effect when the option is `None`, passing it through
    /// unchanged.
    fn tap_none(self, f: impl FnOnce()) -> Self;

    /// Extract the value or fail with the distinguished unwrap fault.
    ///
    /// `what` names the absent value in the fault message.
    fn or_fault(self, what: impl fmt::Display) -> Result<T, Fault>;

    /// `Right` of the value, or `Left` of the given default.
    fn to_either<L>(self, left: L) -> Either<L, T>;

    /// `Right` of the value, or `Left` built by the factory.
    fn to_either_with<L>(self, left: impl FnOnce() -> L) -> Either<L, T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn tap(self, f: impl FnOnce(&T)) -> Self {
        if let Some(value) = &self {
            f(value);
        }
        self
    }

    fn tap_none(self, f: impl FnOnce()) -> Self {
        if self.is_none() {
            f();
        }
        self
    }

    fn or_fault(self, what: impl fmt::Display) -> Result<T, Fault> {
        self.ok_or_else(|| Fault::unwrap_failure(what))
    }

    fn to_either<L>(self, left: L) -> Either<L, T> {
        match self {
            Some(value) => Either::Right(value),
            None => Either::Left(left),
        }
    }

    fn to_either_with<L>(self, left: impl FnOnce() -> L) -> Either<L, T> {
        match self {
            Some(value) => Either::Right(value),
            None => Either::Left(left()),
        }
    }
}

/// First element of the iterator, if any.
pub fn first_or_none<I: IntoIterator>(iter: I) -> Option<I::Item> {
    iter.into_iter().next()
}

/// The sole element of the iterator; `None` when it yields zero or more
/// than one item.
pub fn single_or_none<I: IntoIterator>(iter: I) -> Option<I::Item> {
    let mut iter = iter.into_iter();
    let first = iter.next()?;
    match iter.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// Last element of the iterator, if any.
pub fn last_or_none<I: IntoIterator>(iter: I) -> Option<I::Item> {
    iter.into_iter().last()
}

/// Lookup in a mapping without panicking on absence.
pub fn try_get<'a, K, V>(map: &'a HashMap<K, V>, key: &K) -> Option<&'a V>
where
    K: Eq + Hash,
{
    map.get(key)
}

/// Collect `Option`s into an `Option` of the collection; `None` as soon
/// as any element is `None`.
pub fn sequence<T, I>(iter: I) -> Option<Vec<T>>
where
    I: IntoIterator<Item = Option<T>>,
{
    let iter = iter.into_iter();
    let mut out = Vec::with_capacity(iter.size_hint().0);
    for item in iter {
        out.push(item?);
    }
    Some(out)
}

/// Map every element and sequence the results.
pub fn traverse<A, T, I, F>(iter: I, f: F) -> Option<Vec<T>>
where
    I: IntoIterator<Item = A>,
    F: FnMut(A) -> Option<T>,
{
    sequence(iter.into_iter().map(f))
}

/// Keep only the present values.
pub fn choose<T, I>(iter: I) -> Vec<T>
where
    I: IntoIterator<Item = Option<T>>,
{
    iter.into_iter().flatten().collect()
}

macro_rules! option_join {
    ($name:ident, $($t:ident : $v:ident),+) => {
        /// `Some` of the tuple iff every input is `Some`.
        pub fn $name<$($t),+>($($v: Option<$t>),+) -> Option<($($t,)+)> {
            Some(($($v?,)+))
        }
    };
}

option_join!(join2, A: a, B: b);
option_join!(join3, A: a, B: b, C: c);
option_join!(join4, A: a, B: b, C: c, D: d);
option_join!(join5, A: a, B: b, C: c, D: d, E: e);
option_join!(join6, A: a, B: b, C: c, D: d, E: e, F: f);
option_join!(join7, A: a, B: b, C: c, D: d, E: e, F: f, G: g);
option_join!(join8, A: a, B: b, C: c, D: d, E: e, F: f, G: g, H: h);
