//! Combinators and collection helpers for `Result<T, E>`.
//!
//! Fail-fast throughout: the first `Err` in declaration order wins.
//! Async sequencing comes in two flavors: sequential (`sequence_async`,
//! one future at a time, short-circuiting) and parallel
//! (`sequence_parallel`, all futures started, then sequenced).

use either::Either;
use std::future::Future;

/// Side-effect taps and conversions on `Result<T, E>`.
pub trait ResultExt<T, E> {
    /// Run a side effect on the success value, passing the result
    /// through unchanged.
    fn tap(self, f: impl FnOnce(&T)) -> Self;

    /// Run a side effect on the error, passing the result through
    /// unchanged.
    fn tap_err(self, f: impl FnOnce(&E)) -> Self;

    /// `Right` of the success value, `Left` of the error.
    fn to_either(self) -> Either<E, T>;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn tap(self, f: impl FnOnce(&T)) -> Self {
        if let Ok(value) = &self {
            f(value);
        }
        self
    }

    fn tap_err(self, f: impl FnOnce(&E)) -> Self {
        if let Err(error) = &self {
            f(error);
        }
        self
    }

    fn to_either(self) -> Either<E, T> {
        match self {
            Ok(value) => Either::Right(value),
            Err(error) => Either::Left(error),
        }
    }
}

/// Collect results into a result of the collection; the earliest `Err`
/// short-circuits.
pub fn sequence<T, E, I>(iter: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Result<T, E>>,
{
    let iter = iter.into_iter();
    let mut out = Vec::with_capacity(iter.size_hint().0);
    for item in iter {
        out.push(item?);
    }
    Ok(out)
}

/// Map every element and sequence the results.
pub fn traverse<A, T, E, I, F>(iter: I, f: F) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = A>,
    F: FnMut(A) -> Result<T, E>,
{
    sequence(iter.into_iter().map(f))
}

/// Split into successes and failures, both in input order.
pub fn partition<T, E, I>(iter: I) -> (Vec<T>, Vec<E>)
where
    I: IntoIterator<Item = Result<T, E>>,
{
    let mut oks = Vec::new();
    let mut errs = Vec::new();
    for item in iter {
        match item {
            Ok(v) => oks.push(v),
            Err(e) => errs.push(e),
        }
    }
    (oks, errs)
}

/// Keep only the success values.
pub fn choose<T, E, I>(iter: I) -> Vec<T>
where
    I: IntoIterator<Item = Result<T, E>>,
{
    iter.into_iter().filter_map(Result::ok).collect()
}

macro_rules! result_join {
    ($name:ident, $($t:ident : $v:ident),+) => {
        /// `Ok` of the tuple iff every input is `Ok`; otherwise the
        /// leftmost failure.
        pub fn $name<$($t,)+ E>($($v: Result<$t, E>),+) -> Result<($($t,)+), E> {
            Ok(($($v?,)+))
        }
    };
}

result_join!(join2, A: a, B: b);
result_join!(join3, A: a, B: b, C: c);
result_join!(join4, A: a, B: b, C: c, D: d);
result_join!(join5, A: a, B: b, C: c, D: d, E1: e1);
result_join!(join6, A: a, B: b, C: c, D: d, E1: e1, F: f);
result_join!(join7, A: a, B: b, C: c, D: d, E1: e1, F: f, G: g);
result_join!(join8, A: a, B: b, C: c, D: d, E1: e1, F: f, G: g, H: h);

/// Await each future in order, short-circuiting on the first failure.
///
/// At most one future is in flight at a time; futures after the first
/// failure are never polled.
pub async fn sequence_async<T, E, I, Fut>(iter: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let iter = iter.into_iter();
    let mut out = Vec::with_capacity(iter.size_hint().0);
    for fut in iter {
        out.push(fut.await?);
    }
    Ok(out)
}

/// Map each element to a future and await them in order,
/// short-circuiting on the first failure.
pub async fn traverse_async<A, T, E, I, F, Fut>(iter: I, mut f: F) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = A>,
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let iter = iter.into_iter();
    let mut out = Vec::with_capacity(iter.size_hint().0);
    for item in iter {
        out.push(f(item).await?);
    }
    Ok(out)
}

/// Start every future concurrently, await them all, then sequence in
/// input order.
pub async fn sequence_parallel<T, E, I, Fut>(iter: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    sequence(futures::future::join_all(iter).await)
}

/// Map each element to a future, run them all concurrently, then
/// sequence in input order.
pub async fn traverse_parallel<A, T, E, I, F, Fut>(iter: I, f: F) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = A>,
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    sequence_parallel(iter.into_iter().map(f)).await
}
