//! Accumulating validation outcome.
//!
//! `Validation<T, E>` is `Valid(T)` or `Invalid(errors)` where the error
//! list is non-empty and ordered by combination order (left to right).
//! Unlike `Result`, the applicative combinators (`apply`, `zip_with`,
//! `join`, `sequence`) collect errors from *every* failed input instead
//! of stopping at the first. `bind` is the exception: it cannot run its
//! continuation without a value, so it short-circuits.
//!
//! Errors are never deduplicated; the same validator may contribute
//! several entries.

/// Outcome of a validation: a value or a non-empty list of errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation<T, E> {
    Valid(T),
    Invalid(Vec<E>),
}

impl<T, E> Validation<T, E> {
    /// Create a valid outcome.
    pub fn valid(value: T) -> Self {
        Self::Valid(value)
    }

    /// Create an invalid outcome from a single error.
    pub fn invalid(error: E) -> Self {
        Self::Invalid(vec![error])
    }

    /// Create an invalid outcome from a list of errors.
    ///
    /// The list must be non-empty; an empty list violates the type's
    /// invariant and asserts.
    pub fn invalid_many(errors: Vec<E>) -> Self {
        assert!(!errors.is_empty(), "Validation::invalid_many requires at least one error");
        Self::Invalid(errors)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// Borrow the value if valid.
    pub fn valid_value(&self) -> Option<&T> {
        match self {
            Self::Valid(v) => Some(v),
            Self::Invalid(_) => None,
        }
    }

    /// Borrow the errors if invalid.
    pub fn errors(&self) -> Option<&[E]> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(es) => Some(es),
        }
    }

    /// Extract the value if valid.
    pub fn into_valid(self) -> Option<T> {
        match self {
            Self::Valid(v) => Some(v),
            Self::Invalid(_) => None,
        }
    }

    /// Transform the value, leaving errors untouched.
    pub fn map<U, F>(self, f: F) -> Validation<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Valid(v) => Validation::Valid(f(v)),
            Self::Invalid(es) => Validation::Invalid(es),
        }
    }

    /// Chain a validation-producing continuation.
    ///
    /// Short-circuits on `Invalid`: the continuation's errors are never
    /// combined with the existing ones.
    pub fn bind<U, F>(self, f: F) -> Validation<U, E>
    where
        F: FnOnce(T) -> Validation<U, E>,
    {
        match self {
            Self::Valid(v) => f(v),
            Self::Invalid(es) => Validation::Invalid(es),
        }
    }

    /// Collapse both variants into a single value.
    pub fn fold<R>(self, on_valid: impl FnOnce(T) -> R, on_invalid: impl FnOnce(Vec<E>) -> R) -> R {
        match self {
            Self::Valid(v) => on_valid(v),
            Self::Invalid(es) => on_invalid(es),
        }
    }

    /// Run a side effect on the value, passing the validation through.
    pub fn tap(self, f: impl FnOnce(&T)) -> Self {
        if let Self::Valid(v) = &self {
            f(v);
        }
        self
    }

    /// Run a side effect on the errors, passing the validation through.
    pub fn tap_invalid(self, f: impl FnOnce(&[E])) -> Self {
        if let Self::Invalid(es) = &self {
            f(es);
        }
        self
    }

    /// Convert to a `Result`, keeping only the first error.
    pub fn to_result(self) -> Result<T, E> {
        match self {
            Self::Valid(v) => Ok(v),
            Self::Invalid(es) => match es.into_iter().next() {
                Some(e) => Err(e),
                None => unreachable!("Invalid holds at least one error"),
            },
        }
    }

    /// Extract the value or panic with the accumulated errors.
    pub fn expect_valid(self, msg: &str) -> T
    where
        E: std::fmt::Debug,
    {
        match self {
            Self::Valid(v) => v,
            Self::Invalid(es) => panic!("{msg}: {es:?}"),
        }
    }
}

impl<F, E> Validation<F, E> {
    /// Apply a validated function to a validated value.
    ///
    /// When both are invalid the error lists concatenate, the
    /// function's errors first.
    pub fn apply<T, U>(self, value: Validation<T, E>) -> Validation<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match (self, value) {
            (Validation::Valid(f), Validation::Valid(v)) => Validation::Valid(f(v)),
            (Validation::Valid(_), Validation::Invalid(es)) => Validation::Invalid(es),
            (Validation::Invalid(es), Validation::Valid(_)) => Validation::Invalid(es),
            (Validation::Invalid(mut fe), Validation::Invalid(ve)) => {
                fe.extend(ve);
                Validation::Invalid(fe)
            }
        }
    }
}

impl<T, E> From<Result<T, E>> for Validation<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Valid(v),
            Err(e) => Self::invalid(e),
        }
    }
}

/// Collect validations into a validation of the collection.
///
/// `Valid` iff every input is valid; otherwise `Invalid` with every
/// error, concatenated in input order.
pub fn sequence<T, E, I>(iter: I) -> Validation<Vec<T>, E>
where
    I: IntoIterator<Item = Validation<T, E>>,
{
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for item in iter {
        match item {
            Validation::Valid(v) => values.push(v),
            Validation::Invalid(es) => errors.extend(es),
        }
    }
    if errors.is_empty() {
        Validation::Valid(values)
    } else {
        Validation::Invalid(errors)
    }
}

/// Map every element and sequence the results.
pub fn traverse<A, T, E, I, F>(iter: I, f: F) -> Validation<Vec<T>, E>
where
    I: IntoIterator<Item = A>,
    F: FnMut(A) -> Validation<T, E>,
{
    sequence(iter.into_iter().map(f))
}

macro_rules! validation_zip {
    ($zip:ident, $join:ident, $($t:ident : $v:ident),+) => {
        /// Combine validations with a projection, accumulating errors
        /// from every invalid input in argument order.
        #[allow(clippy::too_many_arguments)]
        pub fn $zip<$($t,)+ R, E, F>($($v: Validation<$t, E>,)+ f: F) -> Validation<R, E>
        where
            F: FnOnce($($t),+) -> R,
        {
            let mut errors: Vec<E> = Vec::new();
            $(
                let $v = match $v {
                    Validation::Valid(v) => Some(v),
                    Validation::Invalid(es) => {
                        errors.extend(es);
                        None
                    }
                };
            )+
            if errors.is_empty() {
                match ($($v,)+) {
                    ($(Some($v),)+) => Validation::Valid(f($($v),+)),
                    _ => unreachable!("no errors implies every input was valid"),
                }
            } else {
                Validation::Invalid(errors)
            }
        }

        /// Combine validations into a tuple, accumulating errors from
        /// every invalid input in argument order.
        #[allow(clippy::too_many_arguments)]
        pub fn $join<$($t,)+ E>($($v: Validation<$t, E>),+) -> Validation<($($t,)+), E> {
            $zip($($v,)+ |$($v),+| ($($v,)+))
        }
    };
}

validation_zip!(zip_with2, join2, A: a, B: b);
validation_zip!(zip_with3, join3, A: a, B: b, C: c);
validation_zip!(zip_with4, join4, A: a, B: b, C: c, D: d);
validation_zip!(zip_with5, join5, A: a, B: b, C: c, D: d, E1: e1);
validation_zip!(zip_with6, join6, A: a, B: b, C: c, D: d, E1: e1, F1: f1);
validation_zip!(zip_with7, join7, A: a, B: b, C: c, D: d, E1: e1, F1: f1, G: g);
validation_zip!(zip_with8, join8, A: a, B: b, C: c, D: d, E1: e1, F1: f1, G: g, H: h);
