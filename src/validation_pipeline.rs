//! Fan-out validation pipelines.
//!
//! Every step receives the *same original input* and contributes its
//! own `Validation`; `build(combiner)` produces a reusable function
//! that runs all steps, concatenates the errors of every invalid step
//! in declaration order, and applies the combiner iff all steps were
//! valid. Arity-1 pipelines build without a combiner.
//!
//! The async variant runs all steps concurrently and still combines
//! results in declaration order, regardless of completion order. A
//! single `and_async` step switches a sync pipeline into async mode,
//! lifting the already-declared sync steps.

use crate::validation::{self, Validation};
use futures::future::BoxFuture;
use std::sync::Arc;

type SyncStep<I, T, E> = Arc<dyn Fn(&I) -> Validation<T, E> + Send + Sync>;
type AsyncStep<I, T, E> =
    Arc<dyn for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<T, E>> + Send + Sync>;

fn lift<I: 'static, T, E>(step: SyncStep<I, T, E>) -> AsyncStep<I, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    Arc::new(move |input| {
        let outcome = (*step)(input);
        Box::pin(std::future::ready(outcome))
    })
}

/// Start a pipeline from its first (sync) step.
pub fn validate<I, T1, E>(
    step: impl Fn(&I) -> Validation<T1, E> + Send + Sync + 'static,
) -> ValidationPipeline1<I, T1, E> {
    ValidationPipeline1 { s1: Arc::new(step) }
}

/// Start a pipeline from its first async step.
pub fn validate_async<I, T1, E>(
    step: impl for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<T1, E>> + Send + Sync + 'static,
) -> AsyncValidationPipeline1<I, T1, E> {
    AsyncValidationPipeline1 { s1: Arc::new(step) }
}

/// Single-step pipeline; builds without a combiner.
pub struct ValidationPipeline1<I, T1, E> {
    s1: SyncStep<I, T1, E>,
}

impl<I, T1, E> ValidationPipeline1<I, T1, E>
where
    I: 'static,
    T1: 'static,
    E: 'static,
{
    pub fn and<T2: 'static>(
        self,
        step: impl Fn(&I) -> Validation<T2, E> + Send + Sync + 'static,
    ) -> ValidationPipeline2<I, T1, T2, E> {
        ValidationPipeline2 { s1: self.s1, s2: Arc::new(step) }
    }

    pub fn and_async<T2>(
        self,
        step: impl for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<T2, E>> + Send + Sync + 'static,
    ) -> AsyncValidationPipeline2<I, T1, T2, E>
    where
        T1: Send,
        T2: Send + 'static,
        E: Send,
    {
        AsyncValidationPipeline2 { s1: lift(self.s1), s2: Arc::new(step) }
    }

    pub fn build(self) -> impl Fn(&I) -> Validation<T1, E> + Send + Sync {
        let Self { s1 } = self;
        move |input: &I| (*s1)(input)
    }
}

/// Single-step async pipeline; builds without a combiner.
pub struct AsyncValidationPipeline1<I, T1, E> {
    s1: AsyncStep<I, T1, E>,
}

impl<I, T1, E> AsyncValidationPipeline1<I, T1, E>
where
    I: Send + Sync + 'static,
    T1: Send + 'static,
    E: Send + 'static,
{
    pub fn and<T2>(
        self,
        step: impl Fn(&I) -> Validation<T2, E> + Send + Sync + 'static,
    ) -> AsyncValidationPipeline2<I, T1, T2, E>
    where
        T2: Send + 'static,
    {
        AsyncValidationPipeline2 { s1: self.s1, s2: lift(Arc::new(step)) }
    }

    pub fn and_async<T2>(
        self,
        step: impl for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<T2, E>> + Send + Sync + 'static,
    ) -> AsyncValidationPipeline2<I, T1, T2, E>
    where
        T2: Send + 'static,
    {
        AsyncValidationPipeline2 { s1: self.s1, s2: Arc::new(step) }
    }

    /// Build the async function; it owns its input so the returned
    /// future is `'static`.
    pub fn build(self) -> impl Fn(I) -> BoxFuture<'static, Validation<T1, E>> + Send + Sync {
        let Self { s1 } = self;
        move |input: I| {
            let s1 = s1.clone();
            Box::pin(async move { (*s1)(&input).await })
        }
    }
}

macro_rules! fan_out_stage {
    (
        $name:ident, $async_name:ident, $zip:ident,
        next($next:ident, $async_next:ident, $nt:ident, $ns:ident),
        steps($($t:ident => $s:ident),+)
    ) => {
        fan_out_stage!(@sync $name, $async_name, $zip, steps($($t => $s),+));
        fan_out_stage!(@async $name, $async_name, $zip, steps($($t => $s),+));

        impl<I, $($t,)+ E> $name<I, $($t,)+ E>
        where
            I: 'static,
            $($t: 'static,)+
            E: 'static,
        {
            pub fn and<$nt: 'static>(
                self,
                step: impl Fn(&I) -> Validation<$nt, E> + Send + Sync + 'static,
            ) -> $next<I, $($t,)+ $nt, E> {
                $next { $($s: self.$s,)+ $ns: Arc::new(step) }
            }

            pub fn and_async<$nt>(
                self,
                step: impl for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<$nt, E>>
                    + Send
                    + Sync
                    + 'static,
            ) -> $async_next<I, $($t,)+ $nt, E>
            where
                $nt: Send + 'static,
                $($t: Send,)+
                E: Send,
            {
                $async_next { $($s: lift(self.$s),)+ $ns: Arc::new(step) }
            }
        }

        impl<I, $($t,)+ E> $async_name<I, $($t,)+ E>
        where
            I: Send + Sync + 'static,
            $($t: Send + 'static,)+
            E: Send + 'static,
        {
            pub fn and<$nt>(
                self,
                step: impl Fn(&I) -> Validation<$nt, E> + Send + Sync + 'static,
            ) -> $async_next<I, $($t,)+ $nt, E>
            where
                $nt: Send + 'static,
            {
                $async_next { $($s: self.$s,)+ $ns: lift(Arc::new(step)) }
            }

            pub fn and_async<$nt>(
                self,
                step: impl for<'a> Fn(&'a I) -> BoxFuture<'a, Validation<$nt, E>>
                    + Send
                    + Sync
                    + 'static,
            ) -> $async_next<I, $($t,)+ $nt, E>
            where
                $nt: Send + 'static,
            {
                $async_next { $($s: self.$s,)+ $ns: Arc::new(step) }
            }
        }
    };

    (
        $name:ident, $async_name:ident, $zip:ident, last,
        steps($($t:ident => $s:ident),+)
    ) => {
        fan_out_stage!(@sync $name, $async_name, $zip, steps($($t => $s),+));
        fan_out_stage!(@async $name, $async_name, $zip, steps($($t => $s),+));
    };

    (@sync $name:ident, $async_name:ident, $zip:ident, steps($($t:ident => $s:ident),+)) => {
        pub struct $name<I, $($t,)+ E> {
            $($s: SyncStep<I, $t, E>,)+
        }

        impl<I, $($t,)+ E> $name<I, $($t,)+ E>
        where
            I: 'static,
            $($t: 'static,)+
            E: 'static,
        {
            /// Build the fan-out function. Every step runs on each
            /// invocation; errors concatenate in declaration order.
            pub fn build<R>(
                self,
                combiner: impl Fn($($t),+) -> R + Send + Sync + 'static,
            ) -> impl Fn(&I) -> Validation<R, E> + Send + Sync {
                let Self { $($s),+ } = self;
                move |input: &I| {
                    $(let $s = (*$s)(input);)+
                    validation::$zip($($s,)+ |$($s),+| combiner($($s),+))
                }
            }
        }
    };

    (@async $name:ident, $async_name:ident, $zip:ident, steps($($t:ident => $s:ident),+)) => {
        pub struct $async_name<I, $($t,)+ E> {
            $($s: AsyncStep<I, $t, E>,)+
        }

        impl<I, $($t,)+ E> $async_name<I, $($t,)+ E>
        where
            I: Send + Sync + 'static,
            $($t: Send + 'static,)+
            E: Send + 'static,
        {
            /// Build the async fan-out function. All steps start
            /// concurrently; results combine in declaration order. The
            /// function owns its input so the returned future is
            /// `'static`.
            pub fn build<R>(
                self,
                combiner: impl Fn($($t),+) -> R + Clone + Send + Sync + 'static,
            ) -> impl Fn(I) -> BoxFuture<'static, Validation<R, E>> + Send + Sync
            where
                R: Send + 'static,
            {
                let Self { $($s),+ } = self;
                move |input: I| {
                    $(let $s = $s.clone();)+
                    let combiner = combiner.clone();
                    Box::pin(async move {
                        let ($($s,)+) = futures::join!($((*$s)(&input)),+);
                        validation::$zip($($s,)+ move |$($s),+| combiner($($s),+))
                    })
                }
            }
        }
    };
}

fan_out_stage!(
    ValidationPipeline2, AsyncValidationPipeline2, zip_with2,
    next(ValidationPipeline3, AsyncValidationPipeline3, T3, s3),
    steps(T1 => s1, T2 => s2)
);
fan_out_stage!(
    ValidationPipeline3, AsyncValidationPipeline3, zip_with3,
    next(ValidationPipeline4, AsyncValidationPipeline4, T4, s4),
    steps(T1 => s1, T2 => s2, T3 => s3)
);
fan_out_stage!(
    ValidationPipeline4, AsyncValidationPipeline4, zip_with4,
    next(ValidationPipeline5, AsyncValidationPipeline5, T5, s5),
    steps(T1 => s1, T2 => s2, T3 => s3, T4 => s4)
);
fan_out_stage!(
    ValidationPipeline5, AsyncValidationPipeline5, zip_with5,
    next(ValidationPipeline6, AsyncValidationPipeline6, T6, s6),
    steps(T1 => s1, T2 => s2, T3 => s3, T4 => s4, T5 => s5)
);
fan_out_stage!(
    ValidationPipeline6, AsyncValidationPipeline6, zip_with6,
    next(ValidationPipeline7, AsyncValidationPipeline7, T7, s7),
    steps(T1 => s1, T2 => s2, T3 => s3, T4 => s4, T5 => s5, T6 => s6)
);
fan_out_stage!(
    ValidationPipeline7, AsyncValidationPipeline7, zip_with7,
    next(ValidationPipeline8, AsyncValidationPipeline8, T8, s8),
    steps(T1 => s1, T2 => s2, T3 => s3, T4 => s4, T5 => s5, T6 => s6, T7 => s7)
);
fan_out_stage!(
    ValidationPipeline8, AsyncValidationPipeline8, zip_with8, last,
    steps(T1 => s1, T2 => s2, T3 => s3, T4 => s4, T5 => s5, T6 => s6, T7 => s7, T8 => s8)
);
