//! Reusable result pipelines.
//!
//! A pipeline is a value wrapping `I -> Result<O, E>`: build it once,
//! run it any number of times. `then` chains fallible steps (bind),
//! `map` chains plain mappings, and the first failure short-circuits
//! the rest. `then_async` switches the pipeline into async mode;
//! subsequent sync steps are lifted automatically.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Reusable `I -> Result<O, E>` function built from composable steps.
pub struct Pipeline<I, O, E> {
    run: Arc<dyn Fn(I) -> Result<O, E> + Send + Sync>,
}

impl<I, O, E> Clone for Pipeline<I, O, E> {
    fn clone(&self) -> Self {
        Self { run: self.run.clone() }
    }
}

impl<I, O, E> Pipeline<I, O, E>
where
    I: 'static,
    O: 'static,
    E: 'static,
{
    /// Pipeline from an initial fallible step.
    pub fn new(f: impl Fn(I) -> Result<O, E> + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(f) }
    }

    /// Chain a fallible step onto the success value.
    pub fn then<U: 'static>(
        self,
        f: impl Fn(O) -> Result<U, E> + Send + Sync + 'static,
    ) -> Pipeline<I, U, E> {
        let prev = self.run;
        Pipeline { run: Arc::new(move |input| (*prev)(input).and_then(&f)) }
    }

    /// Chain a plain mapping onto the success value.
    pub fn map<U: 'static>(self, f: impl Fn(O) -> U + Send + Sync + 'static) -> Pipeline<I, U, E> {
        let prev = self.run;
        Pipeline { run: Arc::new(move |input| (*prev)(input).map(&f)) }
    }

    /// Chain an async fallible step, switching into async mode.
    pub fn then_async<U, F, Fut>(self, f: F) -> AsyncPipeline<I, U, E>
    where
        U: 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
        I: Send,
        O: Send,
        E: Send,
    {
        let prev = self.run;
        AsyncPipeline {
            run: Arc::new(move |input| {
                let staged = (*prev)(input);
                let fut = staged.map(&f);
                Box::pin(async move {
                    match fut {
                        Ok(fut) => fut.await,
                        Err(e) => Err(e),
                    }
                })
            }),
        }
    }

    /// Run the pipeline on an input.
    pub fn run(&self, input: I) -> Result<O, E> {
        (*self.run)(input)
    }
}

/// Async form of [`Pipeline`]; steps return boxed futures.
pub struct AsyncPipeline<I, O, E> {
    run: Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, E>> + Send + Sync>,
}

impl<I, O, E> Clone for AsyncPipeline<I, O, E> {
    fn clone(&self) -> Self {
        Self { run: self.run.clone() }
    }
}

impl<I, O, E> AsyncPipeline<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Async pipeline from an initial async fallible step.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        Self { run: Arc::new(move |input| Box::pin(f(input))) }
    }

    /// Chain an async fallible step.
    pub fn then_async<U, F, Fut>(self, f: F) -> AsyncPipeline<I, U, E>
    where
        U: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        let prev = self.run;
        let f = Arc::new(f);
        AsyncPipeline {
            run: Arc::new(move |input| {
                let staged = (*prev)(input);
                let f = f.clone();
                Box::pin(async move {
                    let value = staged.await?;
                    (*f)(value).await
                })
            }),
        }
    }

    /// Chain a sync fallible step, lifted into the async flow.
    pub fn then<U>(
        self,
        f: impl Fn(O) -> Result<U, E> + Send + Sync + 'static,
    ) -> AsyncPipeline<I, U, E>
    where
        U: Send + 'static,
    {
        let prev = self.run;
        let f = Arc::new(f);
        AsyncPipeline {
            run: Arc::new(move |input| {
                let staged = (*prev)(input);
                let f = f.clone();
                Box::pin(async move { (*f)(staged.await?) })
            }),
        }
    }

    /// Chain a plain mapping, lifted into the async flow.
    pub fn map<U>(self, f: impl Fn(O) -> U + Send + Sync + 'static) -> AsyncPipeline<I, U, E>
    where
        U: Send + 'static,
    {
        let prev = self.run;
        let f = Arc::new(f);
        AsyncPipeline {
            run: Arc::new(move |input| {
                let staged = (*prev)(input);
                let f = f.clone();
                Box::pin(async move { Ok((*f)(staged.await?)) })
            }),
        }
    }

    /// Run the pipeline on an input.
    pub async fn run(&self, input: I) -> Result<O, E> {
        (*self.run)(input).await
    }
}
