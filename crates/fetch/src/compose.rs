//! Onion-style middleware composition.
//!
//! [`compose`] turns an ordered list of [`Middleware`]s into a single [`Composed`] dispatcher.
//! Each middleware receives a [`Next`] cursor; awaiting [`Next::run`] executes the rest of
//! the chain, so code placed before that call runs on the way in and code placed after it
//! runs on the way out, in reverse order:
//!
//! ```text
//!     m0 ──▶ m1 ──▶ m2 ──▶ terminal
//!     m0 ◀── m1 ◀── m2 ◀──┘
//! ```
//!
//! A middleware that returns without running `next` short-circuits everything after it.
//! Since [`Next::run`] takes `self`, the downstream chain can be entered at most once per
//! middleware invocation.
//!
//! The chain is generic over the context type, which keeps this module independent of
//! [`Context`](crate::Context).

use crate::context::Context;
use crate::error::{BoxError, ComposeError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub type MiddlewareResult = Result<(), BoxError>;

#[async_trait]
pub trait Middleware<C: Send = Context>: Send + Sync {
    async fn handle(&self, ctx: &mut C, next: Next<'_, C>) -> MiddlewareResult;
}

/// The remaining part of a composed chain.
pub struct Next<'a, C: Send> {
    chain: &'a [Arc<dyn Middleware<C>>],
    index: usize,
    terminal: Option<&'a dyn Middleware<C>>,
}

impl<'a, C: Send> Next<'a, C> {
    /// Runs the rest of the chain, then the terminal middleware if there is one.
    pub async fn run(self, ctx: &mut C) -> MiddlewareResult {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = Next { chain: self.chain, index: self.index + 1, terminal: self.terminal };
                middleware.handle(ctx, next).await
            }
            None => match self.terminal {
                Some(terminal) => {
                    // the terminal sees an exhausted chain
                    let next = Next { chain: self.chain, index: self.chain.len(), terminal: None };
                    terminal.handle(ctx, next).await
                }
                None => Ok(()),
            },
        }
    }

    /// Number of middlewares still ahead, terminal included.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index) + usize::from(self.terminal.is_some())
    }
}

impl<C: Send> fmt::Debug for Next<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).field("remaining", &self.remaining()).finish()
    }
}

/// An entry passed to [`compose`]: one middleware or a named group of them.
pub enum Layer<C: Send = Context> {
    Single(Arc<dyn Middleware<C>>),
    Bundle(Vec<Layer<C>>),
}

impl<C: Send> Layer<C> {
    pub fn single<M: Middleware<C> + 'static>(middleware: M) -> Self {
        Layer::Single(Arc::new(middleware))
    }

    pub fn bundle(layers: impl IntoIterator<Item = Layer<C>>) -> Self {
        Layer::Bundle(layers.into_iter().collect())
    }
}

impl<C: Send> fmt::Debug for Layer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Single(_) => f.write_str("Single"),
            Layer::Bundle(layers) => f.debug_tuple("Bundle").field(layers).finish(),
        }
    }
}

impl<C: Send> From<Arc<dyn Middleware<C>>> for Layer<C> {
    fn from(middleware: Arc<dyn Middleware<C>>) -> Self {
        Layer::Single(middleware)
    }
}

impl<C: Send> From<Vec<Layer<C>>> for Layer<C> {
    fn from(layers: Vec<Layer<C>>) -> Self {
        Layer::Bundle(layers)
    }
}

/// A dispatcher built by [`compose`].
pub struct Composed<C: Send = Context> {
    chain: Vec<Arc<dyn Middleware<C>>>,
}

impl<C: Send> Composed<C> {
    pub async fn dispatch(&self, ctx: &mut C) -> MiddlewareResult {
        self.dispatch_with(ctx, None).await
    }

    /// Runs the chain with `terminal` invoked once every middleware has called `next`.
    pub async fn dispatch_with(&self, ctx: &mut C, terminal: Option<&dyn Middleware<C>>) -> MiddlewareResult {
        Next { chain: &self.chain, index: 0, terminal }.run(ctx).await
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl<C: Send> Clone for Composed<C> {
    fn clone(&self) -> Self {
        Self { chain: self.chain.clone() }
    }
}

impl<C: Send> fmt::Debug for Composed<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composed").field("len", &self.chain.len()).finish()
    }
}

/// Flattens `layers` one level and builds a dispatcher running them in order.
///
/// A bundle nested inside another bundle is still a bundle after that flattening and is
/// rejected with [`ComposeError::NotInvocable`], reporting its position in the flattened list.
pub fn compose<C, I>(layers: I) -> Result<Composed<C>, ComposeError>
where
    C: Send,
    I: IntoIterator<Item = Layer<C>>,
{
    let mut flattened = Vec::new();
    for layer in layers {
        match layer {
            Layer::Bundle(inner) => flattened.extend(inner),
            single => flattened.push(single),
        }
    }

    let chain = flattened
        .into_iter()
        .enumerate()
        .map(|(index, layer)| match layer {
            Layer::Single(middleware) => Ok(middleware),
            Layer::Bundle(_) => Err(ComposeError::NotInvocable { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Composed { chain })
}

/// A middleware backed by a closure.
pub struct FnMiddleware<F> {
    f: F,
}

/// Wraps a closure into a [`Middleware`].
///
/// The closure returns a boxed future borrowing the context:
///
/// ```ignore
/// let logger = middleware_fn(|ctx: &mut Context, next| Box::pin(async move {
///     let started = std::time::Instant::now();
///     next.run(ctx).await?;
///     tracing::info!(elapsed = ?started.elapsed(), "request handled");
///     Ok(())
/// }));
/// ```
pub fn middleware_fn<C, F>(f: F) -> FnMiddleware<F>
where
    C: Send,
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    FnMiddleware { f }
}

#[async_trait]
impl<C, F> Middleware<C> for FnMiddleware<F>
where
    C: Send,
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    async fn handle(&self, ctx: &mut C, next: Next<'_, C>) -> MiddlewareResult {
        (self.f)(ctx, next).await
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    type Trace = Vec<String>;

    fn step(f: impl for<'a> Fn(&'a mut Trace, Next<'a, Trace>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static) -> Layer<Trace> {
        Layer::single(middleware_fn(f))
    }

    fn onion(n: usize) -> Layer<Trace> {
        step(move |trace, next| {
            Box::pin(async move {
                trace.push(format!("enter {n}"));
                next.run(trace).await?;
                trace.push(format!("exit {n}"));
                Ok(())
            })
        })
    }

    struct Terminal;

    #[async_trait]
    impl Middleware<Trace> for Terminal {
        async fn handle(&self, trace: &mut Trace, next: Next<'_, Trace>) -> MiddlewareResult {
            assert_eq!(next.remaining(), 0);
            trace.push("terminal".into());
            next.run(trace).await
        }
    }

    #[tokio::test]
    async fn test_onion_order() {
        let composed = compose(vec![onion(0), onion(1), onion(2)]).unwrap();
        let mut trace = Trace::new();

        composed.dispatch_with(&mut trace, Some(&Terminal)).await.unwrap();

        assert_eq!(trace, ["enter 0", "enter 1", "enter 2", "terminal", "exit 2", "exit 1", "exit 0"]);
    }

    #[tokio::test]
    async fn test_onion_with_awaits() {
        let sleepy = |n: usize| {
            step(move |trace, next| {
                Box::pin(async move {
                    trace.push(format!("{}", n * 2 + 1));
                    tokio::task::yield_now().await;
                    next.run(trace).await?;
                    tokio::task::yield_now().await;
                    trace.push(format!("{}", n * 2 + 2));
                    Ok(())
                })
            })
        };

        let composed = compose(vec![sleepy(0), sleepy(1)]).unwrap();
        let mut trace = Trace::new();
        composed.dispatch(&mut trace).await.unwrap();

        assert_eq!(trace, ["1", "3", "4", "2"]);
    }

    #[tokio::test]
    async fn test_empty_chain_runs_terminal_once() {
        let composed = compose(Vec::<Layer<Trace>>::new()).unwrap();
        assert!(composed.is_empty());

        let mut trace = Trace::new();
        composed.dispatch_with(&mut trace, Some(&Terminal)).await.unwrap();
        assert_eq!(trace, ["terminal"]);

        let mut trace = Trace::new();
        composed.dispatch(&mut trace).await.unwrap();
        assert!(trace.is_empty());
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let stop = step(|trace, _next| {
            Box::pin(async move {
                trace.push("stop".into());
                Ok(())
            })
        });

        let composed = compose(vec![onion(0), stop, onion(2)]).unwrap();
        let mut trace = Trace::new();
        composed.dispatch_with(&mut trace, Some(&Terminal)).await.unwrap();

        assert_eq!(trace, ["enter 0", "stop", "exit 0"]);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let fail = step(|trace, _next| {
            Box::pin(async move {
                trace.push("fail".into());
                Err(io::Error::other("boom").into())
            })
        });

        let composed = compose(vec![onion(0), fail, onion(2)]).unwrap();
        let mut trace = Trace::new();
        let err = composed.dispatch(&mut trace).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        // the failing layer unwinds through `?`, skipping the post-next code above it
        assert_eq!(trace, ["enter 0", "fail"]);
    }

    #[tokio::test]
    async fn test_error_can_be_caught_upstream() {
        let catcher = step(|trace, next| {
            Box::pin(async move {
                if let Err(err) = next.run(trace).await {
                    trace.push(format!("caught {err}"));
                }
                Ok(())
            })
        });
        let fail = step(|_trace, _next| Box::pin(async move { Err(io::Error::other("boom").into()) }));

        let composed = compose(vec![catcher, fail]).unwrap();
        let mut trace = Trace::new();
        composed.dispatch(&mut trace).await.unwrap();

        assert_eq!(trace, ["caught boom"]);
    }

    #[tokio::test]
    async fn test_bundles_are_flattened() {
        let composed = compose(vec![onion(0), Layer::bundle([onion(1), onion(2)]), onion(3)]).unwrap();
        assert_eq!(composed.len(), 4);

        let mut trace = Trace::new();
        composed.dispatch(&mut trace).await.unwrap();
        assert_eq!(trace.len(), 8);
        assert_eq!(trace[3], "enter 3");
    }

    #[test]
    fn test_nested_bundle_is_rejected() {
        let nested = Layer::bundle([onion(1), Layer::bundle([onion(2)])]);
        let result = compose(vec![onion(0), nested]);

        assert!(matches!(result, Err(ComposeError::NotInvocable { index: 2 })));
    }

    #[tokio::test]
    async fn test_composed_is_reusable() {
        let composed = compose(vec![onion(0)]).unwrap();

        for _ in 0..3 {
            let mut trace = Trace::new();
            composed.dispatch(&mut trace).await.unwrap();
            assert_eq!(trace, ["enter 0", "exit 0"]);
        }
    }
}
