//! The application: an ordered middleware list and the entry point that runs it.
//!
//! [`Application::fetch`] turns one inbound [`http::Request`] into exactly one outbound
//! [`http::Response`]. It builds a [`Context`], runs the composed middleware chain against
//! it, then either emits the response the middlewares built or, when the chain failed,
//! rebuilds the response from the error.

use crate::body::ResponseBody;
use crate::compose::{Composed, Layer, Middleware, MiddlewareResult, Next, compose, middleware_fn};
use crate::context::{AppInfo, Context, Handle};
use crate::error::{BoxError, ComposeError, HttpError};
use crate::plugin::{Plugin, Plugins};
use crate::request::Request;
use crate::response::Response;
use crate::status::is_empty_status;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{Method, StatusCode};
use once_cell::sync::OnceCell;
use std::error::Error as _;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

const DEFAULT_NAME: &str = "micro-fetch";
const SILENT_ENV: &str = "MICRO_FETCH_SILENT";

/// Observes every failed call before the error response is built.
pub type ErrorHook = Arc<dyn Fn(&HttpError, &Context) + Send + Sync>;

pub struct Application {
    info: Arc<AppInfo>,
    silent: bool,
    middlewares: Vec<Arc<dyn Middleware>>,
    composed: OnceCell<Composed>,
    plugins: Plugins,
    error_hook: Option<ErrorHook>,
}

pub struct ApplicationBuilder {
    name: String,
    silent: bool,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self { name: DEFAULT_NAME.to_string(), silent: false }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Suppresses the error log of the default error hook.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Reads the silent flag from `MICRO_FETCH_SILENT`; `1`, `true` and `yes` turn it on.
    pub fn silent_from_env(mut self) -> Self {
        if let Ok(value) = std::env::var(SILENT_ENV) {
            self.silent = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn build(self) -> Application {
        Application {
            info: Arc::new(AppInfo { name: self.name }),
            silent: self.silent,
            middlewares: Vec::new(),
            composed: OnceCell::new(),
            plugins: Plugins::new(),
            error_hook: None,
        }
    }
}

impl fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationBuilder").field("name", &self.name).field("silent", &self.silent).finish()
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    // setup

    /// Appends a middleware to the chain. Middlewares run in the order they were added.
    pub fn with<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self.composed = OnceCell::new();
        self
    }

    /// Appends a closure middleware, see [`middleware_fn`].
    pub fn with_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a, Context>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
    {
        self.with(middleware_fn(f))
    }

    /// Hands the application to `initializer`, which may register middlewares, plugins or
    /// an error hook in one go.
    pub fn extend<F: FnOnce(&mut Application)>(&mut self, initializer: F) -> &mut Self {
        initializer(self);
        self
    }

    /// Registers a plugin applied to every context this application creates.
    pub fn plugin<P: Plugin + 'static>(&mut self, plugin: P) -> &mut Self {
        self.plugins.add_last(plugin);
        self
    }

    /// Replaces the default error hook.
    ///
    /// The hook only observes: whatever it does, the error response is built the same way.
    pub fn on_error<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&HttpError, &Context) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    // serving

    pub fn create_context<B>(&self, request: http::Request<B>) -> Context
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        self.create_context_with(request, None, None)
    }

    pub fn create_context_with<B>(
        &self,
        request: http::Request<B>,
        env: Option<Handle>,
        execution_ctx: Option<Handle>,
    ) -> Context
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let mut ctx = Context::with_handles(Arc::clone(&self.info), Request::new(request), env, execution_ctx);
        self.plugins.apply(&mut ctx);
        ctx
    }

    pub async fn fetch<B>(&self, request: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        self.fetch_with(request, None, None).await
    }

    /// Handles one request, passing opaque host handles through to the [`Context`].
    pub async fn fetch_with<B>(
        &self,
        request: http::Request<B>,
        env: Option<Handle>,
        execution_ctx: Option<Handle>,
    ) -> http::Response<ResponseBody>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let mut ctx = self.create_context_with(request, env, execution_ctx);
        debug!(method = %ctx.req.method(), path = ctx.req.pathname(), "dispatching request");

        let result = match self.composed() {
            Ok(composed) => composed.dispatch(&mut ctx).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => respond(&mut ctx),
            Err(e) => {
                let err = HttpError::from_box(e);
                match &self.error_hook {
                    Some(hook) => hook(&err, &ctx),
                    None => self.report(&err),
                }
                ctx.on_error(&err)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.info.name })
    }

    fn composed(&self) -> Result<&Composed, ComposeError> {
        self.composed.get_or_try_init(|| {
            trace!(middlewares = self.middlewares.len(), "composing middleware chain");
            compose(self.middlewares.iter().map(|m| Layer::Single(Arc::clone(m))))
        })
    }

    /// The default error hook: logs unexpected failures, skipping 404s and exposed errors.
    fn report(&self, err: &HttpError) {
        if err.status() == StatusCode::NOT_FOUND || err.expose() || self.silent {
            return;
        }

        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        error!(
            app = %self.info.name,
            status = err.status().as_u16(),
            message = err.message(),
            causes = ?causes,
            "unhandled error"
        );
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.info.name)
            .field("silent", &self.silent)
            .field("middlewares", &self.middlewares.len())
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

/// Emits the response a successful chain left behind.
fn respond(ctx: &mut Context) -> http::Response<ResponseBody> {
    let is_head = ctx.req.method() == Method::HEAD;
    let mut res = std::mem::take(&mut ctx.res);

    if is_head {
        if !res.has(CONTENT_LENGTH.as_str()) {
            if let Some(length) = res.length() {
                res.set_length(length);
            }
        }
        return res.into_head();
    }

    if is_empty_status(res.status()) {
        res.set_null_body();
        return res.into_head();
    }

    if res.body().is_none() {
        return respond_without_body(res);
    }

    res.into_http()
}

fn respond_without_body(mut res: Response) -> http::Response<ResponseBody> {
    if res.is_null_body_explicit() {
        res.delete(CONTENT_TYPE.as_str());
        res.delete(TRANSFER_ENCODING.as_str());
        res.set_length(0);
    }
    if !res.is_status_explicit() {
        res.apply_status(StatusCode::NOT_FOUND);
    }
    res.into_head()
}
