//! An onion-style request handling core
//!
//! This crate turns an [`http::Request`] into an [`http::Response`] by running it through an
//! ordered chain of middlewares. It does not own a socket: a host (a server loop, a test, a
//! serverless runtime) hands requests to [`Application::fetch`] and sends back what it returns.
//!
//! # Features
//!
//! - Koa-style onion middlewares, each wrapping everything registered after it
//! - A lazy [`Request`] view: url, query and headers are parsed on first access
//! - A mutable [`Response`] builder that infers `Content-Type` and `Content-Length` from its body
//! - Typed [`HttpError`]s, turned into deterministic error responses
//! - Per-application [`Plugin`]s for installing shared capabilities
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http_body_util::{BodyExt, Full};
//! use micro_fetch::Application;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut app = Application::new();
//! app.with_fn(|ctx, next| {
//!     Box::pin(async move {
//!         next.run(ctx).await?;
//!         ctx.res.set("x-handled-by", "micro-fetch")?;
//!         Ok(())
//!     })
//! });
//! app.with_fn(|ctx, _next| {
//!     Box::pin(async move {
//!         let name = ctx.req.query().get("name").and_then(|v| v.first()).unwrap_or("world").to_string();
//!         ctx.res.set_body(format!("hello {name}"));
//!         Ok(())
//!     })
//! });
//!
//! let request = http::Request::get("http://localhost/?name=fetch").body(Full::new(Bytes::new())).unwrap();
//! let response = app.fetch(request).await;
//!
//! assert_eq!(response.headers()["x-handled-by"], "micro-fetch");
//! let body = response.into_body().collect().await.unwrap().to_bytes();
//! assert_eq!(body, "hello fetch");
//! # }
//! ```

mod application;
mod body;
mod compose;
mod context;
mod error;
mod headers;
mod plugin;
mod query;
mod request;
mod response;

pub mod status;
pub mod utils;

pub use application::Application;
pub use application::ApplicationBuilder;
pub use application::ErrorHook;
pub use body::Blob;
pub use body::Body;
pub use body::BoxBody;
pub use body::FormData;
pub use body::FormDataValue;
pub use body::ResponseBody;
pub use body::boxed;
pub use compose::Composed;
pub use compose::FnMiddleware;
pub use compose::Layer;
pub use compose::Middleware;
pub use compose::MiddlewareResult;
pub use compose::Next;
pub use compose::compose;
pub use compose::middleware_fn;
pub use context::AppInfo;
pub use context::Context;
pub use context::Handle;
pub use context::State;
pub use error::BodyError;
pub use error::BoxError;
pub use error::ComposeError;
pub use error::HeaderError;
pub use error::HttpError;
pub use error::HttpErrorOptions;
pub use error::StatusError;
pub use error::ThrownValue;
pub use error::UrlError;
pub use headers::HeaderView;
pub use plugin::Plugin;
pub use plugin::Plugins;
pub use query::Query;
pub use query::QueryValue;
pub use request::Request;
pub use response::Response;
pub use response::StatusText;

pub use async_trait::async_trait;
