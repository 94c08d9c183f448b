use crate::body::ResponseBody;
use crate::error::{HttpError, HttpErrorOptions};
use crate::request::Request;
use crate::response::Response;
use crate::status::status_text;
use crate::utils::TEXT_TYPE;
use http::{Extensions, StatusCode};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// An opaque handle passed through from the host, such as platform bindings.
pub type Handle = Arc<dyn Any + Send + Sync>;

/// Request-scoped values shared between middlewares.
pub type State = HashMap<String, serde_json::Value>;

/// What a [`Context`] knows about the application serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
}

/// Everything a middleware sees of one call: the request, the response being built and
/// request-scoped state.
pub struct Context {
    app: Arc<AppInfo>,
    env: Option<Handle>,
    execution_ctx: Option<Handle>,
    pub state: State,
    pub extensions: Extensions,
    pub req: Request,
    pub res: Response,
}

impl Context {
    pub fn new(app: Arc<AppInfo>, req: Request) -> Self {
        Self::with_handles(app, req, None, None)
    }

    pub fn with_handles(app: Arc<AppInfo>, req: Request, env: Option<Handle>, execution_ctx: Option<Handle>) -> Self {
        Self {
            app,
            env,
            execution_ctx,
            state: State::new(),
            extensions: Extensions::new(),
            req,
            res: Response::new(),
        }
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    /// The environment handle, if the host passed one of type `T`.
    pub fn env<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.env.as_deref().and_then(|env| env.downcast_ref::<T>())
    }

    pub fn execution_ctx<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.execution_ctx.as_deref().and_then(|ctx| ctx.downcast_ref::<T>())
    }

    /// Builds an [`HttpError`] for the caller to return:
    ///
    /// ```ignore
    /// return Err(ctx.throw(401, "login required").into());
    /// ```
    pub fn throw(&self, status: u16, options: impl Into<HttpErrorOptions>) -> HttpError {
        HttpError::with_options(status, options)
    }

    /// Fails with an [`HttpError`] unless `value` holds.
    pub fn assert(&self, value: bool, status: u16, options: impl Into<HttpErrorOptions>) -> Result<(), HttpError> {
        if value { Ok(()) } else { Err(HttpError::with_options(status, options)) }
    }

    /// Rebuilds the response from `err` and emits it.
    ///
    /// Every header set so far is dropped, so nothing from a half-built success response
    /// leaks into the error response. Only the error's own headers survive. The body is the
    /// error message when it is exposed, the reason phrase of the status otherwise.
    pub fn on_error(&mut self, err: &HttpError) -> http::Response<ResponseBody> {
        let res = &mut self.res;
        res.clear_headers();
        for (name, value) in err.headers() {
            if let Err(e) = res.set(name, value) {
                warn!(header = %name, error = %e, "dropping invalid error header");
            }
        }
        res.set_static_type(TEXT_TYPE);

        let status = match status_text(err.status().as_u16()) {
            Some(_) => err.status(),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if err.expose() {
            err.message().to_string()
        } else {
            status_text(status.as_u16()).unwrap_or_default().to_string()
        };

        res.apply_status(status);
        res.reset_status_text();
        res.set_body(message);
        std::mem::take(res).into_http()
    }

    /// Redirects back to the referrer, see [`Response::back`].
    pub fn back(&mut self, alt: Option<&str>) {
        self.res.back(&self.req, alt);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "app": { "name": self.app.name },
            "req": self.req.to_json(),
            "res": self.res.to_json(),
        })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("app", &self.app)
            .field("state", &self.state)
            .field("req", &self.req)
            .field("res", &self.res)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};

    fn context() -> Context {
        let req = http::Request::get("/").header("host", "example.com").body(Full::new(Bytes::new())).unwrap();
        Context::new(Arc::new(AppInfo { name: "test".into() }), Request::new(req))
    }

    async fn read(res: http::Response<ResponseBody>) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_state_starts_empty() {
        let ctx = context();
        assert!(ctx.state.is_empty());
        assert_eq!(ctx.app().name, "test");
    }

    #[test]
    fn test_handles() {
        struct Env {
            region: &'static str,
        }

        let req = Request::new(http::Request::new(Full::new(Bytes::new())));
        let env: Handle = Arc::new(Env { region: "eu" });
        let ctx = Context::with_handles(Arc::new(AppInfo { name: "x".into() }), req, Some(env), None);

        assert_eq!(ctx.env::<Env>().map(|env| env.region), Some("eu"));
        assert!(ctx.env::<String>().is_none());
        assert!(ctx.execution_ctx::<Env>().is_none());
    }

    #[test]
    fn test_throw_and_assert() {
        let ctx = context();
        let err = ctx.throw(401, "login required");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "login required");

        assert!(ctx.assert(true, 400, ()).is_ok());
        let err = ctx.assert(false, 422, HttpErrorOptions::new().message("bad")).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_on_error_resets_headers() {
        let mut ctx = context();
        ctx.res.set("vary", "Accept").unwrap();
        ctx.res.set_body("partial");

        let err = HttpError::with_options(429, HttpErrorOptions::new().header("Retry-After", "60"));
        let out = ctx.on_error(&err);

        assert_eq!(out.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(out.headers().get("vary").is_none());
        assert_eq!(out.headers()["retry-after"], "60");
        assert_eq!(out.headers()["content-type"], "text/plain;charset=UTF-8");
        assert_eq!(read(out).await, "Too Many Requests");
    }

    #[tokio::test]
    async fn test_on_error_hides_unexposed_messages() {
        let mut ctx = context();
        let err = HttpError::with_options(500, "database password is hunter2");
        let out = ctx.on_error(&err);

        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read(out).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn test_on_error_unmapped_status() {
        let mut ctx = context();
        let err = HttpError::with_options(499, "client went away");
        let out = ctx.on_error(&err);

        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read(out).await, "client went away");
    }

    #[test]
    fn test_to_json() {
        let mut ctx = context();
        ctx.res.set_status(201).unwrap();
        let json = ctx.to_json();

        assert_eq!(json["app"]["name"], "test");
        assert_eq!(json["req"]["method"], "GET");
        assert_eq!(json["res"]["status"], 201);
    }
}
