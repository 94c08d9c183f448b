//! Per-application capability registration.
//!
//! A [`Plugin`] gets a look at every [`Request`], [`Response`] and [`Context`] an
//! [`Application`](crate::Application) builds, right after construction and before any
//! middleware runs. This is where shared capabilities are installed: default headers,
//! typed values in [`Context::extensions`], initial state.
//!
//! Plugins belong to one application, so two applications never see each other's plugins.

use crate::context::Context;
use crate::request::Request;
use crate::response::Response;
use std::fmt;
use std::sync::Arc;

pub trait Plugin: Send + Sync {
    fn on_request(&self, _req: &mut Request) {}

    fn on_response(&self, _res: &mut Response) {}

    /// Runs last, once the request and response are in place.
    fn on_context(&self, _ctx: &mut Context) {}
}

/// An ordered set of plugins, applied in registration order.
#[derive(Clone, Default)]
pub struct Plugins {
    inner: Vec<Arc<dyn Plugin>>,
}

impl Plugin for Plugins {
    fn on_request(&self, req: &mut Request) {
        for plugin in &self.inner {
            plugin.on_request(req);
        }
    }

    fn on_response(&self, res: &mut Response) {
        for plugin in &self.inner {
            plugin.on_response(res);
        }
    }

    fn on_context(&self, ctx: &mut Context) {
        for plugin in &self.inner {
            plugin.on_context(ctx);
        }
    }
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_last<P: Plugin + 'static>(&mut self, plugin: P) {
        self.inner.push(Arc::new(plugin));
    }

    pub fn add_first<P: Plugin + 'static>(&mut self, plugin: P) {
        self.inner.insert(0, Arc::new(plugin));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Runs the request and response hooks, then the context hooks.
    pub(crate) fn apply(&self, ctx: &mut Context) {
        self.on_request(&mut ctx.req);
        self.on_response(&mut ctx.res);
        self.on_context(ctx);
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins").field("len", &self.inner.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppInfo;
    use bytes::Bytes;
    use http_body_util::Full;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Recorder {
        fn on_request(&self, _req: &mut Request) {
            self.calls.lock().unwrap().push(format!("{}:request", self.name));
        }

        fn on_response(&self, _res: &mut Response) {
            self.calls.lock().unwrap().push(format!("{}:response", self.name));
        }

        fn on_context(&self, _ctx: &mut Context) {
            self.calls.lock().unwrap().push(format!("{}:context", self.name));
        }
    }

    struct PoweredBy;

    impl Plugin for PoweredBy {
        fn on_response(&self, res: &mut Response) {
            res.set("x-powered-by", "micro-fetch").unwrap();
        }
    }

    fn context() -> Context {
        let req = http::Request::get("http://example.com/").body(Full::new(Bytes::new())).unwrap();
        Context::new(Arc::new(AppInfo { name: "test".into() }), Request::new(req))
    }

    #[test]
    fn test_apply_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut plugins = Plugins::new();
        plugins.add_last(Recorder { name: "b", calls: Arc::clone(&calls) });
        plugins.add_first(Recorder { name: "a", calls: Arc::clone(&calls) });
        assert_eq!(plugins.len(), 2);

        let mut ctx = context();
        plugins.apply(&mut ctx);

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec!["a:request", "b:request", "a:response", "b:response", "a:context", "b:context"]
        );
    }

    #[test]
    fn test_response_hook() {
        let mut plugins = Plugins::new();
        plugins.add_last(PoweredBy);

        let mut ctx = context();
        plugins.apply(&mut ctx);
        assert_eq!(ctx.res.get("x-powered-by").as_deref(), Some("micro-fetch"));
    }
}
