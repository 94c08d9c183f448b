//! Hosts an application the way a serverless runtime would: one `fetch` call per request,
//! with opaque handles passed through to every middleware.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use micro_fetch::{Application, Context, Handle, Plugin, Response};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

struct Env {
    region: &'static str,
}

struct RequestId;

impl Plugin for RequestId {
    fn on_response(&self, res: &mut Response) {
        let id = format!("{:016x}", fastrand::u64(..));
        if let Err(e) = res.set("x-request-id", &id) {
            tracing::warn!(error = %e, "unable to set request id");
        }
    }

    fn on_context(&self, ctx: &mut Context) {
        ctx.state.insert("visits".into(), serde_json::json!(0));
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut app = Application::builder().name("edge").silent_from_env().build();
    app.plugin(RequestId);
    app.with_fn(|ctx, _next| {
        Box::pin(async move {
            let region = ctx.env::<Env>().map_or("unknown", |env| env.region);
            let body = serde_json::json!({
                "region": region,
                "query": ctx.req.query(),
                "state": ctx.state,
            });
            ctx.res.set_body(body);
            Ok(())
        })
    });

    let env: Handle = Arc::new(Env { region: "eu-west" });
    let request = http::Request::get("http://127.0.0.1:3000/echo?tag=a&tag=b")
        .body(Full::new(Bytes::new()))
        .expect("static request is valid");

    let response = app.fetch_with(request, Some(env), None).await;
    info!(status = %response.status(), headers = ?response.headers(), "fetched");
    let body = response.into_body().collect().await.expect("in-memory body").to_bytes();
    println!("{}", String::from_utf8_lossy(&body));
}
