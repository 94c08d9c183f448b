use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use micro_fetch::Application;
use std::time::Instant;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut app = Application::builder().name("onion-logger").build();

    // outermost: timing
    app.with_fn(|ctx, next| {
        Box::pin(async move {
            let started = Instant::now();
            next.run(ctx).await?;
            info!(
                method = %ctx.req.method(),
                path = ctx.req.pathname(),
                status = ctx.res.status().as_u16(),
                elapsed = ?started.elapsed(),
                "request handled"
            );
            Ok(())
        })
    });

    app.with_fn(|ctx, next| {
        Box::pin(async move {
            next.run(ctx).await?;
            ctx.res.set("x-response-time", "fast")?;
            Ok(())
        })
    });

    app.with_fn(|ctx, _next| {
        Box::pin(async move {
            let greeting = format!("hello from {}", ctx.app().name);
            ctx.res.set_body(greeting);
            Ok(())
        })
    });

    for path in ["/", "/users/42"] {
        let request = http::Request::get(format!("http://127.0.0.1:3000{path}"))
            .body(Full::new(Bytes::new()))
            .expect("static request is valid");
        let response = app.fetch(request).await;
        let status = response.status();
        let body = response.into_body().collect().await.expect("in-memory body").to_bytes();
        println!("{path} -> {status}: {}", String::from_utf8_lossy(&body));
    }
}
