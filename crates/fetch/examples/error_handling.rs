use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use micro_fetch::{Application, BoxError, HttpError, HttpErrorOptions};
use serde::Deserialize;
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize, Debug)]
struct Login {
    user: String,
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut app = Application::new();
    app.on_error(|err, ctx| {
        warn!(status = err.status().as_u16(), path = ctx.req.pathname(), cause = %err, "request failed");
    });

    app.with_fn(|ctx, _next| {
        Box::pin(async move {
            let path = ctx.req.pathname().to_string();
            match path.as_str() {
                "/login" => {
                    let login: Login = ctx.req.json().await?;
                    ctx.assert(login.user != "root", 403, "root may not log in")?;
                    ctx.res.set_body(format!("welcome {}", login.user));
                    Ok(())
                }
                "/limited" => {
                    let options = HttpErrorOptions::new().message("slow down").header("Retry-After", "60");
                    Err(BoxError::from(ctx.throw(429, options)))
                }
                "/crash" => Err(BoxError::from("database connection lost")),
                _ => Err(BoxError::from(HttpError::new(404))),
            }
        })
    });

    let requests = [
        ("/login", r#"{"user":"alice"}"#),
        ("/login", r#"{"user":"root"}"#),
        ("/login", "not json"),
        ("/limited", ""),
        ("/crash", ""),
        ("/missing", ""),
    ];

    for (path, body) in requests {
        let request = http::Request::post(format!("http://127.0.0.1:3000{path}"))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .expect("static request is valid");
        let response = app.fetch(request).await;
        let status = response.status();
        let retry_after = response.headers().get("retry-after").cloned();
        let body = response.into_body().collect().await.expect("in-memory body").to_bytes();
        println!("{path} -> {status} {retry_after:?}: {}", String::from_utf8_lossy(&body));
    }
}
