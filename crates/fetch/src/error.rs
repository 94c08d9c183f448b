use crate::status::status_text;
use http::StatusCode;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// The error type middlewares return.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A typed HTTP failure.
///
/// The status is always within `400..=599`; anything else collapses to 500. Unless told
/// otherwise, the message of a 4xx error is safe to show to clients while the message of
/// a 5xx error is not.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    expose: bool,
    #[source]
    cause: Option<BoxError>,
    headers: BTreeMap<String, String>,
}

/// Optional parts of an [`HttpError`].
#[derive(Debug, Default)]
pub struct HttpErrorOptions {
    message: Option<String>,
    cause: Option<BoxError>,
    expose: Option<bool>,
    headers: Vec<(String, String)>,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        Self::with_options(status, HttpErrorOptions::default())
    }

    pub fn with_options(status: u16, options: impl Into<HttpErrorOptions>) -> Self {
        let options = options.into();
        let status = match status {
            400..=599 => status,
            _ => 500,
        };

        let message = options
            .message
            .or_else(|| status_text(status).map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());

        let mut headers = BTreeMap::<String, String>::new();
        for (name, value) in options.headers {
            headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|old| {
                    old.push_str(", ");
                    old.push_str(&value);
                })
                .or_insert(value);
        }

        Self {
            // 400..=599 always forms a valid status code
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message,
            expose: options.expose.unwrap_or(status < 500),
            cause: options.cause,
            headers,
        }
    }

    /// Builds an error with `message`; a message set in `options` still takes precedence.
    pub fn with_message(status: u16, message: impl Into<String>, options: impl Into<HttpErrorOptions>) -> Self {
        let mut options = options.into();
        options.message.get_or_insert_with(|| message.into());
        Self::with_options(status, options)
    }

    /// Turns any error returned by a middleware into an `HttpError`.
    ///
    /// An `HttpError` is passed through untouched. Anything else becomes an unexposed 500
    /// that keeps the original error as its cause.
    pub fn from_box(err: BoxError) -> Self {
        match err.downcast::<HttpError>() {
            Ok(http_error) => *http_error,
            Err(other) => {
                let message = other.to_string();
                Self::with_options(500, HttpErrorOptions::new().message(message).expose(false).cause(other))
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn expose(&self) -> bool {
        self.expose
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Headers to send with the error response, keyed by lowercase name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

impl HttpErrorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = Some(expose);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl From<&str> for HttpErrorOptions {
    fn from(message: &str) -> Self {
        Self::new().message(message)
    }
}

impl From<String> for HttpErrorOptions {
    fn from(message: String) -> Self {
        Self::new().message(message)
    }
}

impl From<()> for HttpErrorOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

/// A failure carrying a plain value instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrownValue(pub serde_json::Value);

impl fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-error thrown: {}", self.0)
    }
}

impl StdError for ThrownValue {}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid header name: {name}")]
    InvalidName { name: String },

    #[error("invalid value for header {name}")]
    InvalidValue { name: String },
}

impl HeaderError {
    pub fn invalid_name<S: ToString>(name: S) -> Self {
        Self::InvalidName { name: name.to_string() }
    }

    pub fn invalid_value<S: ToString>(name: S) -> Self {
        Self::InvalidValue { name: name.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("invalid url: {source}")]
    Parse {
        #[from]
        source: url::ParseError,
    },

    #[error("cannot set {component} on this url: {reason}")]
    Rejected { component: &'static str, reason: String },
}

impl UrlError {
    pub fn rejected<S: ToString>(component: &'static str, reason: S) -> Self {
        Self::Rejected { component, reason: reason.to_string() }
    }
}

#[derive(Debug, Error)]
#[error("invalid status code {status}, status code must be within 100..=999")]
pub struct StatusError {
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body has been consumed")]
    Consumed,

    #[error("failed to read body: {source}")]
    Io { source: BoxError },

    #[error("invalid json body: {source}")]
    Syntax {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid form body: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::de::Error,
    },

    #[error("unsupported media type: {media_type}")]
    UnsupportedMediaType { media_type: String },
}

impl BodyError {
    pub fn io<E: Into<BoxError>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn unsupported_media_type<S: ToString>(media_type: S) -> Self {
        Self::UnsupportedMediaType { media_type: media_type.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("middleware at index {index} is not invocable: nested bundles are flattened only one level")]
    NotInvocable { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_coercion() {
        assert_eq!(HttpError::new(200).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HttpError::new(700).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HttpError::new(399).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HttpError::new(400).status(), StatusCode::BAD_REQUEST);
        assert_eq!(HttpError::new(599).status().as_u16(), 599);
    }

    #[test]
    fn test_expose_default() {
        assert!(HttpError::new(404).expose());
        assert!(HttpError::new(499).expose());
        assert!(!HttpError::new(500).expose());
        assert!(HttpError::with_options(500, HttpErrorOptions::new().expose(true)).expose());
        assert!(!HttpError::with_options(400, HttpErrorOptions::new().expose(false)).expose());
    }

    #[test]
    fn test_message() {
        assert_eq!(HttpError::new(404).message(), "Not Found");
        assert_eq!(HttpError::new(599).message(), "Unknown error");
        assert_eq!(HttpError::with_options(400, "bad name").message(), "bad name");
        assert_eq!(HttpError::with_options(400, "bad name").to_string(), "bad name");

        let err = HttpError::with_message(400, "first", HttpErrorOptions::new().message("second"));
        assert_eq!(err.message(), "second");

        let err = HttpError::with_message(400, "first", ());
        assert_eq!(err.message(), "first");
    }

    #[test]
    fn test_headers_are_lowercased_and_merged() {
        let err = HttpError::with_options(
            429,
            HttpErrorOptions::new().header("Retry-After", "120").header("X-Reason", "a").header("x-reason", "b"),
        );

        assert_eq!(err.headers().get("retry-after").map(String::as_str), Some("120"));
        assert_eq!(err.headers().get("x-reason").map(String::as_str), Some("a, b"));
        assert_eq!(err.headers().len(), 2);
    }

    #[test]
    fn test_cause_is_source() {
        let err = HttpError::with_options(502, HttpErrorOptions::new().cause(io::Error::other("upstream down")));
        assert_eq!(err.source().map(|e| e.to_string()), Some("upstream down".to_string()));
        assert!(err.cause().is_some());
        assert!(HttpError::new(400).source().is_none());
    }

    #[test]
    fn test_from_box() {
        let err = HttpError::from_box(HttpError::with_options(418, "short and stout").into());
        assert_eq!(err.status().as_u16(), 418);
        assert_eq!(err.message(), "short and stout");
        assert!(err.expose());

        let err = HttpError::from_box(io::Error::other("disk on fire").into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "disk on fire");
        assert!(!err.expose());
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_thrown_value() {
        let err = HttpError::from_box(ThrownValue(serde_json::json!("string error")).into());
        assert_eq!(err.message(), r#"non-error thrown: "string error""#);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let value = ThrownValue(serde_json::json!({ "code": 7 }));
        assert_eq!(value.to_string(), r#"non-error thrown: {"code":7}"#);
    }
}
