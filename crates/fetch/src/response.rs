//! The outbound message builder.
//!
//! Handlers mutate a [`Response`] in place: status, headers and body. Content-Type and
//! Content-Length are inferred from the body only when the handler did not set them, and a
//! few transitions keep the state consistent on their own: a no-body status drops the body,
//! and dropping the body of a response that was never given a status turns it into a 204.

use crate::body::{Body, ResponseBody, multipart_boundary};
use crate::error::{HeaderError, StatusError};
use crate::headers::HeaderView;
use crate::request::Request;
use crate::status::{is_empty_status, is_redirect_status, status_text};
use crate::utils::{BINARY_TYPE, FORM_TYPE, HTML_TYPE, JSON_TYPE, TEXT_TYPE, encode_url, is_json_type, resolve_content_type};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, TRANSFER_ENCODING};
use http::{Extensions, HeaderValue, StatusCode};
use std::collections::BTreeMap;
use url::Url;

/// An explicitly set status text, carried in the extensions of the outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText(pub String);

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    explicit_status: bool,
    status_text: Option<String>,
    headers: HeaderView,
    body: Option<Body>,
    explicit_null_body: bool,
    extensions: Extensions,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            explicit_status: false,
            status_text: None,
            headers: HeaderView::new(),
            body: None,
            explicit_null_body: false,
            extensions: Extensions::new(),
        }
    }

    // status

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code. A no-body status (204, 205, 304) drops any body already set.
    pub fn set_status(&mut self, status: u16) -> Result<(), StatusError> {
        if !(100..=999).contains(&status) {
            return Err(StatusError { status });
        }
        match StatusCode::from_u16(status) {
            Ok(code) => {
                self.apply_status(code);
                Ok(())
            }
            Err(_invalid) => Err(StatusError { status }),
        }
    }

    pub(crate) fn apply_status(&mut self, status: StatusCode) {
        self.status = status;
        self.explicit_status = true;
        if self.body.is_some() && is_empty_status(status) {
            self.set_null_body();
        }
    }

    pub fn is_status_explicit(&self) -> bool {
        self.explicit_status
    }

    /// The explicit status text, or the standard reason phrase of the status.
    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref().or_else(|| status_text(self.status.as_u16()))
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) {
        self.status_text = Some(text.into());
    }

    pub(crate) fn reset_status_text(&mut self) {
        self.status_text = None;
    }

    // headers

    /// A flattened snapshot of the headers, one value per lowercase name.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers.entries()
    }

    pub fn header_view(&self) -> &HeaderView {
        &self.headers
    }

    pub fn set_headers(&mut self, headers: impl Into<HeaderView>) {
        self.headers = headers.into();
    }

    /// Replaces all headers with `headers`, given as pairs or as a string map.
    pub fn try_set_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.headers = HeaderView::from_pairs(headers)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    pub fn get_set_cookie(&self) -> Vec<String> {
        self.headers.get_set_cookie()
    }

    pub fn has(&self, name: &str) -> bool {
        self.headers.has(name)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        self.headers.set(name, value)
    }

    pub fn set_many<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.headers.set_many(headers)
    }

    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        self.headers.append(name, value)
    }

    pub fn delete(&mut self, name: &str) {
        self.headers.delete(name);
    }

    pub(crate) fn clear_headers(&mut self) {
        self.headers.clear();
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    // content metadata

    /// The media type of `Content-Type`, without parameters.
    pub fn type_(&self) -> Option<String> {
        let content_type = self.get(CONTENT_TYPE.as_str()).filter(|ct| !ct.is_empty())?;
        Some(content_type.split(';').next().unwrap_or_default().to_string())
    }

    /// Sets `Content-Type`, resolving short aliases such as `json` or `png`. An empty value is ignored.
    pub fn set_type(&mut self, type_: &str) -> Result<(), HeaderError> {
        if type_.is_empty() {
            return Ok(());
        }
        self.set(CONTENT_TYPE.as_str(), resolve_content_type(type_))
    }

    pub(crate) fn set_static_type(&mut self, content_type: &'static str) {
        self.headers.as_header_map_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    /// `Content-Length` when set, otherwise the byte length of the body when it is known
    /// without consuming it.
    pub fn length(&self) -> Option<u64> {
        if let Some(value) = self.get(CONTENT_LENGTH.as_str()) {
            let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
            return Some(digits.parse().unwrap_or(0));
        }
        self.body.as_ref().and_then(Body::len)
    }

    /// Writes `Content-Length`, unless the body is sent with a transfer encoding.
    pub fn set_length(&mut self, length: u64) {
        if !self.headers.has(TRANSFER_ENCODING.as_str()) {
            self.headers.as_header_map_mut().insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
    }

    // body

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn is_null_body_explicit(&self) -> bool {
        self.explicit_null_body
    }

    /// Sets the body and infers the headers it implies.
    ///
    /// Unless a status was set before, the status becomes 200. A `Content-Type` set by the
    /// handler always wins; otherwise it follows the kind of body:
    ///
    /// - text looking like markup (`<` after leading whitespace) is `html`, other text is `text`
    /// - a blob uses its own type, falling back to `bin` like byte buffers and streams
    /// - an url-encoded form is `form`
    /// - multipart form data gets its type, with the boundary, when the response is emitted
    /// - JSON forces `json` unless the current type already mentions json
    ///
    /// An embedded response hands over its status and replaces headers of the same name.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        if !self.explicit_status {
            self.apply_status(StatusCode::OK);
        }

        let no_type = !self.has(CONTENT_TYPE.as_str());
        let mut embedded_status = None;
        match &body {
            Body::Text(text) => {
                if no_type {
                    let markup = text.trim_start().starts_with('<');
                    self.set_static_type(if markup { HTML_TYPE } else { TEXT_TYPE });
                }
            }
            Body::Blob(blob) => {
                if no_type {
                    match HeaderValue::from_str(blob.type_()) {
                        Ok(value) if !blob.type_().is_empty() => {
                            self.headers.as_header_map_mut().insert(CONTENT_TYPE, value);
                        }
                        _ => self.set_static_type(BINARY_TYPE),
                    }
                }
            }
            Body::Binary(_) | Body::Stream(_) => {
                if no_type {
                    self.set_static_type(BINARY_TYPE);
                }
            }
            Body::FormData(_) => {}
            Body::Form(_) => {
                if no_type {
                    self.set_static_type(FORM_TYPE);
                }
            }
            Body::Response(embedded) => {
                if no_type {
                    self.set_static_type(BINARY_TYPE);
                }
                embedded_status = Some(embedded.status());
                let map = self.headers.as_header_map_mut();
                for name in embedded.headers().keys() {
                    map.remove(name);
                }
                for (name, value) in embedded.headers() {
                    map.append(name, value.clone());
                }
            }
            Body::Json(_) => {
                if !self.type_().is_some_and(|type_| is_json_type(&type_)) {
                    self.set_static_type(JSON_TYPE);
                }
            }
        }

        self.body = Some(body);
        if let Some(status) = embedded_status {
            self.apply_status(status);
        }
    }

    /// Sets the body to an explicit null.
    ///
    /// Outside the no-body statuses this turns the response into a 204, except when the
    /// content type is JSON where the body becomes the text `null`.
    pub fn set_null_body(&mut self) {
        self.clear_body(true);
    }

    /// Removes the body as if it had never been set.
    pub fn unset_body(&mut self) {
        self.clear_body(false);
    }

    fn clear_body(&mut self, explicit: bool) {
        self.body = None;
        if !is_empty_status(self.status) {
            if self.type_().as_deref() == Some(JSON_TYPE) {
                self.body = Some(Body::Text("null".to_string()));
                return;
            }
            self.apply_status(StatusCode::NO_CONTENT);
        }
        if explicit {
            self.explicit_null_body = true;
        }
        self.delete(CONTENT_TYPE.as_str());
        self.delete(CONTENT_LENGTH.as_str());
        self.delete(TRANSFER_ENCODING.as_str());
    }

    // redirects

    /// Redirects to `url` with a 302, unless a redirect status was already chosen.
    ///
    /// Absolute http(s) urls are normalized first and the `Location` header is percent-encoded.
    pub fn redirect(&mut self, url: &str) {
        let mut target = url.to_string();
        let lowercase = url.get(..8).unwrap_or(url).to_ascii_lowercase();
        if lowercase.starts_with("http://") || lowercase.starts_with("https://") {
            if let Ok(parsed) = Url::parse(url) {
                target = parsed.into();
            }
        }

        match HeaderValue::from_str(&encode_url(&target)) {
            Ok(location) => {
                self.headers.as_header_map_mut().insert(LOCATION, location);
            }
            Err(e) => tracing::warn!(url = %target, error = %e, "unable to encode redirect location"),
        }

        if !is_redirect_status(self.status) {
            self.apply_status(StatusCode::FOUND);
        }

        self.set_static_type(TEXT_TYPE);
        self.set_body(format!("Redirecting to {target}."));
    }

    /// Redirects to the referrer of `req` when it is a relative path or shares the request
    /// origin, otherwise to `alt` or `/`.
    pub fn back(&mut self, req: &Request, alt: Option<&str>) {
        if let Some(referrer) = req.get("referrer").filter(|referrer| !referrer.is_empty()) {
            if referrer.starts_with('/') {
                self.redirect(&referrer);
                return;
            }

            let same_origin = Url::parse(req.href())
                .and_then(|base| base.join(&referrer))
                .is_ok_and(|url| url.origin().ascii_serialization() == req.origin());
            if same_origin {
                self.redirect(&referrer);
                return;
            }
        }

        self.redirect(alt.filter(|alt| !alt.is_empty()).unwrap_or("/"));
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status.as_u16(),
            "statusText": self.status_text(),
            "headers": self.headers(),
        })
    }

    /// Builds the outbound message from the current state, leaving the body out.
    pub fn into_head(self) -> http::Response<ResponseBody> {
        self.into_http_with(ResponseBody::empty())
    }

    /// Builds the outbound message from the current state.
    ///
    /// The body is encoded according to its kind. When no `Content-Type` is left, the defaults
    /// of the body kind apply: text is plain text, forms are url-encoded, blobs use their own
    /// type and multipart form data gets a fresh boundary.
    pub fn into_http(mut self) -> http::Response<ResponseBody> {
        let no_type = !self.has(CONTENT_TYPE.as_str());
        let body = match self.body.take() {
            None => ResponseBody::empty(),
            Some(Body::Text(text)) => {
                if no_type {
                    self.set_static_type(TEXT_TYPE);
                }
                ResponseBody::from(text)
            }
            Some(Body::Blob(blob)) => {
                if no_type && !blob.type_().is_empty() {
                    if let Ok(value) = HeaderValue::from_str(blob.type_()) {
                        self.headers.as_header_map_mut().insert(CONTENT_TYPE, value);
                    }
                }
                ResponseBody::once(blob.into_bytes())
            }
            Some(Body::Binary(bytes)) => ResponseBody::once(bytes),
            Some(Body::Stream(stream)) => ResponseBody::from_box(stream),
            Some(Body::FormData(form)) => {
                let boundary = multipart_boundary();
                if no_type {
                    let content_type = format!("multipart/form-data; boundary={boundary}");
                    if let Ok(value) = HeaderValue::from_str(&content_type) {
                        self.headers.as_header_map_mut().insert(CONTENT_TYPE, value);
                    }
                }
                ResponseBody::once(form.encode(&boundary))
            }
            Some(Body::Form(query)) => {
                if no_type {
                    self.set_static_type(FORM_TYPE);
                }
                ResponseBody::from(query.to_query_string())
            }
            Some(Body::Response(embedded)) => ResponseBody::from_box(embedded.into_body().into_box()),
            Some(Body::Json(value)) => ResponseBody::once(Bytes::from(value.to_string())),
        };
        self.into_http_with(body)
    }

    fn into_http_with(self, body: ResponseBody) -> http::Response<ResponseBody> {
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.into_header_map();
        *response.extensions_mut() = self.extensions;
        if let Some(text) = self.status_text {
            response.extensions_mut().insert(StatusText(text));
        }
        response
    }
}
