//! A lazy view over the inbound message.
//!
//! Derived values such as the parsed url, the query map and the header view are computed on
//! first access and cached. Mutations go through those cached values; the inbound
//! [`http::request::Parts`] are never modified, so the original message stays available.

use crate::body::{Blob, BoxBody, FormData, boxed};
use crate::error::{BodyError, BoxError, HeaderError, UrlError};
use crate::headers::HeaderView;
use crate::query::{Query, QueryValue};
use crate::utils::media_type;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{Extensions, Method, Uri, Version};
use http_body_util::BodyExt;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use url::Url;

/// Proxy headers consulted by [`Request::ip`], most trusted first.
const IP_HEADERS: [&str; 13] = [
    "x-client-ip",
    "x-forwarded-for",
    "cf-connecting-ip",
    "do-connecting-ip",
    "fastly-client-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
    "x-appengine-user-ip",
    "cf-pseudo-ipv4",
];

#[derive(Debug)]
pub struct Request {
    parts: Parts,
    body: Option<BoxBody>,
    method: Option<Method>,
    url: OnceCell<Url>,
    query: OnceCell<Query>,
    headers: OnceCell<HeaderView>,
}

impl Request {
    pub fn new<B>(request: http::Request<B>) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, boxed(body))
    }

    pub fn from_parts(parts: Parts, body: BoxBody) -> Self {
        Self {
            parts,
            body: Some(body),
            method: None,
            url: OnceCell::new(),
            query: OnceCell::new(),
            headers: OnceCell::new(),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Extensions of the inbound message, where hosts may attach extra data.
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    pub fn method(&self) -> &Method {
        self.method.as_ref().unwrap_or(&self.parts.method)
    }

    /// Overrides the method without touching the inbound message.
    pub fn set_method(&mut self, method: Method) {
        self.method = Some(method);
    }

    // url

    pub fn url(&self) -> &Url {
        self.url.get_or_init(|| absolute_url(&self.parts))
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = OnceCell::with_value(url);
        self.query = OnceCell::new();
    }

    pub fn href(&self) -> &str {
        self.url().as_str()
    }

    pub fn set_href(&mut self, href: &str) -> Result<(), UrlError> {
        self.set_url(Url::parse(href)?);
        Ok(())
    }

    pub fn origin(&self) -> String {
        self.url().origin().ascii_serialization()
    }

    /// Replaces scheme, host and port, keeping path, search and hash.
    pub fn set_origin(&mut self, origin: &str) -> Result<(), UrlError> {
        let mut url = Url::parse(origin)?;
        let current = self.url();
        url.set_path(current.path());
        url.set_query(current.query());
        url.set_fragment(current.fragment());
        self.set_url(url);
        Ok(())
    }

    /// The scheme followed by `:`, e.g. `https:`.
    pub fn protocol(&self) -> String {
        format!("{}:", self.url().scheme())
    }

    pub fn set_protocol(&mut self, protocol: &str) -> Result<(), UrlError> {
        let scheme = protocol.strip_suffix(':').unwrap_or(protocol);
        self.with_url(|url| url.set_scheme(scheme)).map_err(|()| UrlError::rejected("protocol", protocol))
    }

    /// Host name and, when it is not the default one, the port.
    pub fn host(&self) -> String {
        let url = self.url();
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn set_host(&mut self, host: &str) -> Result<(), UrlError> {
        let probe = Url::parse(&format!("{}://{host}/", self.url().scheme()))?;
        self.with_url(|url| {
            url.set_host(probe.host_str())?;
            url.set_port(probe.port()).map_err(|()| UrlError::rejected("host", host))
        })
    }

    /// Host name without the port; IPv6 addresses lose their brackets.
    pub fn hostname(&self) -> &str {
        let hostname = self.url().host_str().unwrap_or_default();
        hostname.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(hostname)
    }

    pub fn set_hostname(&mut self, hostname: &str) -> Result<(), UrlError> {
        self.with_url(|url| url.set_host(Some(hostname)))?;
        Ok(())
    }

    /// The explicit port, empty when the scheme's default is used.
    pub fn port(&self) -> String {
        self.url().port().map(|port| port.to_string()).unwrap_or_default()
    }

    pub fn set_port(&mut self, port: &str) -> Result<(), UrlError> {
        let port = if port.is_empty() {
            None
        } else {
            Some(port.parse::<u16>().map_err(|e| UrlError::rejected("port", e))?)
        };
        self.with_url(|url| url.set_port(port)).map_err(|()| UrlError::rejected("port", "url cannot carry a port"))
    }

    pub fn pathname(&self) -> &str {
        self.url().path()
    }

    pub fn set_pathname(&mut self, pathname: &str) {
        self.with_url(|url| url.set_path(pathname));
    }

    /// The query string with its leading `?`, or empty.
    pub fn search(&self) -> String {
        match self.url().query() {
            Some(query) if !query.is_empty() => format!("?{query}"),
            _ => String::new(),
        }
    }

    /// Replaces the query string; the cached query map is dropped.
    pub fn set_search(&mut self, search: &str) {
        let search = search.strip_prefix('?').unwrap_or(search);
        self.with_url(|url| url.set_query((!search.is_empty()).then_some(search)));
        self.query = OnceCell::new();
    }

    pub fn hash(&self) -> String {
        match self.url().fragment() {
            Some(fragment) if !fragment.is_empty() => format!("#{fragment}"),
            _ => String::new(),
        }
    }

    pub fn set_hash(&mut self, hash: &str) {
        let hash = hash.strip_prefix('#').unwrap_or(hash);
        self.with_url(|url| url.set_fragment((!hash.is_empty()).then_some(hash)));
    }

    fn with_url<R>(&mut self, f: impl FnOnce(&mut Url) -> R) -> R {
        let mut url = self.url.take().unwrap_or_else(|| absolute_url(&self.parts));
        let result = f(&mut url);
        self.url = OnceCell::with_value(url);
        result
    }

    // query

    pub fn query(&self) -> &Query {
        self.query.get_or_init(|| Query::parse(self.url().query().unwrap_or_default()))
    }

    /// Serializes `query` into the search string. List values become repeated parameters.
    pub fn set_query<K, V>(&mut self, query: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<QueryValue>,
    {
        let mut map = Query::new();
        for (key, value) in query {
            map.insert(key, value);
        }
        self.set_search(&map.to_query_string());
    }

    /// Deserializes the query string, with nested keys such as `user[name]=bob` supported.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, serde_qs::Error> {
        serde_qs::from_str(self.url().query().unwrap_or_default())
    }

    // headers

    pub fn header_view(&self) -> &HeaderView {
        self.headers.get_or_init(|| HeaderView::from(self.parts.headers.clone()))
    }

    fn with_headers<R>(&mut self, f: impl FnOnce(&mut HeaderView) -> R) -> R {
        let mut headers = self.headers.take().unwrap_or_else(|| HeaderView::from(self.parts.headers.clone()));
        let result = f(&mut headers);
        self.headers = OnceCell::with_value(headers);
        result
    }

    /// A flattened snapshot of the headers, one value per lowercase name.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.header_view().entries()
    }

    pub fn set_headers(&mut self, headers: impl Into<HeaderView>) {
        self.headers = OnceCell::with_value(headers.into());
    }

    /// Replaces all headers with `headers`, given as pairs or as a string map.
    pub fn try_set_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.set_headers(HeaderView::from_pairs(headers)?);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.header_view().get(name)
    }

    pub fn get_set_cookie(&self) -> Vec<String> {
        self.header_view().get_set_cookie()
    }

    pub fn has(&self, name: &str) -> bool {
        self.header_view().has(name)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        self.with_headers(|headers| headers.set(name, value))
    }

    pub fn set_many<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.with_headers(|view| view.set_many(headers))
    }

    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        self.with_headers(|headers| headers.append(name, value))
    }

    pub fn delete(&mut self, name: &str) {
        self.with_headers(|headers| headers.delete(name));
    }

    /// The client address reported by the first proxy header present, or empty.
    pub fn ip(&self) -> String {
        for name in IP_HEADERS {
            let Some(value) = self.get(name).filter(|value| !value.is_empty()) else {
                continue;
            };
            if name == "x-forwarded-for" || name == "forwarded-for" {
                let first = value.split(',').next().map(str::trim).unwrap_or_default();
                if !first.is_empty() {
                    return first.to_string();
                }
            } else {
                return value;
            }
        }
        String::new()
    }

    /// Every address listed in `X-Forwarded-For`, falling back to [`ip`](Self::ip).
    pub fn ips(&self) -> Vec<String> {
        match self.get("x-forwarded-for").filter(|value| !value.is_empty()) {
            Some(forwarded) => {
                forwarded.split(',').map(str::trim).filter(|ip| !ip.is_empty()).map(str::to_string).collect()
            }
            None => {
                let ip = self.ip();
                if ip.is_empty() { Vec::new() } else { vec![ip] }
            }
        }
    }

    /// `Content-Length` as a number; a value that is not a number counts as 0.
    pub fn length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH.as_str()).map(|len| len.trim().parse().unwrap_or(0))
    }

    /// The lowercase media type of `Content-Type`, without parameters.
    pub fn type_(&self) -> Option<String> {
        let content_type = self.get(CONTENT_TYPE.as_str()).filter(|ct| !ct.is_empty())?;
        Some(media_type(&content_type).trim().to_ascii_lowercase())
    }

    // body

    /// The raw body stream, `None` once a reader has consumed it.
    pub fn body_mut(&mut self) -> Option<&mut BoxBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<BoxBody> {
        self.body.take()
    }

    pub fn set_body<B>(&mut self, body: B)
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        self.body = Some(boxed(body));
    }

    pub fn is_body_consumed(&self) -> bool {
        self.body.is_none()
    }

    /// Reads the whole body. Every reader consumes the body, so only one of them may be used.
    pub async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        let body = self.body.take().ok_or(BodyError::Consumed)?;
        let collected = body.collect().await.map_err(BodyError::io)?;
        Ok(collected.to_bytes())
    }

    pub async fn text(&mut self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        let text = self.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn blob(&mut self) -> Result<Blob, BodyError> {
        let type_ = self.get(CONTENT_TYPE.as_str()).unwrap_or_default();
        let bytes = self.bytes().await?;
        Ok(Blob::new(bytes, type_))
    }

    /// Decodes an `application/x-www-form-urlencoded` body into text fields.
    pub async fn form_data(&mut self) -> Result<FormData, BodyError> {
        let media_type = self.type_().unwrap_or_default();
        if media_type != mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
            return Err(BodyError::unsupported_media_type(media_type));
        }
        let bytes = self.bytes().await?;
        let mut form = FormData::new();
        for (name, value) in url::form_urlencoded::parse(&bytes) {
            form.append(name, value);
        }
        Ok(form)
    }

    /// Deserializes an url-encoded body.
    pub async fn form<T: DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        let bytes = self.bytes().await?;
        Ok(serde_urlencoded::from_bytes(&bytes)?)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "method": self.method().as_str(),
            "url": self.href(),
            "headers": self.headers(),
        })
    }
}

/// Rebuilds the absolute url of the inbound message.
///
/// Servers usually receive origin-form targets (`/path?query`), so the authority is taken
/// from the `Host` header when the uri does not carry one.
fn absolute_url(parts: &Parts) -> Url {
    let uri = &parts.uri;
    if uri.scheme().is_some() {
        if let Ok(url) = Url::parse(&uri.to_string()) {
            return url;
        }
    }

    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(http::uri::Authority::as_str))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map_or("/", http::uri::PathAndQuery::as_str);

    Url::parse(&format!("http://{host}{path}"))
        .or_else(|_| Url::parse(&format!("http://localhost{path}")))
        .unwrap_or_else(|_| Url::parse("http://localhost/").expect("static url is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde::Deserialize;

    fn request(uri: &str) -> Request {
        Request::new(http::Request::builder().uri(uri).header("Host", "example.com").body(Full::new(Bytes::new())).unwrap())
    }

    fn request_with_body(content_type: &str, body: &'static str) -> Request {
        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header("Host", "example.com")
            .header("Content-Type", content_type)
            .header("Content-Length", body.len().to_string())
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();
        Request::new(req)
    }

    #[test]
    fn test_url_from_host_header() {
        let req = request("/users/42?sort=asc");

        assert_eq!(req.href(), "http://example.com/users/42?sort=asc");
        assert_eq!(req.origin(), "http://example.com");
        assert_eq!(req.protocol(), "http:");
        assert_eq!(req.host(), "example.com");
        assert_eq!(req.hostname(), "example.com");
        assert_eq!(req.port(), "");
        assert_eq!(req.pathname(), "/users/42");
        assert_eq!(req.search(), "?sort=asc");
        assert_eq!(req.hash(), "");
    }

    #[test]
    fn test_absolute_uri_wins() {
        let req = Request::new(http::Request::get("https://api.example.com:8443/v1").body(Full::new(Bytes::new())).unwrap());

        assert_eq!(req.host(), "api.example.com:8443");
        assert_eq!(req.port(), "8443");
        assert_eq!(req.origin(), "https://api.example.com:8443");
    }

    #[test]
    fn test_ipv6_hostname() {
        let req = Request::new(http::Request::get("http://[::1]:3000/").body(Full::new(Bytes::new())).unwrap());

        assert_eq!(req.hostname(), "::1");
        assert_eq!(req.host(), "[::1]:3000");
    }

    #[test]
    fn test_url_setters_keep_other_parts() {
        let mut req = request("/a/b?x=1");

        req.set_hostname("other.example").unwrap();
        assert_eq!(req.href(), "http://other.example/a/b?x=1");

        req.set_port("8080").unwrap();
        assert_eq!(req.host(), "other.example:8080");

        req.set_host("third.example:9000").unwrap();
        assert_eq!(req.hostname(), "third.example");
        assert_eq!(req.port(), "9000");

        req.set_protocol("https:").unwrap();
        assert_eq!(req.origin(), "https://third.example:9000");

        req.set_origin("http://fourth.example").unwrap();
        assert_eq!(req.href(), "http://fourth.example/a/b?x=1");

        req.set_pathname("/c");
        req.set_hash("frag");
        assert_eq!(req.href(), "http://fourth.example/c?x=1#frag");
        assert_eq!(req.hash(), "#frag");

        assert!(req.set_port("not-a-port").is_err());
        assert!(req.set_href("::not a url::").is_err());
    }

    #[test]
    fn test_search_and_query_round_trip() {
        let mut req = request("/");
        assert!(req.query().is_empty());

        req.set_search("?a=1&a=2");
        assert_eq!(req.query().get("a"), Some(&QueryValue::from(vec!["1", "2"])));

        req.set_query([("a", vec!["1", "2"])]);
        assert_eq!(req.search(), "?a=1&a=2");

        req.set_query([("name", Some("New York")), ("empty", None)]);
        assert_eq!(req.search(), "?name=New+York&empty=");

        req.set_search("");
        assert_eq!(req.search(), "");
        assert!(req.query().is_empty());
    }

    #[test]
    fn test_query_as() {
        #[derive(Deserialize)]
        struct Page {
            page: u32,
            tags: Vec<String>,
        }

        let req = request("/?page=2&tags[0]=a&tags[1]=b");
        let page: Page = req.query_as().unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.tags, ["a", "b"]);
    }

    #[test]
    fn test_method_override() {
        let mut req = request("/");
        assert_eq!(req.method(), Method::GET);

        req.set_method(Method::DELETE);
        assert_eq!(req.method(), Method::DELETE);
    }

    #[test]
    fn test_header_access() {
        let mut req = request("/");
        req.set("X-Foo", "bar").unwrap();
        req.append("x-foo", "baz").unwrap();

        assert_eq!(req.get("x-foo").as_deref(), Some("bar, baz"));
        assert!(req.has("X-FOO"));
        assert_eq!(req.headers().get("host").map(String::as_str), Some("example.com"));

        req.delete("x-foo");
        assert!(!req.has("x-foo"));
        assert_eq!(req.get(""), None);

        req.set_headers(HeaderView::try_from(vec![("X-Only", "1")]).unwrap());
        assert_eq!(req.headers().len(), 1);

        req.try_set_headers(BTreeMap::from([("X-Map", "a"), ("X-Other", "b")])).unwrap();
        assert_eq!(req.headers().len(), 2);
        assert!(!req.has("x-only"));

        req.try_set_headers([("Vary", "Accept"), ("vary", "Origin")]).unwrap();
        assert_eq!(req.get("vary").as_deref(), Some("Accept, Origin"));
        assert!(req.try_set_headers([("bad name", "x")]).is_err());
    }

    #[test]
    fn test_ip() {
        let mut req = request("/");
        assert_eq!(req.ip(), "");
        assert!(req.ips().is_empty());

        req.set("X-Real-IP", "10.0.0.2").unwrap();
        assert_eq!(req.ip(), "10.0.0.2");
        assert_eq!(req.ips(), ["10.0.0.2"]);

        req.set("X-Forwarded-For", "203.0.113.7, 10.0.0.1").unwrap();
        assert_eq!(req.ip(), "203.0.113.7");
        assert_eq!(req.ips(), ["203.0.113.7", "10.0.0.1"]);

        req.set("X-Client-IP", "198.51.100.1").unwrap();
        assert_eq!(req.ip(), "198.51.100.1");
    }

    #[test]
    fn test_length_and_type() {
        let mut req = request_with_body("Application/JSON; charset=utf-8", "{}");
        assert_eq!(req.length(), Some(2));
        assert_eq!(req.type_().as_deref(), Some("application/json"));

        req.set("Content-Length", "abc").unwrap();
        assert_eq!(req.length(), Some(0));

        req.delete("content-length");
        req.delete("content-type");
        assert_eq!(req.length(), None);
        assert_eq!(req.type_(), None);
    }

    #[tokio::test]
    async fn test_text_body_is_read_once() {
        let mut req = request_with_body("text/plain", "hello");

        assert_eq!(req.text().await.unwrap(), "hello");
        assert!(req.is_body_consumed());
        assert!(matches!(req.text().await, Err(BodyError::Consumed)));
    }

    #[tokio::test]
    async fn test_json_body() {
        #[derive(Deserialize)]
        struct User {
            name: String,
        }

        let mut req = request_with_body("application/json", r#"{"name":"ada"}"#);
        let user: User = req.json().await.unwrap();
        assert_eq!(user.name, "ada");

        let mut req = request_with_body("application/json", "{not json");
        assert!(matches!(req.json::<User>().await, Err(BodyError::Syntax { .. })));
    }

    #[tokio::test]
    async fn test_form_bodies() {
        let mut req = request_with_body("application/x-www-form-urlencoded", "name=John&city=New+York");
        let form = req.form_data().await.unwrap();
        assert_eq!(form.len(), 2);
        assert_eq!(form.get("city"), Some(&crate::body::FormDataValue::Text("New York".into())));

        #[derive(Deserialize)]
        struct Person {
            name: String,
        }
        let mut req = request_with_body("application/x-www-form-urlencoded", "name=John");
        let person: Person = req.form().await.unwrap();
        assert_eq!(person.name, "John");

        let mut req = request_with_body("multipart/form-data; boundary=x", "");
        assert!(matches!(req.form_data().await, Err(BodyError::UnsupportedMediaType { .. })));
    }

    #[tokio::test]
    async fn test_blob_body() {
        let mut req = request_with_body("image/png", "png!");
        let blob = req.blob().await.unwrap();
        assert_eq!(blob.size(), 4);
        assert_eq!(blob.type_(), "image/png");
    }

    #[test]
    fn test_to_json() {
        let req = request("/x");
        let json = req.to_json();
        assert_eq!(json["method"], "GET");
        assert_eq!(json["url"], "http://example.com/x");
        assert_eq!(json["headers"]["host"], "example.com");
    }
}
