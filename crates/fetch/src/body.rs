use crate::error::BoxError;
use crate::query::Query;
use bytes::{BufMut, Bytes, BytesMut};
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A type-erased body stream, used for both inbound and streamed outbound bodies.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Boxes any body whose error converts into [`BoxError`].
pub fn boxed<B>(body: B) -> BoxBody
where
    B: HttpBody<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed()
}

/// The value a handler assigns to [`Response::set_body`](crate::Response::set_body).
#[derive(Debug)]
pub enum Body {
    Text(String),
    Blob(Blob),
    Binary(Bytes),
    Stream(BoxBody),
    FormData(FormData),
    Form(Query),
    Response(http::Response<ResponseBody>),
    Json(serde_json::Value),
}

impl Body {
    /// Serializes `value` into a JSON body. Object keys keep the order `value` serializes them in.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Body::Json)
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Body::Stream(boxed(body))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Byte length of the body, when it is known without consuming it.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Text(text) => Some(text.len() as u64),
            Body::Blob(blob) => Some(blob.size()),
            Body::Binary(bytes) => Some(bytes.len() as u64),
            Body::Form(query) => Some(query.to_query_string().len() as u64),
            Body::Json(value) => Some(value.to_string().len() as u64),
            Body::Stream(_) | Body::FormData(_) | Body::Response(_) => None,
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Binary(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Body {
    fn from(value: &'static [u8]) -> Self {
        Body::Binary(Bytes::from_static(value))
    }
}

impl From<Blob> for Body {
    fn from(value: Blob) -> Self {
        Body::Blob(value)
    }
}

impl From<FormData> for Body {
    fn from(value: FormData) -> Self {
        Body::FormData(value)
    }
}

impl From<Query> for Body {
    fn from(value: Query) -> Self {
        Body::Form(value)
    }
}

impl From<http::Response<ResponseBody>> for Body {
    fn from(value: http::Response<ResponseBody>) -> Self {
        Body::Response(value)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<BoxBody> for Body {
    fn from(value: BoxBody) -> Self {
        Body::Stream(value)
    }
}

/// Raw bytes with a declared media type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    bytes: Bytes,
    type_: String,
}

impl Blob {
    pub fn new(bytes: impl Into<Bytes>, type_: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), type_: type_.into() }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The declared media type, empty when unknown.
    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormDataValue {
    Text(String),
    File { filename: String, blob: Blob },
}

/// An ordered list of form fields, sent as `multipart/form-data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, FormDataValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), FormDataValue::Text(value.into())));
    }

    pub fn append_file(&mut self, name: impl Into<String>, filename: impl Into<String>, blob: Blob) {
        self.fields.push((name.into(), FormDataValue::File { filename: filename.into(), blob }));
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&FormDataValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormDataValue> {
        self.fields.iter().filter(|(k, _)| k == name).map(|(_, v)| v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormDataValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn encode(&self, boundary: &str) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, value) in &self.fields {
            buf.put_slice(b"--");
            buf.put_slice(boundary.as_bytes());
            buf.put_slice(b"\r\n");
            match value {
                FormDataValue::Text(text) => {
                    buf.put_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quotes(name)).as_bytes());
                    buf.put_slice(text.as_bytes());
                }
                FormDataValue::File { filename, blob } => {
                    let type_ = if blob.type_().is_empty() { crate::utils::BINARY_TYPE } else { blob.type_() };
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {type_}\r\n\r\n",
                            escape_quotes(name),
                            escape_quotes(filename),
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(blob.bytes());
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

pub(crate) fn multipart_boundary() -> String {
    format!("----formdata-{:016x}", fastrand::u64(..))
}

/// The body of an outbound response: a single chunk, or a stream.
pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(BoxBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self { inner: Kind::Once(Some(bytes)) }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: Kind::Stream(boxed(body)) }
    }

    pub(crate) fn from_box(body: BoxBody) -> Self {
        Self { inner: Kind::Stream(body) }
    }

    /// Converts back into a stream so it can be re-emitted elsewhere.
    pub fn into_box(self) -> BoxBody {
        match self.inner {
            Kind::Once(None) => http_body_util::Empty::new().map_err(|never| match never {}).boxed(),
            Kind::Once(Some(bytes)) => http_body_util::Full::new(bytes).map_err(|never| match never {}).boxed(),
            Kind::Stream(body) => body,
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Kind::Once(bytes) => f.debug_tuple("ResponseBody::Once").field(bytes).finish(),
            Kind::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(box_body) => Pin::new(box_body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}
