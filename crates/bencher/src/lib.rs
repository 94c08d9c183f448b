/// A request shape exercised by the dispatch benchmarks.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    depth: usize,
    request: TestRequest,
}

impl TestCase {
    pub fn new(name: &'static str, depth: usize, request: TestRequest) -> Self {
        Self { name, depth, request }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of pass-through middlewares placed in front of the handler.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn request(&self) -> &TestRequest {
        &self.request
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TestRequest {
    method: &'static str,
    uri: &'static str,
    headers: &'static [(&'static str, &'static str)],
    body: &'static str,
}

impl TestRequest {
    pub const fn new(
        method: &'static str,
        uri: &'static str,
        headers: &'static [(&'static str, &'static str)],
        body: &'static str,
    ) -> Self {
        Self { method, uri, headers, body }
    }

    pub const fn get(uri: &'static str) -> Self {
        Self::new("GET", uri, &[], "")
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        self.headers
    }

    pub fn body(&self) -> &'static str {
        self.body
    }
}
