//! Shared inputs for the benchmarks.

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    input: TestInput,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, input: TestInput) -> Self {
        Self { name, group, input }
    }

    pub fn small(name: &'static str, input: TestInput) -> Self {
        Self::new(name, TestGroup::Small, input)
    }

    pub fn large(name: &'static str, input: TestInput) -> Self {
        Self::new(name, TestGroup::Large, input)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn input(&self) -> &TestInput {
        &self.input
    }
}

/// A request target plus an optional body and its content type.
#[derive(Debug, Copy, Clone)]
pub struct TestInput {
    uri: &'static str,
    content_type: Option<&'static str>,
    body: &'static str,
}

impl TestInput {
    pub const fn query(uri: &'static str) -> Self {
        Self { uri, content_type: None, body: "" }
    }

    pub const fn with_body(uri: &'static str, content_type: &'static str, body: &'static str) -> Self {
        Self { uri, content_type: Some(content_type), body }
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    pub fn body(&self) -> &'static str {
        self.body
    }

    pub fn len(&self) -> usize {
        self.uri.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Large,
}
