//! In-memory [`ResponseWriter`] for tests and embedders
//!
//! Records headers, status and body, and checks the header-before-body
//! ordering the filter promises.

use std::io;

use super::ResponseWriter;

/// Response captured in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryResponse {
    headers: Vec<(String, String)>,
    status: Option<u16>,
    body: Vec<u8>,
    body_writes: usize,
    /// Set if body bytes arrived before `write_header`
    body_before_header: bool,
    /// Fail body writes after this many successful ones
    fail_after: Option<usize>,
}

impl MemoryResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, Some(value));
        self
    }

    /// Body writes fail with `ConnectionReset` after `ok_writes` successes
    pub fn failing_after(mut self, ok_writes: usize) -> Self {
        self.fail_after = Some(ok_writes);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_writes(&self) -> usize {
        self.body_writes
    }

    /// Whether body bytes were ever written before the header
    pub fn body_before_header(&self) -> bool {
        self.body_before_header
    }
}

impl ResponseWriter for MemoryResponse {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn set_header(&mut self, name: &str, value: Option<&str>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        if let Some(value) = value {
            self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
    }

    fn write_header(&mut self, status: u16) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, body: &[u8]) -> io::Result<usize> {
        if self.fail_after == Some(self.body_writes) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "client disconnected"));
        }
        if self.status.is_none() {
            self.body_before_header = true;
        }
        self.body_writes += 1;
        self.body.extend_from_slice(body);
        Ok(body.len())
    }
}
