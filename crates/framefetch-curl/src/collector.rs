//! Per-transfer sink for response headers and body.

use curl::easy::{Handler, WriteError};

#[derive(Debug, Default)]
pub struct Collector {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let line = String::from_utf8_lossy(data);
        let line = line.trim_end_matches(['\r', '\n']);

        // Each response in a redirect chain starts with a status line; keep
        // only the headers of the last one.
        if line.starts_with("HTTP/") {
            self.headers.clear();
            self.body.clear();
        } else if let Some((name, value)) = line.split_once(':') {
            self.headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        true
    }
}
