//! Response metadata for HTTP-flavoured stream jobs.

/// Status line and headers delivered with a `Headers` subcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// `-1` until a status line has been seen.
    pub status: i32,
    pub message: String,
    headers: Vec<(String, String)>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: -1,
            message: String::new(),
            headers: Vec::new(),
        }
    }
}

impl HttpResponse {
    /// Parse a header block: an optional `HTTP/1.x CODE message` line and
    /// `key: value` lines. Keys are lowercased.
    pub fn parse(raw: &str) -> Self {
        let mut response = Self::default();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("http/")) {
                let mut parts = line.splitn(3, char::is_whitespace);
                let _protocol = parts.next();
                response.status = parts
                    .next()
                    .and_then(|code| code.trim().parse().ok())
                    .unwrap_or(-1);
                response.message = parts.next().unwrap_or_default().trim().to_string();
            } else if let Some((key, value)) = line.split_once(':') {
                response
                    .headers
                    .push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        response
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 404 is an application-level answer with a readable body, not a
    /// transport failure.
    pub fn is_error(&self) -> bool {
        self.status != 404 && (self.status < 0 || self.status >= 400)
    }
}
