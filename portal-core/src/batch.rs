//! OData `$batch` support.
//!
//! Requests are encoded as a `multipart/mixed` body with one
//! `application/http` part per embedded GET. Responses are parsed back
//! into one [`BatchResponse`] per part, in the order the server returned
//! them. Nested `multipart/mixed` parts (change sets) are flattened.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

const BOUNDARY_PREFIX: &str = "batch_";
const BOUNDARY_RANDOM_LEN: usize = 11;
const ACCEPT_VERBOSE: &str = "application/json;odata=verbose";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("content type has no multipart boundary: {0}")]
    MissingBoundary(String),
    #[error("batch part has no header separator")]
    MalformedPart,
    #[error("invalid status line in batch part: {0}")]
    MalformedStatus(String),
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    boundary: String,
    parts: Vec<String>,
}

impl BatchRequest {
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_RANDOM_LEN)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("{BOUNDARY_PREFIX}{suffix}"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    pub fn push_get(&mut self, url: &Url) {
        let part = [
            "Content-Type: application/http",
            "Content-Transfer-Encoding: binary",
            "",
            format!("GET {url} HTTP/1.1").as_str(),
            format!("Accept: {ACCEPT_VERBOSE}").as_str(),
            "",
            "",
        ]
        .join("\r\n");
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn into_body(self) -> String {
        let mut body = String::new();
        for part in &self.parts {
            body.push_str("--");
            body.push_str(&self.boundary);
            body.push_str("\r\n");
            body.push_str(part);
        }
        body.push_str("--");
        body.push_str(&self.boundary);
        body.push_str("--\r\n");
        body
    }
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// One embedded HTTP response out of a batch reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

pub fn boundary_from_content_type(content_type: &str) -> Result<String, BatchError> {
    let mut segments = content_type.split(';');
    let mime = segments.next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("multipart/mixed") {
        return Err(BatchError::MissingBoundary(content_type.to_string()));
    }
    segments
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BatchError::MissingBoundary(content_type.to_string()))
}

pub fn parse_response(content_type: &str, body: &str) -> Result<Vec<BatchResponse>, BatchError> {
    let boundary = boundary_from_content_type(content_type)?;
    let mut out = Vec::new();
    parse_multipart(&boundary, body, &mut out)?;
    Ok(out)
}

fn parse_multipart(
    boundary: &str,
    body: &str,
    out: &mut Vec<BatchResponse>,
) -> Result<(), BatchError> {
    let delimiter = format!("--{boundary}");
    // The first segment is the preamble.
    for segment in split_on_delimiter(body, &delimiter).into_iter().skip(1) {
        if segment.starts_with("--") {
            break;
        }
        let segment = strip_line_break_prefix(segment);
        let segment = strip_line_break_suffix(segment);
        if segment.trim().is_empty() {
            continue;
        }
        let (mime_head, payload) = split_head(segment).ok_or(BatchError::MalformedPart)?;
        let mime_headers = parse_headers(mime_head);
        match find_header(&mime_headers, "content-type") {
            Some(nested) if nested.to_ascii_lowercase().starts_with("multipart/mixed") => {
                let nested_boundary = boundary_from_content_type(nested)?;
                parse_multipart(&nested_boundary, payload, out)?;
            }
            _ => out.push(parse_http_message(payload)?),
        }
    }
    Ok(())
}

/// Splits `body` at every delimiter line. A delimiter only counts at the
/// start of the body or of a line, followed by `--`, whitespace or a line
/// break.
fn split_on_delimiter<'a>(body: &'a str, delimiter: &str) -> Vec<&'a str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (index, _) in body.match_indices(delimiter) {
        if index < start {
            continue;
        }
        let at_line_start = index == 0 || body[..index].ends_with('\n');
        let rest = &body[index + delimiter.len()..];
        let terminated = rest.is_empty()
            || rest.starts_with("--")
            || rest.starts_with(['\r', '\n', ' ', '\t']);
        if at_line_start && terminated {
            segments.push(&body[start..index]);
            start = index + delimiter.len();
        }
    }
    segments.push(&body[start..]);
    segments
}

fn parse_http_message(message: &str) -> Result<BatchResponse, BatchError> {
    let (head, body) = split_head(message).unwrap_or((message, ""));
    let (status_line, header_block) = head.split_once('\n').unwrap_or((head, ""));
    let status_line = status_line.trim_end_matches('\r');
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| BatchError::MalformedStatus(status_line.to_string()))?;
    Ok(BatchResponse {
        status,
        headers: parse_headers(header_block),
        body: body.to_string(),
    })
}

fn parse_headers(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    let crlf = text.find("\r\n\r\n").map(|idx| (idx, 4));
    let lf = text.find("\n\n").map(|idx| (idx, 2));
    let (idx, sep) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&text[..idx], &text[idx + sep..]))
}

fn strip_line_break_prefix(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

// The line break before a delimiter belongs to the delimiter.
fn strip_line_break_suffix(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_one_part_per_get() {
        let mut request = BatchRequest::with_boundary("batch_test");
        request.push_get(&Url::parse("https://portal.example/_api/a").unwrap());
        request.push_get(&Url::parse("https://portal.example/_api/b").unwrap());

        assert_eq!(request.len(), 2);
        assert_eq!(
            request.content_type(),
            "multipart/mixed; boundary=batch_test"
        );
        let body = request.into_body();
        assert_eq!(body.matches("--batch_test\r\n").count(), 2);
        assert!(body.contains("GET https://portal.example/_api/a HTTP/1.1\r\n"));
        assert!(body.ends_with("--batch_test--\r\n"));
    }

    #[test]
    fn generated_boundary_has_prefix() {
        let request = BatchRequest::new();
        assert!(request.boundary().starts_with("batch_"));
        assert_eq!(request.boundary().len(), "batch_".len() + 11);
        assert!(request.is_empty());
    }

    #[test]
    fn boundary_is_read_from_quoted_parameter() {
        let boundary =
            boundary_from_content_type("multipart/mixed; boundary=\"batchresponse_1\"").unwrap();
        assert_eq!(boundary, "batchresponse_1");
    }

    #[test]
    fn non_multipart_content_type_is_rejected() {
        assert!(matches!(
            boundary_from_content_type("application/json"),
            Err(BatchError::MissingBoundary(_))
        ));
    }

    #[test]
    fn parses_each_embedded_response() {
        let body = concat!(
            "--batchresponse_1\r\n",
            "Content-Type: application/http\r\n",
            "Content-Transfer-Encoding: binary\r\n",
            "\r\n",
            "HTTP/1.1 200 OK\r\n",
            "CONTENT-TYPE: application/json;odata=verbose;charset=utf-8\r\n",
            "\r\n",
            "{\"d\":{\"Name\":\"a.txt\"}}\r\n",
            "--batchresponse_1\r\n",
            "Content-Type: application/http\r\n",
            "Content-Transfer-Encoding: binary\r\n",
            "\r\n",
            "HTTP/1.1 404 Not Found\r\n",
            "CONTENT-TYPE: application/json;odata=verbose;charset=utf-8\r\n",
            "\r\n",
            "{\"error\":{\"code\":\"-2147024894\"}}\r\n",
            "--batchresponse_1--\r\n",
        );

        let parts = parse_response("multipart/mixed; boundary=batchresponse_1", body).unwrap();

        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_success());
        assert_eq!(parts[0].body, "{\"d\":{\"Name\":\"a.txt\"}}");
        assert_eq!(
            parts[0].header("content-type"),
            Some("application/json;odata=verbose;charset=utf-8")
        );
        let value: serde_json::Value = parts[0].json().unwrap();
        assert_eq!(value["d"]["Name"], "a.txt");
        assert_eq!(parts[1].status, 404);
        assert!(!parts[1].is_success());
    }

    #[test]
    fn json_with_braces_in_strings_is_kept_intact() {
        let body = concat!(
            "--b\r\n",
            "Content-Type: application/http\r\n",
            "\r\n",
            "HTTP/1.1 200 OK\r\n",
            "\r\n",
            "{\"d\":{\"Name\":\"{weird}\\r\\nname\"}}\r\n",
            "--b--\r\n",
        );
        let parts = parse_response("multipart/mixed; boundary=b", body).unwrap();
        let value: serde_json::Value = parts[0].json().unwrap();
        assert_eq!(value["d"]["Name"], "{weird}\r\nname");
    }

    #[test]
    fn nested_change_sets_are_flattened() {
        let body = concat!(
            "--outer\r\n",
            "Content-Type: multipart/mixed; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: application/http\r\n",
            "\r\n",
            "HTTP/1.1 204 No Content\r\n",
            "\r\n",
            "\r\n",
            "--inner--\r\n",
            "\r\n",
            "--outer--\r\n",
        );
        let parts = parse_response("multipart/mixed; boundary=outer", body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].status, 204);
        assert!(parts[0].body.is_empty());
    }

    #[test]
    fn boundary_text_inside_a_body_does_not_split_the_part() {
        let body = concat!(
            "--b1\r\n",
            "Content-Type: application/http\r\n",
            "\r\n",
            "HTTP/1.1 200 OK\r\n",
            "\r\n",
            "{\"d\":{\"Name\":\"x--b1y\",\"Title\":\"--b1--\"}}\r\n",
            "--b1--\r\n",
        );
        let parts = parse_response("multipart/mixed; boundary=b1", body).unwrap();
        assert_eq!(parts.len(), 1);
        let value: serde_json::Value = parts[0].json().unwrap();
        assert_eq!(value["d"]["Name"], "x--b1y");
        assert_eq!(value["d"]["Title"], "--b1--");
    }

    #[test]
    fn longer_boundary_sharing_a_prefix_is_not_a_delimiter() {
        let body = concat!(
            "--b\r\n",
            "Content-Type: application/http\r\n",
            "\r\n",
            "HTTP/1.1 200 OK\r\n",
            "\r\n",
            "--bother\r\n",
            "--b--\r\n",
        );
        let parts = parse_response("multipart/mixed; boundary=b", body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body, "--bother");
    }

    #[test]
    fn garbage_status_line_is_an_error() {
        let body = "--b\r\nContent-Type: application/http\r\n\r\nnot http\r\n\r\n--b--";
        assert!(matches!(
            parse_response("multipart/mixed; boundary=b", body),
            Err(BatchError::MalformedStatus(_))
        ));
    }
}
