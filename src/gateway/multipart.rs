//! Minimal `multipart/form-data` support: an encoder for outgoing
//! submissions and a parser for the relay's incoming requests.

use anyhow::{anyhow, Result};
use rand::RngCore;

/// Outgoing form body.
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            boundary: format!("signcap-{}", hex::encode(nonce)),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            escape(name)
        ));
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n",
            escape(name),
            escape(filename),
            content_type
        ));
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Close the form; returns `(content type, body)`.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        let content_type = self.content_type();
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (content_type, self.body)
    }

    fn open_part(&mut self, headers: &str) {
        self.body
            .extend_from_slice(format!("--{}\r\n{}\r\n", self.boundary, headers).as_bytes());
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One decoded form field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| anyhow!("multipart body has no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let header_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| anyhow!("multipart part has unterminated headers"))?;
        let headers = String::from_utf8_lossy(&body[pos..header_end]);
        let data_start = header_end + 4;

        let mut closing = b"\r\n".to_vec();
        closing.extend_from_slice(&delimiter);
        let data_end = find(body, &closing, data_start)
            .ok_or_else(|| anyhow!("multipart part is not terminated"))?;

        let mut part = Part {
            name: String::new(),
            filename: None,
            content_type: None,
            data: body[data_start..data_end].to_vec(),
        };
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "content-disposition" => {
                    for param in value.split(';').skip(1) {
                        let Some((k, v)) = param.split_once('=') else {
                            continue;
                        };
                        let v = unquote(v.trim());
                        match k.trim().to_ascii_lowercase().as_str() {
                            "name" => part.name = v,
                            "filename" => part.filename = Some(v),
                            _ => {}
                        }
                    }
                }
                "content-type" => part.content_type = Some(value.trim().to_string()),
                _ => {}
            }
        }
        if part.name.is_empty() {
            return Err(anyhow!("multipart part without a field name"));
        }
        parts.push(part);
        pos = data_end + closing.len();
    }
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_encodes() -> Result<()> {
        let image = [0xFFu8, 0xD8, b'\r', b'\n', b'-', b'-', 0xFF, 0xD9];
        let form = MultipartForm::new()
            .text("nombre", "hand-1.jpg")
            .file("imagen", "hand-1.jpg", "image/jpeg", &image);
        let (content_type, body) = form.finish();

        let boundary = boundary_from_content_type(&content_type).expect("boundary");
        let parts = parse(&body, &boundary)?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "nombre");
        assert_eq!(parts[0].data, b"hand-1.jpg");
        assert_eq!(parts[0].filename, None);
        assert_eq!(parts[1].name, "imagen");
        assert_eq!(parts[1].filename.as_deref(), Some("hand-1.jpg"));
        assert_eq!(parts[1].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(parts[1].data, image);
        Ok(())
    }

    #[test]
    fn parses_a_browser_style_body() -> Result<()> {
        let body = b"------WebKitFormBoundaryX\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a b.jpg\"\r\n\
Content-Type: image/jpeg\r\n\
\r\n\
JPEGDATA\r\n\
------WebKitFormBoundaryX--\r\n";
        let parts = parse(body, "----WebKitFormBoundaryX")?;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename.as_deref(), Some("a b.jpg"));
        assert_eq!(parts[0].data, b"JPEGDATA");
        Ok(())
    }

    #[test]
    fn boundary_requires_form_data() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc\""),
            Some("abc".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
    }

    #[test]
    fn rejects_truncated_bodies() {
        assert!(parse(b"no boundary here", "x").is_err());
        assert!(parse(b"--x\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc", "x").is_err());
    }
}
