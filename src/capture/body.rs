//! Request and response body extraction

use axum::body::Bytes;
use serde_json::Value;

use crate::context::CapturedResponseBody;
use crate::models::RequestBody;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

fn base_media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

pub fn is_form_content_type(content_type: &str) -> bool {
    let base = base_media_type(content_type);
    base.eq_ignore_ascii_case(FORM_URLENCODED) || base.eq_ignore_ascii_case(MULTIPART_FORM)
}

fn is_multipart(content_type: &str) -> bool {
    base_media_type(content_type).eq_ignore_ascii_case(MULTIPART_FORM)
}

/// Turn a buffered request body into its snapshot form
///
/// Form bodies become ordered key/value pairs; anything else is parsed as
/// JSON, falling back to the raw text. An empty body yields `None`.
pub async fn extract_request_body(content_type: Option<&str>, body: &Bytes) -> Option<RequestBody> {
    if body.is_empty() {
        return None;
    }

    match content_type {
        Some(ct) if is_multipart(ct) => Some(RequestBody::Form(read_multipart(ct, body).await)),
        Some(ct) if is_form_content_type(ct) => Some(RequestBody::Form(read_urlencoded(body))),
        _ => Some(parse_text_body(&String::from_utf8_lossy(body))),
    }
}

pub fn parse_text_body(text: &str) -> RequestBody {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => RequestBody::Json(json),
        Err(_) => RequestBody::Text(text.to_string()),
    }
}

/// Ordered form fields, multi-valued keys joined with commas
#[derive(Default)]
struct FormFields(Vec<(String, Vec<String>)>);

impl FormFields {
    fn push(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.0.push((key, vec![value])),
        }
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        self.0
            .into_iter()
            .map(|(key, values)| (key, values.join(",")))
            .collect()
    }
}

fn read_urlencoded(body: &Bytes) -> Vec<(String, String)> {
    let mut fields = FormFields::default();
    for (key, value) in url::form_urlencoded::parse(body) {
        fields.push(key.into_owned(), value.into_owned());
    }
    fields.into_pairs()
}

async fn read_multipart(content_type: &str, body: &Bytes) -> Vec<(String, String)> {
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(e) => {
            tracing::debug!(error = %e, "Multipart body has no usable boundary");
            return Vec::new();
        }
    };

    // Already buffered under the host's body limit, so no further size constraint
    let chunks = futures::stream::iter([Ok::<_, std::io::Error>(body.clone())]);
    let mut multipart = multer::Multipart::new(chunks, boundary);

    let mut fields = FormFields::default();
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Multipart body truncated, keeping fields read so far");
                break;
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let file_type = field.content_type().map(|mime| mime.to_string());

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, field = %name, "Multipart field unreadable");
                break;
            }
        };

        match file_name {
            Some(file_name) => files.push((name, file_type.unwrap_or_default(), file_name, data.len())),
            None => fields.push(name, String::from_utf8_lossy(&data).into_owned()),
        }
    }

    let mut pairs = fields.into_pairs();
    for (index, (name, file_type, file_name, length)) in files.into_iter().enumerate() {
        pairs.push((format!("Name_{index}"), name));
        pairs.push((format!("ContentType_{index}"), file_type));
        pairs.push((format!("FileName_{index}"), file_name));
        pairs.push((format!("Length_{index}"), length.to_string()));
    }
    pairs
}

/// Response body and size, replaced by a notice when over the limit
pub fn capture_response_body(body: &[u8], limit_mb: u64) -> CapturedResponseBody {
    let size = body.len() as u64;
    let limit_bytes = limit_mb.saturating_mul(1024 * 1024);

    let content = if size > limit_bytes {
        Some(format!("Response body exceeds limit of {}MB", limit_mb))
    } else if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(body).into_owned())
    };

    CapturedResponseBody { content, size }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_form_content_type_detection() {
        assert!(is_form_content_type("application/x-www-form-urlencoded"));
        assert!(is_form_content_type("Multipart/Form-Data; boundary=abc"));
        assert!(!is_form_content_type("application/json"));
        assert!(!is_form_content_type("text/plain; charset=x-www-form-urlencoded"));
    }

    #[tokio::test]
    async fn test_empty_body_is_none() {
        assert_eq!(extract_request_body(Some("application/json"), &Bytes::new()).await, None);
    }

    #[tokio::test]
    async fn test_json_and_text_bodies() {
        let json_body = Bytes::from_static(br#"{"name":"widget","qty":2}"#);
        assert_eq!(
            extract_request_body(Some("application/json"), &json_body).await,
            Some(RequestBody::Json(json!({"name": "widget", "qty": 2})))
        );

        let text = Bytes::from_static(b"not-json");
        assert_eq!(
            extract_request_body(None, &text).await,
            Some(RequestBody::Text("not-json".to_string()))
        );
    }

    #[tokio::test]
    async fn test_urlencoded_joins_repeated_keys() {
        let body = Bytes::from_static(b"tag=a&name=ana+maria&tag=b");
        let extracted = extract_request_body(Some("application/x-www-form-urlencoded"), &body).await;
        assert_eq!(
            extracted,
            Some(RequestBody::Form(pairs(&[("tag", "a,b"), ("name", "ana maria")])))
        );
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let body = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "report\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"q1.csv\"\r\n",
            "Content-Type: text/csv\r\n\r\n",
            "a,b\n1,2\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "draft\r\n",
            "--XyZ--\r\n",
        );

        let extracted = extract_request_body(
            Some("multipart/form-data; boundary=XyZ"),
            &Bytes::from_static(body.as_bytes()),
        )
        .await;

        assert_eq!(
            extracted,
            Some(RequestBody::Form(pairs(&[
                ("title", "report,draft"),
                ("Name_0", "doc"),
                ("ContentType_0", "text/csv"),
                ("FileName_0", "q1.csv"),
                ("Length_0", "7"),
            ])))
        );
    }

    #[tokio::test]
    async fn test_multipart_larger_than_extractor_default() {
        let file = vec![b'x'; 3 * 1024 * 1024];
        let length = file.len().to_string();
        let mut body = Vec::new();
        body.extend_from_slice(
            concat!(
                "--big\r\n",
                "Content-Disposition: form-data; name=\"note\"\r\n\r\n",
                "quarterly\r\n",
                "--big\r\n",
                "Content-Disposition: form-data; name=\"upload\"; filename=\"dump.bin\"\r\n",
                "Content-Type: application/octet-stream\r\n\r\n",
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file);
        body.extend_from_slice(b"\r\n--big--\r\n");

        let extracted =
            extract_request_body(Some("multipart/form-data; boundary=big"), &Bytes::from(body)).await;

        assert_eq!(
            extracted,
            Some(RequestBody::Form(pairs(&[
                ("note", "quarterly"),
                ("Name_0", "upload"),
                ("ContentType_0", "application/octet-stream"),
                ("FileName_0", "dump.bin"),
                ("Length_0", length.as_str()),
            ])))
        );
    }

    #[test]
    fn test_response_body_limit() {
        let captured = capture_response_body(b"{\"ok\":true}", 0);
        assert_eq!(captured.size, 11);
        assert_eq!(
            captured.content.as_deref(),
            Some("Response body exceeds limit of 0MB")
        );

        let captured = capture_response_body(b"{\"ok\":true}", 1);
        assert_eq!(captured.content.as_deref(), Some("{\"ok\":true}"));

        assert_eq!(capture_response_body(b"", 1), CapturedResponseBody::default());
    }
}
