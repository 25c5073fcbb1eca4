//! Azure Files data plane client.
//!
//! Writes files into a share using Shared Key authorization: every request
//! is signed with HMAC-SHA256 over a canonical description of the request,
//! keyed with the storage account key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rapidapi_core::cloud::FileShareTarget;
use rapidapi_core::{Error, Result};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use tracing::debug;

const STORAGE_VERSION: &str = "2021-08-06";
/// Largest range a single Put Range call accepts.
const MAX_RANGE: usize = 4 * 1024 * 1024;

/// Client for one file share.
pub struct FileShareClient {
    client: reqwest::Client,
    target: FileShareTarget,
    key: Vec<u8>,
    base_url: String,
}

impl FileShareClient {
    pub fn new(client: reqwest::Client, target: FileShareTarget) -> Result<Self> {
        let key = BASE64.decode(target.account_key.trim()).map_err(|e| {
            Error::InvalidInput(format!(
                "storage account key for {} is not valid base64: {}",
                target.account_name, e
            ))
        })?;
        let base_url = format!("https://{}.file.core.windows.net", target.account_name);
        Ok(Self {
            client,
            target,
            key,
            base_url,
        })
    }

    /// Create a directory in the share. An existing directory is fine.
    pub async fn create_directory(&self, directory: &str) -> Result<()> {
        let path = format!("/{}/{}", self.target.share_name, directory);
        let response = self
            .send(Method::PUT, &path, &[("restype", "directory")], &[], Bytes::new())
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Ok(()),
            _ => Err(storage_error(response).await),
        }
    }

    /// Create (or replace) a file and write `contents` into it.
    pub async fn upload(&self, directory: &str, file_name: &str, contents: Bytes) -> Result<()> {
        self.create_directory(directory).await?;

        let path = format!("/{}/{}/{}", self.target.share_name, directory, file_name);
        let length = contents.len().to_string();
        let response = self
            .send(
                Method::PUT,
                &path,
                &[],
                &[
                    ("x-ms-type", "file".to_string()),
                    ("x-ms-content-length", length),
                ],
                Bytes::new(),
            )
            .await?;
        if !response.status().is_success() {
            return Err(storage_error(response).await);
        }

        let mut offset = 0;
        while offset < contents.len() {
            let end = (offset + MAX_RANGE).min(contents.len());
            let range = format!("bytes={}-{}", offset, end - 1);
            let response = self
                .send(
                    Method::PUT,
                    &path,
                    &[("comp", "range")],
                    &[("x-ms-range", range), ("x-ms-write", "update".to_string())],
                    contents.slice(offset..end),
                )
                .await?;
            if !response.status().is_success() {
                return Err(storage_error(response).await);
            }
            offset = end;
        }

        debug!(
            account = %self.target.account_name,
            path = %path,
            bytes = contents.len(),
            "Uploaded file"
        );
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let mut ms_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ms_headers.push((
            "x-ms-date".to_string(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ));
        ms_headers.push(("x-ms-version".to_string(), STORAGE_VERSION.to_string()));

        let request = SignedRequest {
            method: method.as_str(),
            account: &self.target.account_name,
            path,
            query,
            headers: &ms_headers,
            content_length: body.len(),
        };
        let authorization = format!(
            "SharedKey {}:{}",
            self.target.account_name,
            sign(&self.key, &request.string_to_sign())
        );

        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .query(query)
            .header("Authorization", authorization)
            .header("Content-Length", body.len());
        for (name, value) in &ms_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("file share request failed: {}", e)))
    }
}

/// The parts of a request covered by the signature.
struct SignedRequest<'a> {
    method: &'a str,
    account: &'a str,
    path: &'a str,
    query: &'a [(&'a str, &'a str)],
    headers: &'a [(String, String)],
    content_length: usize,
}

impl SignedRequest<'_> {
    fn string_to_sign(&self) -> String {
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };

        // Verb, then Content-Encoding, Content-Language, Content-Length,
        // Content-MD5, Content-Type, Date, If-Modified-Since, If-Match,
        // If-None-Match, If-Unmodified-Since, Range.
        let mut out = format!(
            "{}\n\n\n{}\n\n\n\n\n\n\n\n\n",
            self.method, content_length
        );

        let mut headers: Vec<(String, &str)> = self
            .headers
            .iter()
            .filter(|(k, _)| k.to_ascii_lowercase().starts_with("x-ms-"))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
            .collect();
        headers.sort();
        for (name, value) in headers {
            out.push_str(&format!("{}:{}\n", name, value));
        }

        out.push_str(&format!("/{}{}", self.account, self.path));
        let mut query: Vec<(String, &str)> = self
            .query
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), *v))
            .collect();
        query.sort();
        for (name, value) in query {
            out.push_str(&format!("\n{}:{}", name, value));
        }
        out
    }
}

fn sign(key: &[u8], string_to_sign: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take any size key");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

async fn storage_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let text = response.text().await.unwrap_or_default();

    let message = if code.is_empty() {
        format!("{}: {}", status, text.trim())
    } else {
        format!("{} ({})", status, code)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::Cloud(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> FileShareTarget {
        FileShareTarget {
            account_name: "stdemoapp".to_string(),
            account_key: BASE64.encode(b"account-key"),
            share_name: "sharedemoapp".to_string(),
        }
    }

    #[test]
    fn test_string_to_sign_for_range_write() {
        let headers = vec![
            ("x-ms-write".to_string(), "update".to_string()),
            ("x-ms-date".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            ("x-ms-range".to_string(), "bytes=0-9".to_string()),
            ("x-ms-version".to_string(), STORAGE_VERSION.to_string()),
        ];
        let request = SignedRequest {
            method: "PUT",
            account: "stdemoapp",
            path: "/sharedemoapp/schema/Project.csdl",
            query: &[("comp", "range")],
            headers: &headers,
            content_length: 10,
        };

        assert_eq!(
            request.string_to_sign(),
            "PUT\n\n\n10\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-range:bytes=0-9\n\
             x-ms-version:2021-08-06\n\
             x-ms-write:update\n\
             /stdemoapp/sharedemoapp/schema/Project.csdl\n\
             comp:range"
        );
    }

    #[test]
    fn test_zero_length_is_blank() {
        let request = SignedRequest {
            method: "PUT",
            account: "acct",
            path: "/share/dir",
            query: &[("restype", "directory")],
            headers: &[],
            content_length: 0,
        };
        assert!(request.string_to_sign().starts_with("PUT\n\n\n\n"));
        assert!(request.string_to_sign().ends_with("/acct/share/dir\nrestype:directory"));
    }

    #[test]
    fn test_signature_is_stable_base64() {
        let first = sign(b"key", "payload");
        let second = sign(b"key", "payload");
        assert_eq!(first, second);
        assert_eq!(BASE64.decode(&first).unwrap().len(), 32);
        assert_ne!(first, sign(b"other", "payload"));
    }

    #[test]
    fn test_client_rejects_bad_key() {
        let mut bad = target();
        bad.account_key = "not base64!".to_string();
        assert!(matches!(
            FileShareClient::new(reqwest::Client::new(), bad),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_client_url() {
        let client = FileShareClient::new(reqwest::Client::new(), target()).unwrap();
        assert_eq!(client.base_url, "https://stdemoapp.file.core.windows.net");
        assert_eq!(client.key, b"account-key");
    }
}
