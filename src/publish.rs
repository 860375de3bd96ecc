use std::path::{Path, PathBuf};

use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::LogType;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use serde::Deserialize;

use crate::error::{aws_error, Error, Result};

fn iter_files_recursively(start_dir: &Path, callback: &mut impl FnMut(PathBuf)) -> Result<()> {
    for entry in std::fs::read_dir(start_dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else {
            callback(path);
        }
    }
    Ok(())
}

/// every file under `dir` paired with its object key: the path relative
/// to `dir` with `/` separators. Sorted by key.
pub fn collect_site_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = vec![];
    iter_files_recursively(dir, &mut |path| files.push(path))?;
    let mut out = vec![];
    for path in files {
        let relative = path.strip_prefix(dir)
            .map_err(|_| Error::InvalidConfig(format!("{} is not inside {}", path.display(), dir.display())))?;
        let key = relative.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((path, key));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" | "map" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// uploads every file under `dir` to `bucket`. returns how many were uploaded.
pub async fn upload_site(config: &aws_config::SdkConfig, bucket: &str, dir: &Path) -> Result<usize> {
    let client = aws_sdk_s3::Client::new(config);
    let files = collect_site_files(dir)?;
    for (path, key) in files.iter() {
        let body = ByteStream::from(std::fs::read(path)?);
        client.put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(path))
            .body(body)
            .send()
            .await
            .map_err(aws_error)?;
        tracing::info!("uploaded s3://{bucket}/{key}");
    }
    Ok(files.len())
}

#[derive(Debug, Deserialize)]
struct FunctionResponse {
    #[serde(rename = "statusCode")]
    status_code: u16,
    body: String,
}

/// the invalidation function replies with `{statusCode, body}` where body
/// is itself a json encoded string.
pub fn parse_function_response(payload: &[u8]) -> Result<(u16, String)> {
    let resp: FunctionResponse = serde_json::from_slice(payload)?;
    let message = serde_json::from_str::<String>(&resp.body).unwrap_or(resp.body);
    Ok((resp.status_code, message))
}

/// invokes the invalidation function and waits for it. returns the
/// function's message, eg: `Invalidation created: I2J0I21PCUYOIK`
pub async fn trigger_invalidation(config: &aws_config::SdkConfig, function_name: &str) -> Result<String> {
    let client = aws_sdk_lambda::Client::new(config);
    let resp = client.invoke()
        .function_name(function_name)
        .log_type(LogType::Tail)
        .payload(Blob::new("{}"))
        .send()
        .await
        .map_err(aws_error)?;
    if let Some(log) = resp.log_result() {
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(log) {
            tracing::debug!("{function_name} log tail:\n{}", String::from_utf8_lossy(&decoded));
        }
    }
    let payload: &[u8] = resp.payload().map(|p| p.as_ref()).unwrap_or_default();
    if let Some(err) = resp.function_error() {
        return Err(Error::Aws(format!("{function_name} failed ({err}): {}", String::from_utf8_lossy(payload))));
    }
    let (status, message) = parse_function_response(payload)?;
    if status != 200 {
        return Err(Error::Aws(format!("{function_name} returned {status}: {message}")));
    }
    tracing::info!("{message}");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets").join("img")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(dir.path().join("assets").join("site.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("assets").join("img").join("logo.svg"), "<svg/>").unwrap();
        let keys: Vec<String> = collect_site_files(dir.path()).unwrap().into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec!["assets/img/logo.svg", "assets/site.css", "index.html"]);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a/b/APP.JS")), "text/javascript");
        assert_eq!(content_type_for(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(content_type_for(Path::new("LICENSE")), "application/octet-stream");
    }

    #[test]
    fn function_response_body_is_unwrapped() {
        let (status, message) = parse_function_response(br#"{"statusCode":200,"body":"\"Invalidation created: I2J0I21PCUYOIK\""}"#).unwrap();
        assert_eq!(status, 200);
        assert_eq!(message, "Invalidation created: I2J0I21PCUYOIK");
        let (status, message) = parse_function_response(br#"{"statusCode":500,"body":"\"Error: AccessDenied\""}"#).unwrap();
        assert_eq!(status, 500);
        assert_eq!(message, "Error: AccessDenied");
        assert!(parse_function_response(b"null").is_err());
    }
}
