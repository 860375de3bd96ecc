use std::io::Write;
use std::path::{Path, PathBuf};

use aws_sdk_s3::primitives::ByteStream;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::config::{FunctionCode, InvalidationConfig};
use crate::error::{aws_error, Error, Result};

/// custom runtimes look for an executable with exactly this name
pub const BOOTSTRAP: &str = "bootstrap";

/// `{function}_{adler32 of the binary}.zip`. the key only changes when the
/// code does, so an unchanged function does not cause a stack update.
pub fn archive_key(function_name: &str, bootstrap: &[u8]) -> String {
    let hash = adler::adler32_slice(bootstrap);
    format!("{function_name}_{hash:08x}.zip")
}

/// zips `bootstrap` into `out_dir` and returns the archive path and its key.
/// the entry has a fixed timestamp, so the same binary always zips to the same bytes.
/// always rebuilt: written to `<key>.partial`, then renamed over `<key>`.
pub fn build_archive(function_name: &str, bootstrap: &Path, out_dir: &Path) -> Result<(PathBuf, String)> {
    if bootstrap.file_name().and_then(|f| f.to_str()) != Some(BOOTSTRAP) {
        return Err(Error::Package(format!("{} must be named {BOOTSTRAP}", bootstrap.display())));
    }
    let contents = std::fs::read(bootstrap)?;
    let key = archive_key(function_name, &contents);
    std::fs::create_dir_all(out_dir)?;
    let archive = out_dir.join(&key);
    let partial = out_dir.join(format!("{key}.partial"));
    if let Err(e) = write_archive(&partial, &contents) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::rename(&partial, &archive)?;
    tracing::info!("wrote {} ({} bytes in)", archive.display(), contents.len());
    Ok((archive, key))
}

fn write_archive(path: &Path, contents: &[u8]) -> Result<()> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o755);
    let mut zip = ZipWriter::new(std::fs::File::create(path)?);
    zip.start_file(BOOTSTRAP, options)?;
    zip.write_all(contents)?;
    zip.finish()?.sync_all()?;
    Ok(())
}

pub struct ArtifactUploader {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ArtifactUploader {
    pub fn new(config: &aws_config::SdkConfig, bucket: &str) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            bucket: bucket.to_string(),
        }
    }

    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(aws_error(e))
                }
            }
        }
    }

    /// uploads `archive` under `key` unless the bucket already has it.
    /// returns whether anything was uploaded.
    pub async fn upload_if_missing(&self, key: &str, archive: &Path) -> Result<bool> {
        if self.object_exists(key).await? {
            tracing::info!("s3://{}/{key} already exists, skipping upload", self.bucket);
            return Ok(false);
        }
        let body = std::fs::read(archive)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(aws_error)?;
        tracing::info!("uploaded s3://{}/{key}", self.bucket);
        Ok(true)
    }
}

/// builds and uploads the invalidation function, returning the object key
/// to pass as the code key parameter.
pub async fn package_function(config: &aws_config::SdkConfig, inv: &InvalidationConfig, bootstrap: &Path, out_dir: &Path) -> Result<String> {
    let artifact_bucket = match &inv.code {
        FunctionCode::Archive { artifact_bucket, .. } => artifact_bucket,
        FunctionCode::Inline { .. } => {
            return Err(Error::Package("Inline function code is part of the template and is not packaged".into()));
        }
    };
    let (archive, key) = build_archive(&inv.function_name, bootstrap, out_dir)?;
    ArtifactUploader::new(config, artifact_bucket).upload_if_missing(&key, &archive).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_follows_the_content() {
        let a = archive_key("invalidateCacheLambda", b"binary v1");
        let b = archive_key("invalidateCacheLambda", b"binary v2");
        assert!(a.starts_with("invalidateCacheLambda_"));
        assert!(a.ends_with(".zip"));
        // 8 hex digits between the name and the extension
        assert_eq!(a.len(), "invalidateCacheLambda_".len() + 8 + ".zip".len());
        assert_ne!(a, b);
        assert_eq!(a, archive_key("invalidateCacheLambda", b"binary v1"));
    }

    #[test]
    fn known_checksum() {
        // adler32("Wikipedia") = 0x11e60398
        assert_eq!(archive_key("f", b"Wikipedia"), "f_11e60398.zip");
    }

    #[test]
    fn binary_must_be_named_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalidate_cache");
        std::fs::write(&path, b"x").unwrap();
        let err = build_archive("f", &path, dir.path()).unwrap_err();
        assert!(err.to_string().contains("must be named bootstrap"), "{err}");
    }

    #[test]
    fn archive_holds_an_executable_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(BOOTSTRAP), b"\x7fELF fake binary").unwrap();
        let out = dir.path().join("out");
        let (archive, key) = build_archive("invalidateCacheLambda", &bin.join(BOOTSTRAP), &out).unwrap();
        assert_eq!(archive, out.join(&key));

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), BOOTSTRAP);
        assert_eq!(entry.unix_mode().map(|m| m & 0o777), Some(0o755));
        drop(entry);

        let first = std::fs::read(&archive).unwrap();
        std::fs::remove_file(&archive).unwrap();
        let (again, _) = build_archive("invalidateCacheLambda", &bin.join(BOOTSTRAP), &out).unwrap();
        assert_eq!(std::fs::read(again).unwrap(), first);
    }

    #[test]
    fn stale_archive_under_the_key_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = dir.path().join(BOOTSTRAP);
        std::fs::write(&bootstrap, b"\x7fELF fake binary").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let key = archive_key("f", b"\x7fELF fake binary");
        std::fs::write(out.join(&key), b"PK\x03\x04truncated").unwrap();

        let (archive, _) = build_archive("f", &bootstrap, &out).unwrap();
        let zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        assert!(!out.join(format!("{key}.partial")).exists());
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_archive("f", &dir.path().join(BOOTSTRAP), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
