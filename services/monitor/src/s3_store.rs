use crate::config::UploadConfig;
use crate::remote_store::{FolderId, RemoteError, RemoteStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use tracing::{debug, info, instrument};

const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

/// S3-compatible remote store.
///
/// Folders are key prefixes ending in `/`, each materialised by a zero-byte
/// marker object so it exists before any image lands in it:
/// `{root_folder}/{YYYY-MM-DD}/{YYYYMMDD_HHMMSS}.jpg`
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Create a new S3 store. Credentials come from the default AWS chain.
    pub async fn new(config: &UploadConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn authorize(&self) -> Result<(), RemoteError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                RemoteError::Authorization(format!(
                    "cannot access bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(bucket = %self.bucket, "S3 access verified");
        Ok(())
    }

    async fn find_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<Option<FolderId>, RemoteError> {
        let key = folder_key(parent, name);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(Some(FolderId::new(key))),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(RemoteError::Folder {
                        name: name.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }

    #[instrument(skip(self, parent), fields(parent = %parent))]
    async fn create_folder(&self, parent: &FolderId, name: &str) -> Result<FolderId, RemoteError> {
        let key = folder_key(parent, name);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from_static(b""))
            .content_type(FOLDER_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| RemoteError::Folder {
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Folder marker created");
        Ok(FolderId::new(key))
    }

    #[instrument(skip(self, folder, local_path), fields(folder = %folder))]
    async fn upload_file(
        &self,
        folder: &FolderId,
        file_name: &str,
        local_path: &Path,
    ) -> Result<String, RemoteError> {
        let key = object_key(folder, file_name);
        let upload_error = |message: String| RemoteError::Upload {
            file: file_name.to_string(),
            message,
        };

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        debug!(key = %key, path = %local_path.display(), "Uploading capture to S3");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(get_content_type(file_name))
            .send()
            .await
            .map_err(|e| upload_error(DisplayErrorContext(&e).to_string()))?;

        Ok(key)
    }
}

/// Key of the folder marker for `name` under `parent`.
fn folder_key(parent: &FolderId, name: &str) -> String {
    format!("{}{}/", parent.as_str(), sanitize_path_component(name))
}

fn object_key(folder: &FolderId, file_name: &str) -> String {
    format!("{}{}", folder.as_str(), file_name)
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Get content type from a file name's extension
fn get_content_type(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_keys_mirror_local_layout() {
        let root = folder_key(&FolderId::root(), "plants");
        assert_eq!(root, "plants/");

        let day = folder_key(&FolderId::new(root), "2024-05-17");
        assert_eq!(day, "plants/2024-05-17/");

        let object = object_key(&FolderId::new(day), "20240517_080509.jpg");
        assert_eq!(object, "plants/2024-05-17/20240517_080509.jpg");
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("2024-05-17"), "2024-05-17");
        assert_eq!(sanitize_path_component("plants/../etc"), "plants____etc");
        assert_eq!(sanitize_path_component("back yard"), "back_yard");
    }

    #[test]
    fn test_get_content_type() {
        assert_eq!(get_content_type("20240517_080509.jpg"), "image/jpeg");
        assert_eq!(get_content_type("IMG.JPEG"), "image/jpeg");
        assert_eq!(get_content_type("frame.png"), "image/png");
        assert_eq!(get_content_type("notes"), "application/octet-stream");
    }
}
