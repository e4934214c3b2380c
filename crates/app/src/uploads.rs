use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use metrics::histogram;
use thiserror::Error;
use tracing::{info, warn};

use badger_core::{
    imaging::{ImageScaler, ImagingError, ScaledImage},
    upload::{UploadMeta, UploadPathBuilder},
};

/// Scales artwork and writes it below the media root.
#[derive(Clone)]
pub struct UploadStore {
    root: Arc<PathBuf>,
    url_prefix: Arc<str>,
    scaler: ImageScaler,
    paths: UploadPathBuilder,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str, scaler: ImageScaler) -> Self {
        Self {
            root: Arc::new(root.into()),
            url_prefix: Arc::from(url_prefix),
            scaler,
            paths: UploadPathBuilder::new(),
        }
    }

    /// Decodes and scales `bytes` off the async runtime.
    pub async fn prepare(&self, bytes: Vec<u8>) -> Result<ScaledImage, UploadError> {
        let scaler = self.scaler;
        let started = Instant::now();
        let scaled = tokio::task::spawn_blocking(move || scaler.scale(&bytes)).await??;
        histogram!("image_scale_seconds").record(started.elapsed().as_secs_f64());
        Ok(scaled)
    }

    /// Writes a scaled image and returns its path relative to the media root.
    pub async fn save(
        &self,
        meta: &UploadMeta,
        field: &str,
        image: &ScaledImage,
    ) -> Result<String, UploadError> {
        let relative = self.paths.build(meta, field, "png");
        let target = self.resolve(&relative)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &image.bytes).await?;
        info!(stage = "upload", path = %relative, bytes = image.bytes.len(), "stored image");
        Ok(relative)
    }

    /// Passes `stored` through, removing the file at `path` when the record
    /// referencing it was not written.
    pub async fn settle<T, E>(&self, path: Option<&str>, stored: Result<T, E>) -> Result<T, E> {
        if let (Err(_), Some(path)) = (&stored, path) {
            self.discard(path).await;
        }
        stored
    }

    /// Removes a file written by [`save`](Self::save) whose record was never stored.
    pub async fn discard(&self, relative: &str) {
        let Ok(target) = self.resolve(relative) else {
            return;
        };
        if let Err(err) = tokio::fs::remove_file(&target).await {
            warn!(stage = "upload", path = %relative, error = %err, "failed to remove orphaned upload");
        }
    }

    /// Joins `relative` onto the media root, refusing anything that could leave it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, UploadError> {
        let contained = Path::new(relative)
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(UploadError::OutsideRoot(relative.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Public URL of a stored relative path.
    pub fn url(&self, relative: &str) -> String {
        format!("{}{}", self.url_prefix, relative.trim_start_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Image(#[from] ImagingError),
    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("upload path {0} escapes the media root")]
    OutsideRoot(String),
}

impl UploadError {
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Self::Image(ImagingError::Decode(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 9, 9])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode");
        bytes
    }

    #[tokio::test]
    async fn saves_scaled_image_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), "/media/", ImageScaler::new(32, 32));

        let scaled = store.prepare(png(64, 48)).await.expect("scale");
        assert_eq!((scaled.width, scaled.height), (32, 32));

        let relative = store
            .save(&UploadMeta::badge("mentor"), "image", &scaled)
            .await
            .expect("save");
        assert!(relative.starts_with("badge/"));
        assert!(relative.ends_with(".png"));

        let written = std::fs::read(dir.path().join(&relative)).expect("file written");
        assert_eq!(written, scaled.bytes);
        assert_eq!(store.url(&relative), format!("/media/{relative}"));
    }

    #[tokio::test]
    async fn refuses_paths_outside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let media = dir.path().join("media");
        let store = UploadStore::new(&media, "/media/", ImageScaler::new(32, 32));
        let scaled = store.prepare(png(40, 40)).await.expect("scale");

        let meta = UploadMeta {
            base: "../outside".to_string(),
            slug: "mentor".to_string(),
        };
        let err = store.save(&meta, "image", &scaled).await.unwrap_err();
        assert!(matches!(err, UploadError::OutsideRoot(_)));
        assert!(!dir.path().join("outside").exists());

        let meta = UploadMeta {
            base: "/absolute".to_string(),
            slug: "mentor".to_string(),
        };
        let err = store.save(&meta, "image", &scaled).await.unwrap_err();
        assert!(matches!(err, UploadError::OutsideRoot(_)));
    }

    #[tokio::test]
    async fn hostile_username_stays_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let media = dir.path().join("media");
        let store = UploadStore::new(&media, "/media/", ImageScaler::new(32, 32));
        let scaled = store.prepare(png(40, 40)).await.expect("scale");

        let relative = store
            .save(&UploadMeta::award("../../../../escape", "mentor"), "image", &scaled)
            .await
            .expect("save");
        assert!(relative.starts_with("award/_/_/"));
        assert!(media.join(&relative).exists());
    }

    #[tokio::test]
    async fn discard_removes_saved_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), "/media/", ImageScaler::new(32, 32));
        let scaled = store.prepare(png(40, 40)).await.expect("scale");

        let relative = store
            .save(&UploadMeta::badge("mentor"), "image", &scaled)
            .await
            .expect("save");
        assert!(dir.path().join(&relative).exists());

        store.discard(&relative).await;
        assert!(!dir.path().join(&relative).exists());
    }

    #[tokio::test]
    async fn undecodable_bytes_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UploadStore::new(dir.path(), "/media/", ImageScaler::new(32, 32));

        let err = store.prepare(b"nope".to_vec()).await.unwrap_err();
        assert!(err.is_decode_failure());
    }
}
