//! Media pipeline: resolve the highest-resolution variant, crop to the
//! holder window, re-encode as PNG, and upload to content-addressed paths.
//!
//! Uploads are idempotent overwrites — re-running an identifier rewrites the
//! same `<root>/<grade>/<cert_id>_<side>.png` keys without error.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{CertId, Grade, MediaRef, Side};

/// Reference resolution the crop rectangles were calibrated against.
const REF_W: u32 = 1024;
const REF_H: u32 = 1768;

/// Holder window in reference coordinates. The back label sits a few pixels
/// differently, hence the separate rectangle.
const FRONT_RECT: Rect = Rect { left: 110, top: 467, right: 920, bottom: 1625 };
const BACK_RECT: Rect = Rect { left: 110, top: 467, right: 915, bottom: 1622 };

struct Rect {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

/// Archives extracted media for one identifier. Returns how many sides
/// completed the pipeline.
pub trait Archive {
    fn archive(
        &self,
        id: CertId,
        grade: Grade,
        media: &[MediaRef],
    ) -> impl Future<Output = Result<usize>> + Send;
}

pub struct MediaPipeline {
    http: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    root: String,
}

impl MediaPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            store,
            root: root.into(),
        })
    }

    /// Rewrite the low-resolution path segment and keep the upgrade only if
    /// the variant actually exists upstream.
    async fn resolve_variant(&self, url: &str) -> String {
        let upgraded = url.replace("/small/", "/large/");
        if upgraded == url {
            return url.to_string();
        }
        match self.http.head(&upgraded).send().await {
            Ok(resp) if resp.status().is_success() => upgraded,
            _ => url.to_string(),
        }
    }

    async fn process_one(&self, id: CertId, grade: Grade, media: &MediaRef) -> Result<()> {
        let url = self.resolve_variant(&media.url).await;
        debug!(cert = %id, side = %media.side, %url, "downloading");

        let bytes = self.http.get(&url).send().await?.error_for_status()?.bytes().await?;
        let img = image::load_from_memory(&bytes)?;
        let cropped = crop_to_holder(&img, media.side);
        let png = encode_png(&cropped)?;

        let path = object_path(&self.root, grade, id, media.side);
        self.store.put(&path, PutPayload::from(png)).await?;
        debug!(cert = %id, side = %media.side, %path, "uploaded");
        Ok(())
    }
}

impl Archive for MediaPipeline {
    async fn archive(&self, id: CertId, grade: Grade, media: &[MediaRef]) -> Result<usize> {
        let mut archived = 0;
        for m in media {
            match self.process_one(id, grade, m).await {
                Ok(()) => archived += 1,
                Err(e) => warn!(cert = %id, side = %m.side, "media archival failed: {e}"),
            }
        }
        Ok(archived)
    }
}

/// Destination key: `<root>/<grade>/<cert_id>_<side>.png`.
pub fn object_path(root: &str, grade: Grade, id: CertId, side: Side) -> ObjectPath {
    ObjectPath::from(format!("{root}/{grade}/{id}_{side}.png"))
}

/// Crop to the holder window, scaling the reference rectangle to the actual
/// source resolution.
pub fn crop_to_holder(img: &DynamicImage, side: Side) -> DynamicImage {
    let rect = match side {
        Side::Front => &FRONT_RECT,
        Side::Back => &BACK_RECT,
    };
    let (w, h) = (img.width() as u64, img.height() as u64);

    let left = (rect.left as u64 * w / REF_W as u64) as u32;
    let top = (rect.top as u64 * h / REF_H as u64) as u32;
    let right = (rect.right as u64 * w / REF_W as u64) as u32;
    let bottom = (rect.bottom as u64 * h / REF_H as u64) as u32;

    img.crop_imm(left, top, right - left, bottom - top)
}

/// Lossless PNG re-encode.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Pick the storage backend from the bucket URI: `gs://bucket` for GCS
/// (credentials from the environment), anything else is a local directory
/// for dev and tests.
pub fn create_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    if let Some(name) = bucket.strip_prefix("gs://") {
        tracing::info!(bucket = name, "using GCS object store");
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(name)
            .build()?;
        return Ok(Arc::new(store));
    }

    std::fs::create_dir_all(bucket)
        .map_err(|e| crate::error::Error::Other(format!("storage dir {bucket}: {e}")))?;
    tracing::info!(dir = bucket, "using local filesystem object store");
    Ok(Arc::new(LocalFileSystem::new_with_prefix(bucket)?))
}
