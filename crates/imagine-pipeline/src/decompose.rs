//! Grid decomposition: one composite 2x2 image in, four re-encoded tiles out.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageReader};
use tracing::{debug, info};

use crate::config::DEFAULT_TILE_QUALITY;
use crate::errors::{ConfigError, DecomposeError};
use crate::model::{ImageTile, TILE_COUNT, TileRegion};

pub const TILE_CONTENT_TYPE: &str = "image/jpeg";

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloads a composite asset.
#[async_trait::async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, DecomposeError>;
}

/// [`AssetFetcher`] backed by a plain HTTP GET.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::invalid("http_client", format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> Result<Self, ConfigError> {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, DecomposeError> {
        let fetch_error = |status: Option<u16>, message: String| DecomposeError::Fetch {
            url: url.to_string(),
            status,
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.status().map(|s| s.as_u16()), e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(
                Some(status.as_u16()),
                format!("unexpected status {status}"),
            ));
        }
        response
            .bytes()
            .await
            .map_err(|e| fetch_error(None, format!("failed to read body: {e}")))
    }
}

/// Quadrant rectangles of a `width x height` composite, in tile order.
///
/// Odd dimensions lose their last row or column: every tile is `floor(w/2) x floor(h/2)`.
pub fn quadrant_regions(width: u32, height: u32) -> Result<[TileRegion; TILE_COUNT], DecomposeError> {
    if width == 0 || height == 0 {
        return Err(DecomposeError::Format(format!(
            "image has no usable dimensions ({width}x{height})"
        )));
    }
    let half_w = width / 2;
    let half_h = height / 2;
    if half_w == 0 || half_h == 0 {
        return Err(DecomposeError::Format(format!(
            "image too small to split ({width}x{height})"
        )));
    }
    Ok([
        TileRegion::new(0, 0, half_w, half_h),
        TileRegion::new(half_w, 0, half_w, half_h),
        TileRegion::new(0, half_h, half_w, half_h),
        TileRegion::new(half_w, half_h, half_w, half_h),
    ])
}

/// Decodes a composite and re-encodes its quadrants as JPEG.
///
/// CPU bound; async callers should go through [`GridDecomposer`].
pub fn split_grid(bytes: &[u8], quality: u8) -> Result<[ImageTile; TILE_COUNT], DecomposeError> {
    let image = decode(bytes)?;
    let regions = quadrant_regions(image.width(), image.height())?;

    let tiles = regions
        .iter()
        .enumerate()
        .map(|(index, region)| encode_tile(&image, index, region, quality))
        .collect::<Result<Vec<_>, _>>()?;
    tiles
        .try_into()
        .map_err(|_| DecomposeError::Encode("tile count mismatch".into()))
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, DecomposeError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecomposeError::Format(e.to_string()))?
        .decode()
        .map_err(|e| DecomposeError::Format(e.to_string()))
}

fn encode_tile(
    image: &DynamicImage,
    index: usize,
    region: &TileRegion,
    quality: u8,
) -> Result<ImageTile, DecomposeError> {
    let rgb = image
        .crop_imm(region.x, region.y, region.width, region.height)
        .to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| DecomposeError::Encode(format!("tile {index}: {e}")))?;
    Ok(ImageTile {
        index,
        bytes: Bytes::from(buf),
        content_type: TILE_CONTENT_TYPE.to_string(),
    })
}

/// Fetches composites and splits them into tiles.
///
/// Stateless apart from the fetcher; safe to share between concurrent generations.
pub struct GridDecomposer {
    fetcher: Arc<dyn AssetFetcher>,
    quality: u8,
}

impl GridDecomposer {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            quality: DEFAULT_TILE_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub async fn decompose(&self, asset_url: &str) -> Result<[ImageTile; TILE_COUNT], DecomposeError> {
        let bytes = self.fetcher.fetch(asset_url).await?;
        debug!(url = %asset_url, bytes = bytes.len(), "composite fetched");

        let quality = self.quality;
        let tiles = tokio::task::spawn_blocking(move || split_grid(&bytes, quality))
            .await
            .map_err(|e| DecomposeError::Encode(format!("decode task failed: {e}")))??;
        info!(url = %asset_url, tiles = tiles.len(), "composite split");
        Ok(tiles)
    }
}
