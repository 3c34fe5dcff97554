//! Read-only data sources.
//!
//! Unlike managed resources, a lookup has no absent state to settle into:
//! a miss is always [`ReconcileError::NotFound`].

use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::hosting::{Hosting, Image, Region};

/// Region and image lookups.
#[derive(Clone, Copy)]
pub struct DataSources<'a> {
    hosting: &'a dyn Hosting,
}

impl<'a> DataSources<'a> {
    /// Creates a lookup helper over a hosting backend.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting) -> Self {
        Self { hosting }
    }

    /// Finds a region by code.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no region has this code, or the remote error.
    pub async fn region(&self, code: &str) -> Result<Region> {
        let region = self
            .hosting
            .region_by_code(code)
            .await?
            .ok_or_else(|| ReconcileError::not_found("region", code))?;
        debug!("Region {code} resolved to {}", region.id);
        Ok(region)
    }

    /// Finds an image by name within the region with code `region_code`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the region or the image does not exist, or the
    /// remote error.
    pub async fn image(&self, name: &str, region_code: &str) -> Result<Image> {
        let region = self.region(region_code).await?;
        let image = self
            .hosting
            .image_by_name(name, &region.id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("image", format!("{name} in {region_code}")))?;
        debug!("Image '{name}' resolved to disk {}", image.disk_id);
        Ok(image)
    }
}
