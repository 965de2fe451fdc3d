// src/map/view.rs v1
//! The map state the cache reads: visible extent, centre, base layer URL and capabilities

use super::capabilities::{StackType, TileServiceCapabilities};
use crate::tiles::{GeographicExtent, LonLat, TileCoordinate};

/// Read-only view of the map layer consumed by the cache.
pub trait MapView: Send + Sync {
    /// Current visible bounds, `None` before the map has been laid out.
    fn extent(&self) -> Option<GeographicExtent>;

    fn centre(&self) -> LonLat;

    fn zoom(&self) -> u8;

    fn capabilities(&self) -> TileServiceCapabilities;

    /// Base URL tiles are requested from, e.g. `http://host/mapcache/tms/1.0.0/layer/`.
    fn base_map_full_url(&self) -> String;

    fn tile_file_type(&self) -> String;

    fn stack_type(&self) -> StackType {
        self.capabilities().stack
    }
}

/// Build `{base}/{zoom}/{x}/{y}.{type}` without doubled separators.
pub fn tile_url(base: &str, tile: TileCoordinate, file_type: &str) -> String {
    format!(
        "{}/{}/{}/{}.{}",
        base.trim_end_matches('/'),
        tile.zoom,
        tile.x,
        tile.y,
        file_type.trim_start_matches('.')
    )
}

/// `{server}{tms_path}/{version}/{layer}/`
pub fn base_map_full_url(server: &str, tms_path: &str, version: &str, layer: &str) -> String {
    format!(
        "{}/{}/{}/{}/",
        server.trim_end_matches('/'),
        tms_path.trim_matches('/'),
        version.trim_matches('/'),
        layer.trim_matches('/')
    )
}

/// A fixed map view, used by the command line tool and in tests.
#[derive(Debug, Clone)]
pub struct StaticMapView {
    extent: Option<GeographicExtent>,
    centre: Option<LonLat>,
    zoom: u8,
    capabilities: TileServiceCapabilities,
    base_url: String,
    file_type: String,
}

impl StaticMapView {
    pub fn new(capabilities: TileServiceCapabilities, base_url: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            extent: None,
            centre: None,
            zoom: 0,
            capabilities,
            base_url: base_url.into(),
            file_type: file_type.into(),
        }
    }

    pub fn with_extent(mut self, extent: GeographicExtent) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_centre(mut self, centre: LonLat) -> Self {
        self.centre = Some(centre);
        self
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }
}

impl MapView for StaticMapView {
    fn extent(&self) -> Option<GeographicExtent> {
        self.extent
    }

    /// Explicit centre, otherwise the middle of the extent.
    fn centre(&self) -> LonLat {
        self.centre
            .or_else(|| self.extent.map(|e| e.centre()))
            .unwrap_or(LonLat::new(0.0, 0.0))
    }

    fn zoom(&self) -> u8 {
        self.zoom
    }

    fn capabilities(&self) -> TileServiceCapabilities {
        self.capabilities.clone()
    }

    fn base_map_full_url(&self) -> String {
        self.base_url.clone()
    }

    fn tile_file_type(&self) -> String {
        self.file_type.clone()
    }
}
