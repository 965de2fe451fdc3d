// src/map/capabilities.rs v1
//! TMS tile service capabilities: tile size and units-per-pixel per zoom level

use crate::error::{CacheError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Resolutions used when the capabilities document is unavailable.
pub const DEFAULT_RESOLUTIONS: [f64; 11] = [1024.0, 512.0, 256.0, 128.0, 64.0, 32.0, 16.0, 8.0, 4.0, 2.0, 1.0];

pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Which tile stack the base layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackType {
    Open,
    Closed,
}

impl StackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackType::Open => "open",
            StackType::Closed => "closed",
        }
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(StackType::Open),
            "closed" => Ok(StackType::Closed),
            other => Err(CacheError::Config(format!("Unknown tile stack '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileServiceCapabilities {
    pub tile_width_px: u32,
    pub tile_height_px: u32,
    pub units_per_pixel_by_zoom: BTreeMap<u8, f64>,
    pub stack: StackType,
}

impl TileServiceCapabilities {
    /// Built-in 256px tiles with the default resolution table.
    pub fn defaults(stack: StackType) -> Self {
        Self {
            tile_width_px: DEFAULT_TILE_SIZE,
            tile_height_px: DEFAULT_TILE_SIZE,
            units_per_pixel_by_zoom: DEFAULT_RESOLUTIONS
                .iter()
                .enumerate()
                .map(|(zoom, upp)| (zoom as u8, *upp))
                .collect(),
            stack,
        }
    }

    /// Resolution at `zoom`; zoom levels missing from the fetched table fall
    /// back to the default table.
    pub fn units_per_pixel(&self, zoom: u8) -> Option<f64> {
        self.units_per_pixel_by_zoom
            .get(&zoom)
            .copied()
            .or_else(|| DEFAULT_RESOLUTIONS.get(zoom as usize).copied())
            .filter(|upp| *upp > 0.0)
    }

    pub fn zoom_levels(&self) -> usize {
        self.units_per_pixel_by_zoom.len()
    }

    /// Parse a TMS `TileMap` document.
    ///
    /// Zoom levels come from each `TileSet`'s `order` attribute, or its position
    /// in the document when absent. A document without any `TileSet` is an error.
    pub fn parse_xml(doc: &str, stack: StackType) -> Result<Self> {
        let mut reader = Reader::from_str(doc);
        reader.config_mut().trim_text(true);

        let mut width = None;
        let mut height = None;
        let mut tile_sets = BTreeMap::new();
        let mut position: u8 = 0;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                    b"TileFormat" if width.is_none() => {
                        width = attr_value(&e, b"width")?.map(|v| parse_number::<u32>(&v)).transpose()?;
                        height = attr_value(&e, b"height")?.map(|v| parse_number::<u32>(&v)).transpose()?;
                    }
                    b"TileSet" => {
                        let upp = attr_value(&e, b"units-per-pixel")?
                            .ok_or_else(|| CacheError::Capabilities("TileSet without units-per-pixel".to_string()))?;
                        let upp = parse_number::<f64>(&upp)?;
                        let zoom = match attr_value(&e, b"order")? {
                            Some(order) => parse_number::<u8>(&order)?,
                            None => position,
                        };
                        tile_sets.insert(zoom, upp);
                        position = position.saturating_add(1);
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(CacheError::Xml(format!(
                        "Error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if tile_sets.is_empty() {
            return Err(CacheError::Capabilities(
                "Capabilities does not contain tileset details".to_string(),
            ));
        }

        Ok(Self {
            tile_width_px: width.unwrap_or(DEFAULT_TILE_SIZE),
            tile_height_px: height.unwrap_or(DEFAULT_TILE_SIZE),
            units_per_pixel_by_zoom: tile_sets,
            stack,
        })
    }

    /// Fetch the capabilities document, falling back to [`TileServiceCapabilities::defaults`]
    /// if it is unreachable or malformed.
    pub async fn fetch_or_default(
        client: &reqwest::Client,
        url: &str,
        stack: StackType,
        timeout: Duration,
    ) -> Self {
        match Self::fetch(client, url, stack, timeout).await {
            Ok(caps) => {
                log::info!("Loaded {} zoom levels from {}", caps.zoom_levels(), url);
                caps
            }
            Err(e) => {
                log::warn!("Capabilities not found ({}). Use defaults.", e);
                Self::defaults(stack)
            }
        }
    }

    pub async fn fetch(client: &reqwest::Client, url: &str, stack: StackType, timeout: Duration) -> Result<Self> {
        let response = client.get(url).timeout(timeout).send().await?;

        if !response.status().is_success() {
            return Err(CacheError::Capabilities(format!("HTTP error: {}", response.status())));
        }

        let body = response.text().await?;
        Self::parse_xml(&body, stack)
    }
}

fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| CacheError::Xml(e.to_string()))?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(|e| CacheError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_number<T: FromStr>(value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| CacheError::Capabilities(format!("Invalid number '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE_MAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TileMap version="1.0.0" tilemapservice="http://example.org/tms/1.0.0/">
  <Title>fieldtripgb@BNG</Title>
  <SRS>EPSG:27700</SRS>
  <BoundingBox minx="0" miny="0" maxx="700000" maxy="1300000"/>
  <Origin x="0" y="0"/>
  <TileFormat width="256" height="256" mime-type="image/jpeg" extension="jpg"/>
  <TileSets profile="none">
    <TileSet href="http://example.org/0" units-per-pixel="1792" order="0"/>
    <TileSet href="http://example.org/1" units-per-pixel="896" order="1"/>
    <TileSet href="http://example.org/2" units-per-pixel="448" order="2"/>
  </TileSets>
</TileMap>"#;

    #[test]
    fn test_parse_tile_map() {
        let caps = TileServiceCapabilities::parse_xml(TILE_MAP, StackType::Closed).unwrap();
        assert_eq!(caps.tile_width_px, 256);
        assert_eq!(caps.tile_height_px, 256);
        assert_eq!(caps.zoom_levels(), 3);
        assert_eq!(caps.units_per_pixel(1), Some(896.0));
        assert_eq!(caps.stack, StackType::Closed);
    }

    #[test]
    fn test_tile_sets_without_order_use_position() {
        let doc = r#"<TileMap><TileFormat width="512" height="256"/><TileSets>
            <TileSet units-per-pixel="10"/><TileSet units-per-pixel="5"/></TileSets></TileMap>"#;
        let caps = TileServiceCapabilities::parse_xml(doc, StackType::Open).unwrap();
        assert_eq!(caps.tile_width_px, 512);
        assert_eq!(caps.units_per_pixel(0), Some(10.0));
        assert_eq!(caps.units_per_pixel(1), Some(5.0));
        // falls through to the default table
        assert_eq!(caps.units_per_pixel(2), Some(256.0));
    }

    #[test]
    fn test_missing_tile_sets_is_error() {
        let doc = r#"<TileMap><TileFormat width="256" height="256"/></TileMap>"#;
        assert!(TileServiceCapabilities::parse_xml(doc, StackType::Open).is_err());
    }

    #[test]
    fn test_malformed_values_are_errors() {
        let doc = r#"<TileMap><TileSets><TileSet units-per-pixel="abc"/></TileSets></TileMap>"#;
        assert!(TileServiceCapabilities::parse_xml(doc, StackType::Open).is_err());
        assert!(TileServiceCapabilities::parse_xml("<TileMap><TileSet", StackType::Open).is_err());
    }

    #[test]
    fn test_defaults() {
        let caps = TileServiceCapabilities::defaults(StackType::Open);
        assert_eq!(caps.zoom_levels(), DEFAULT_RESOLUTIONS.len());
        assert_eq!(caps.units_per_pixel(0), Some(1024.0));
        assert_eq!(caps.units_per_pixel(10), Some(1.0));
        assert_eq!(caps.units_per_pixel(11), None);
    }

    #[test]
    fn test_stack_type_parsing() {
        assert_eq!("Closed".parse::<StackType>().unwrap(), StackType::Closed);
        assert!("mixed".parse::<StackType>().is_err());
    }
}
