//! STAC document types used as the inter-service data contract.
//!
//! Catalogs carry only links (`item`, `prev`, `next`, `harmony_source`);
//! items carry a `data` asset, a four-number bbox, and a temporal range.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const STAC_VERSION: &str = "1.0.0-beta.2";

/// Link relation for the originating data source, carried on every
/// aggregation catalog.
pub const REL_HARMONY_SOURCE: &str = "harmony_source";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl StacLink {
    pub fn new(rel: &str, href: &str) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.to_string(),
            media_type: None,
            title: None,
        }
    }

    pub fn item(href: &str) -> Self {
        Self::new("item", href)
    }
}

/// A catalog: a list of links to items and neighboring catalog pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacCatalog {
    pub stac_version: String,
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacCatalog {
    pub fn new(id: String, description: String) -> Self {
        Self {
            stac_version: STAC_VERSION.to_string(),
            id,
            description,
            links: Vec::new(),
        }
    }

    /// Hrefs of all `item` links, in document order.
    pub fn item_hrefs(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.rel == "item")
            .map(|l| l.href.as_str())
            .collect()
    }

    /// Href of the next catalog page, if any.
    pub fn next_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "next")
            .map(|l| l.href.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacItemProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
}

/// A granule-level item with its data assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    pub stac_version: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub properties: StacItemProperties,
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<StacLink>,
}

impl StacItem {
    /// The `data` asset, the one the completer turns into a job link.
    pub fn data_asset(&self) -> Option<&StacAsset> {
        self.assets.get("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_item_hrefs_in_order() {
        let mut catalog = StacCatalog::new("c0".to_string(), "outputs".to_string());
        catalog.links.push(StacLink::new(REL_HARMONY_SOURCE, "s3://src"));
        catalog.links.push(StacLink::item("item0.json"));
        catalog.links.push(StacLink::item("item1.json"));
        catalog.links.push(StacLink::new("next", "catalog1.json"));
        assert_eq!(catalog.item_hrefs(), vec!["item0.json", "item1.json"]);
        assert_eq!(catalog.next_href(), Some("catalog1.json"));
    }

    #[test]
    fn test_item_round_trip() {
        let json = serde_json::json!({
            "stac_version": STAC_VERSION,
            "id": "granule-1",
            "bbox": [-10.0, -10.0, 10.0, 10.0],
            "properties": {
                "start_datetime": "2020-01-01T00:00:00Z",
                "end_datetime": "2020-01-02T00:00:00Z",
            },
            "assets": {
                "data": {
                    "href": "s3://b/a.tif",
                    "type": "image/tiff",
                    "title": "a.tif",
                }
            }
        });
        let item: StacItem = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(item.bbox, Some([-10.0, -10.0, 10.0, 10.0]));
        let asset = item.data_asset().unwrap();
        assert_eq!(asset.href, "s3://b/a.tif");
        assert_eq!(asset.media_type.as_deref(), Some("image/tiff"));
        assert_eq!(serde_json::to_value(&item).unwrap(), json);
    }
}
