//! Banner layout maps and render fragments.
//!
//! A banner stores layout *keys* (`"landscape"`, `"top_left"`, `"center"`).
//! The layout configuration resolves them to the sizes and inline styles the
//! client script applies. HTML templating stays client side: fragments carry
//! the template kind and its raw content only.
use std::collections::BTreeMap;

use campaign::{Banner, BannerTemplate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Named banner size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub name: String,
    pub width: String,
    pub height: String,
}

/// Named placement (position or alignment) with its inline CSS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub name: String,
    #[serde(default)]
    pub style: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub dimensions: BTreeMap<String, Dimensions>,
    pub positions: BTreeMap<String, Placement>,
    pub alignments: BTreeMap<String, Placement>,
}

fn style(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn placement(name: &str, pairs: &[(&str, &str)]) -> Placement {
    Placement {
        name: name.to_string(),
        style: style(pairs),
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let dimensions = [
            ("landscape", "Landscape (728x90)", "728px", "90px"),
            ("medium_rectangle", "Medium rectangle (300x250)", "300px", "250px"),
        ]
        .into_iter()
        .map(|(key, name, width, height)| {
            (
                key.to_string(),
                Dimensions {
                    name: name.to_string(),
                    width: width.to_string(),
                    height: height.to_string(),
                },
            )
        })
        .collect();

        let positions = [
            ("top_left", placement("Top-Left", &[("top", "0px"), ("left", "0px")])),
            ("top_right", placement("Top-Right", &[("top", "0px"), ("right", "0px")])),
            ("bottom_left", placement("Bottom-Left", &[("bottom", "0px"), ("left", "0px")])),
            ("bottom_right", placement("Bottom-Right", &[("bottom", "0px"), ("right", "0px")])),
        ]
        .into_iter()
        .map(|(k, p)| (k.to_string(), p))
        .collect();

        let alignments = [
            ("left", placement("Left", &[("text-align", "left")])),
            ("center", placement("Center", &[("text-align", "center")])),
            ("right", placement("Right", &[("text-align", "right")])),
        ]
        .into_iter()
        .map(|(k, p)| (k.to_string(), p))
        .collect();

        Self {
            dimensions,
            positions,
            alignments,
        }
    }
}

/// Everything the client needs to show one banner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFragment {
    pub banner_id: Uuid,
    pub name: String,
    pub template: BannerTemplate,
    pub target_url: Option<String>,
    pub display_delay_ms: u64,
    pub closeable: bool,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Placement>,
}

impl LayoutConfig {
    /// Build the fragment for `banner`. Unknown layout keys resolve to `None`
    /// and are logged; the banner is still shown.
    pub fn render(&self, banner: &Banner) -> RenderFragment {
        RenderFragment {
            banner_id: banner.id,
            name: banner.name.clone(),
            template: banner.template,
            target_url: banner.target_url.clone(),
            display_delay_ms: banner.display_delay_ms,
            closeable: banner.closeable,
            content: banner.content.clone(),
            dimensions: lookup(&self.dimensions, banner.dimensions.as_deref(), banner.id, "dimensions"),
            position: lookup(&self.positions, banner.position.as_deref(), banner.id, "position"),
            alignment: lookup(&self.alignments, banner.alignment.as_deref(), banner.id, "alignment"),
        }
    }
}

fn lookup<T: Clone>(
    map: &BTreeMap<String, T>,
    key: Option<&str>,
    banner_id: Uuid,
    kind: &'static str,
) -> Option<T> {
    let key = key?;
    let found = map.get(key).cloned();
    if found.is_none() {
        tracing::warn!(banner_id = %banner_id, kind, key, "unknown banner layout key");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn banner(dimensions: Option<&str>, position: Option<&str>, alignment: Option<&str>) -> Banner {
        Banner {
            id: Uuid::new_v4(),
            name: "spring sale".into(),
            template: BannerTemplate::MediumRectangle,
            dimensions: dimensions.map(str::to_string),
            position: position.map(str::to_string),
            alignment: alignment.map(str::to_string),
            target_url: Some("https://example.com/sale".into()),
            display_delay_ms: 1500,
            closeable: true,
            content: json!({ "header": "Spring sale", "button": "Buy" }),
        }
    }

    #[test]
    fn defaults_cover_the_stock_layouts() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.dimensions["landscape"].width, "728px");
        assert_eq!(layout.dimensions["medium_rectangle"].height, "250px");
        assert_eq!(layout.positions.len(), 4);
        assert_eq!(layout.positions["bottom_right"].style["right"], "0px");
        assert_eq!(layout.alignments["center"].style["text-align"], "center");
    }

    #[test]
    fn render_resolves_layout_keys() {
        let layout = LayoutConfig::default();
        let b = banner(Some("medium_rectangle"), Some("top_left"), Some("right"));
        let fragment = layout.render(&b);

        assert_eq!(fragment.banner_id, b.id);
        assert_eq!(fragment.dimensions.unwrap().width, "300px");
        assert_eq!(fragment.position.unwrap().style["top"], "0px");
        assert_eq!(fragment.alignment.unwrap().name, "Right");
        assert_eq!(fragment.content["button"], "Buy");
    }

    #[test]
    fn unknown_keys_are_dropped_not_fatal() {
        let fragment = LayoutConfig::default().render(&banner(Some("skyscraper"), None, None));
        assert!(fragment.dimensions.is_none());
        assert!(fragment.position.is_none());

        let wire = serde_json::to_value(&fragment).unwrap();
        assert!(wire.get("dimensions").is_none());
        assert_eq!(wire["displayDelayMs"], 1500);
        assert_eq!(wire["template"], "medium_rectangle");
    }

    #[test]
    fn partial_yaml_style_overrides_keep_other_sections() {
        let layout: LayoutConfig = serde_json::from_value(json!({
            "dimensions": { "bar": { "name": "Bar", "width": "100%", "height": "50px" } }
        }))
        .unwrap();
        assert!(layout.dimensions.contains_key("bar"));
        assert!(!layout.dimensions.contains_key("landscape"));
        assert_eq!(layout.alignments.len(), 3);
    }
}
