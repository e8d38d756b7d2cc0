//! # Foreign Notification Layouts
//!
//! A map notification does not carry its content as data. It carries a
//! *remote layout*: a numeric layout id that only means something inside the
//! issuing application's resources, plus a list of mutations (set this text,
//! set that image) to replay over the inflated layout.
//!
//! This module models that world:
//! - [`AppResources`]: resolves the foreign app's symbol table and inflates
//!   its layouts (the platform glue implements it; [`PackageDump`] is a
//!   serde-loadable stand-in)
//! - [`ViewNode`]: the inflated tree
//! - [`find_by_name`]: depth-first lookup by resource entry name, because the
//!   layout's shape is not contractually stable but its names are
//!
//! Lookups return `Option`; nothing here assumes a view is present.

use crate::scraper::ScrapeError;
use crate::span_parser::StyledText;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Numeric view id in the foreign app's resource namespace.
pub type ViewId = u32;

/// App-scoped symbol table: view id → resource entry name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTable {
    entries: HashMap<ViewId, String>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ViewId, name: impl Into<String>) {
        self.entries.insert(id, name.into());
    }

    pub fn entry_name(&self, id: ViewId) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<(ViewId, S)> for ResourceTable {
    fn from_iter<T: IntoIterator<Item = (ViewId, S)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(id, name)| (id, name.into())).collect(),
        }
    }
}

/// Text as rendered: either a plain string or a styled one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextContent {
    Plain(String),
    Styled(StyledText),
}

impl Default for TextContent {
    fn default() -> Self {
        TextContent::Plain(String::new())
    }
}

impl TextContent {
    /// The characters, with styling dropped.
    pub fn as_str(&self) -> &str {
        match self {
            TextContent::Plain(text) => text,
            TextContent::Styled(styled) => &styled.text,
        }
    }
}

/// One node of an inflated layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewNode {
    Group {
        #[serde(default)]
        id: Option<ViewId>,
        #[serde(default)]
        children: Vec<ViewNode>,
    },
    Text {
        #[serde(default)]
        id: Option<ViewId>,
        #[serde(default)]
        content: TextContent,
    },
    Image {
        #[serde(default)]
        id: Option<ViewId>,
        #[serde(default, with = "bitmap_serde")]
        bitmap: Option<RgbaImage>,
    },
}

impl ViewNode {
    pub fn id(&self) -> Option<ViewId> {
        match self {
            ViewNode::Group { id, .. } | ViewNode::Text { id, .. } | ViewNode::Image { id, .. } => *id,
        }
    }

    /// Pre-order depth-first search.
    pub fn find(&self, predicate: &dyn Fn(&ViewNode) -> bool) -> Option<&ViewNode> {
        if predicate(self) {
            return Some(self);
        }
        match self {
            ViewNode::Group { children, .. } => children.iter().find_map(|child| child.find(predicate)),
            _ => None,
        }
    }

    fn find_mut(&mut self, id: ViewId) -> Option<&mut ViewNode> {
        if self.id() == Some(id) {
            return Some(self);
        }
        match self {
            ViewNode::Group { children, .. } => children.iter_mut().find_map(|child| child.find_mut(id)),
            _ => None,
        }
    }

    /// Replay one remote-layout mutation onto this tree.
    pub fn apply(&mut self, action: &ViewAction) -> Result<(), ScrapeError> {
        let view_id = action.view_id();
        let target = self
            .find_mut(view_id)
            .ok_or(ScrapeError::ViewNotFound(view_id))?;

        match (target, action) {
            (ViewNode::Text { content, .. }, ViewAction::SetText { content: value, .. }) => {
                *content = value.clone();
            }
            (ViewNode::Image { bitmap, .. }, ViewAction::SetImage { bitmap: value, .. }) => {
                *bitmap = value.clone();
            }
            _ => return Err(ScrapeError::ViewKindMismatch(view_id)),
        }
        Ok(())
    }

    /// Text of a `Text` node.
    pub fn text(&self) -> Option<&TextContent> {
        match self {
            ViewNode::Text { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Bitmap of an `Image` node.
    pub fn bitmap(&self) -> Option<&RgbaImage> {
        match self {
            ViewNode::Image { bitmap, .. } => bitmap.as_ref(),
            _ => None,
        }
    }
}

/// Mutation carried by a remote layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewAction {
    SetText {
        view_id: ViewId,
        content: TextContent,
    },
    SetImage {
        view_id: ViewId,
        #[serde(default, with = "bitmap_serde")]
        bitmap: Option<RgbaImage>,
    },
}

impl ViewAction {
    pub fn view_id(&self) -> ViewId {
        match self {
            ViewAction::SetText { view_id, .. } | ViewAction::SetImage { view_id, .. } => *view_id,
        }
    }
}

/// Layout id plus the mutations to replay over it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteLayout {
    pub layout_id: u32,
    #[serde(default)]
    pub actions: Vec<ViewAction>,
}

/// A posted notification, as handed over by the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub package: String,
    pub id: i32,
    #[serde(default)]
    pub ongoing: bool,
    #[serde(default)]
    pub post_time_millis: i64,
    /// Compact layout
    #[serde(default)]
    pub content_view: Option<RemoteLayout>,
    /// Expanded layout, when the app provides one
    #[serde(default)]
    pub big_content_view: Option<RemoteLayout>,
}

/// Access to another application's resources.
pub trait AppResources {
    /// Resolve the app-scoped symbol table of `package`.
    fn resource_table(&self, package: &str) -> Result<ResourceTable, ScrapeError>;

    /// Inflate layout `layout_id` of `package` into a fresh tree.
    fn inflate(&self, package: &str, layout_id: u32) -> Result<ViewNode, ScrapeError>;
}

/// Inflate `layout` and replay its mutations.
pub fn render<R: AppResources + ?Sized>(
    resources: &R,
    package: &str,
    layout: &RemoteLayout,
) -> Result<ViewNode, ScrapeError> {
    let mut root = resources.inflate(package, layout.layout_id)?;
    for action in &layout.actions {
        root.apply(action)?;
    }
    Ok(root)
}

/// Find the first node whose resource entry name equals `name`.
///
/// Nodes without an id, or with an id missing from `table`, never match.
pub fn find_by_name<'a>(root: &'a ViewNode, table: &ResourceTable, name: &str) -> Option<&'a ViewNode> {
    root.find(&|node: &ViewNode| {
        node.id()
            .and_then(|id| table.entry_name(id))
            .is_some_and(|entry| entry == name)
    })
}

/// JSON picture of a tree keyed by `Kind:entry_name`, for debugging layout
/// changes in the source app.
pub fn describe(node: &ViewNode, table: &ResourceTable) -> Value {
    let name = node.id().and_then(|id| table.entry_name(id)).unwrap_or("");
    match node {
        ViewNode::Group { children, .. } => {
            let children: Vec<Value> = children.iter().map(|child| describe(child, table)).collect();
            json!({ format!("Group:{name}"): children })
        }
        ViewNode::Text { content, .. } => json!({ format!("Text:{name}"): content.as_str() }),
        ViewNode::Image { bitmap, .. } => {
            let size = bitmap.as_ref().map(|b| format!("{}x{}", b.width(), b.height()));
            json!({ format!("Image:{name}"): size })
        }
    }
}

/// Serializable snapshot of one app's notification resources.
///
/// Captured on a device (or written by hand) and replayed by the binary and
/// the tests in place of live platform access.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackageDump {
    pub package: String,
    #[serde(default)]
    pub resources: ResourceTable,
    #[serde(default)]
    pub layouts: HashMap<u32, ViewNode>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl PackageDump {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl AppResources for PackageDump {
    fn resource_table(&self, package: &str) -> Result<ResourceTable, ScrapeError> {
        if package != self.package {
            return Err(ScrapeError::PackageNotFound(package.to_string()));
        }
        Ok(self.resources.clone())
    }

    fn inflate(&self, package: &str, layout_id: u32) -> Result<ViewNode, ScrapeError> {
        if package != self.package {
            return Err(ScrapeError::PackageNotFound(package.to_string()));
        }
        self.layouts
            .get(&layout_id)
            .cloned()
            .ok_or(ScrapeError::LayoutNotFound(layout_id))
    }
}

/// `Option<RgbaImage>` as `{width, height, rgba}`.
mod bitmap_serde {
    use image::RgbaImage;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RawBitmap {
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    }

    pub fn serialize<S: Serializer>(bitmap: &Option<RgbaImage>, serializer: S) -> Result<S::Ok, S::Error> {
        bitmap
            .as_ref()
            .map(|b| RawBitmap {
                width: b.width(),
                height: b.height(),
                rgba: b.as_raw().clone(),
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RgbaImage>, D::Error> {
        match Option::<RawBitmap>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => RgbaImage::from_raw(raw.width, raw.height, raw.rgba)
                .map(Some)
                .ok_or_else(|| D::Error::custom("rgba buffer does not match bitmap dimensions")),
        }
    }
}
