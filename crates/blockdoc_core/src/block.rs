//! Block identifiers, block types and per-type data payloads.
//!
//! Every block in a document is a [`Node`]. Its [`BlockData`] is a closed set
//! of variants, one per [`BlockType`]; the type of a node is always derived
//! from its data so the two can never disagree. [`BlockType`] also carries the
//! editing policy used by the action layer (which blocks carry text, which can
//! have children, what a split produces).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[serde(transparent)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a block.
    NodeId
);
string_id!(
    /// Identifier of an ordered children list.
    ChildrenListId
);
string_id!(
    /// Identifier of a rich-text buffer.
    TextId
);

/// Kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum BlockType {
    /// Document root; its text is the page title
    Page,
    /// Plain paragraph
    Paragraph,
    /// Heading (level 1-6)
    Heading,
    /// Checkbox item
    Todo,
    /// Bulleted list item
    BulletedList,
    /// Numbered list item
    NumberedList,
    /// Block quote
    Quote,
    /// Callout with an icon
    Callout,
    /// Code block
    Code,
    /// Collapsible toggle list
    Toggle,
    /// Embedded image
    Image,
    /// Horizontal rule
    Divider,
    /// Table container (children are cells)
    Table,
    /// Table cell (children are the cell's content)
    TableCell,
    /// Block equation
    Math,
    /// A type written by a newer peer
    Unsupported,
}

/// Where the block created by splitting a block goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPlacement {
    /// Right after the split block; it takes over the split block's children
    NextSibling,
    /// Head of the split block's children
    FirstChild,
}

impl BlockType {
    /// All known block types.
    pub const ALL: [BlockType; 16] = [
        BlockType::Page,
        BlockType::Paragraph,
        BlockType::Heading,
        BlockType::Todo,
        BlockType::BulletedList,
        BlockType::NumberedList,
        BlockType::Quote,
        BlockType::Callout,
        BlockType::Code,
        BlockType::Toggle,
        BlockType::Image,
        BlockType::Divider,
        BlockType::Table,
        BlockType::TableCell,
        BlockType::Math,
        BlockType::Unsupported,
    ];

    /// Wire name stored in the shared document.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Page => "page",
            BlockType::Paragraph => "paragraph",
            BlockType::Heading => "heading",
            BlockType::Todo => "todo",
            BlockType::BulletedList => "bulleted_list",
            BlockType::NumberedList => "numbered_list",
            BlockType::Quote => "quote",
            BlockType::Callout => "callout",
            BlockType::Code => "code",
            BlockType::Toggle => "toggle",
            BlockType::Image => "image",
            BlockType::Divider => "divider",
            BlockType::Table => "table",
            BlockType::TableCell => "table_cell",
            BlockType::Math => "math",
            BlockType::Unsupported => "unsupported",
        }
    }

    /// Whether blocks of this type own a rich-text buffer.
    ///
    /// Embeds (image, divider, table, math) have none.
    pub fn has_text(self) -> bool {
        !matches!(
            self,
            BlockType::Image
                | BlockType::Divider
                | BlockType::Table
                | BlockType::TableCell
                | BlockType::Math
                | BlockType::Unsupported
        )
    }

    /// Whether blocks of this type may have children.
    pub fn can_have_children(self) -> bool {
        !matches!(
            self,
            BlockType::Code
                | BlockType::Image
                | BlockType::Divider
                | BlockType::Math
                | BlockType::Unsupported
        )
    }

    /// List-like types continue as the same type when split.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            BlockType::Todo | BlockType::BulletedList | BlockType::NumberedList
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| format!("Unknown block type: {}", s))
    }
}

/// Horizontal alignment of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ImageAlign {
    /// Left aligned
    Left,
    /// Centered
    #[default]
    Center,
    /// Right aligned
    Right,
}

/// Type-specific payload of a block.
///
/// Serialized internally tagged by `ty`, so `{"ty": "heading", "level": 2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "ty", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum BlockData {
    /// Document root
    Page,
    /// Plain paragraph
    Paragraph,
    /// Heading
    Heading {
        /// Level 1-6
        level: u8,
    },
    /// Checkbox item
    Todo {
        /// Whether the box is ticked
        #[serde(default)]
        checked: bool,
    },
    /// Bulleted list item
    BulletedList,
    /// Numbered list item
    NumberedList {
        /// First number of the list, when it does not start at 1
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<u32>,
    },
    /// Block quote
    Quote,
    /// Callout
    Callout {
        /// Emoji or icon name
        #[serde(default)]
        icon: String,
    },
    /// Code block
    Code {
        /// Language used for highlighting
        #[serde(default)]
        language: String,
    },
    /// Toggle list
    Toggle {
        /// Whether the children are hidden
        #[serde(default)]
        collapsed: bool,
    },
    /// Image
    Image {
        /// Image location
        url: String,
        /// Alignment
        #[serde(default)]
        align: ImageAlign,
    },
    /// Divider
    Divider,
    /// Table
    Table {
        /// Row count
        rows: u32,
        /// Column count
        cols: u32,
    },
    /// Table cell
    TableCell {
        /// Zero-based row
        row: u32,
        /// Zero-based column
        col: u32,
    },
    /// Block equation
    Math {
        /// LaTeX source
        #[serde(default)]
        formula: String,
    },
    /// Unknown type; its stored fields are left untouched
    #[serde(other)]
    Unsupported,
}

impl BlockData {
    /// The block type of this payload.
    pub fn block_type(&self) -> BlockType {
        match self {
            BlockData::Page => BlockType::Page,
            BlockData::Paragraph => BlockType::Paragraph,
            BlockData::Heading { .. } => BlockType::Heading,
            BlockData::Todo { .. } => BlockType::Todo,
            BlockData::BulletedList => BlockType::BulletedList,
            BlockData::NumberedList { .. } => BlockType::NumberedList,
            BlockData::Quote => BlockType::Quote,
            BlockData::Callout { .. } => BlockType::Callout,
            BlockData::Code { .. } => BlockType::Code,
            BlockData::Toggle { .. } => BlockType::Toggle,
            BlockData::Image { .. } => BlockType::Image,
            BlockData::Divider => BlockType::Divider,
            BlockData::Table { .. } => BlockType::Table,
            BlockData::TableCell { .. } => BlockType::TableCell,
            BlockData::Math { .. } => BlockType::Math,
            BlockData::Unsupported => BlockType::Unsupported,
        }
    }

    /// Heading with the given level, clamped to 1-6.
    pub fn heading(level: u8) -> Self {
        BlockData::Heading {
            level: level.clamp(1, 6),
        }
    }

    /// The fields of this payload without the `ty` tag.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("ty");
                map
            }
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a payload from a type name and its fields.
    ///
    /// Unknown type names decode to [`BlockData::Unsupported`].
    pub fn from_fields(
        ty: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Result<Self> {
        let mut map = fields;
        map.insert("ty".to_string(), serde_json::Value::String(ty.to_string()));
        serde_json::from_value(serde_json::Value::Object(map))
    }

    /// Payload of a fresh block created by splitting a block of this type.
    pub fn split_successor(&self) -> (BlockData, SplitPlacement) {
        match self {
            BlockData::Todo { .. } => (BlockData::Todo { checked: false }, SplitPlacement::NextSibling),
            BlockData::BulletedList => (BlockData::BulletedList, SplitPlacement::NextSibling),
            BlockData::NumberedList { .. } => (
                BlockData::NumberedList { start: None },
                SplitPlacement::NextSibling,
            ),
            BlockData::Toggle { collapsed: false } => {
                (BlockData::Paragraph, SplitPlacement::FirstChild)
            }
            BlockData::Page => (BlockData::Paragraph, SplitPlacement::FirstChild),
            _ => (BlockData::Paragraph, SplitPlacement::NextSibling),
        }
    }
}

/// One block of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Node {
    /// Block id
    pub id: NodeId,
    /// Type-specific payload (carries the block type)
    pub data: BlockData,
    /// Parent block; `None` only for the root
    pub parent_id: Option<NodeId>,
    /// List holding this block's children
    pub children_list_id: ChildrenListId,
    /// Rich-text buffer, for types that carry text
    pub external_text_id: Option<TextId>,
}

impl Node {
    /// Create a detached node with fresh ids.
    ///
    /// The children list id equals the node id, and the text id too when the
    /// type carries text, matching how the editor lays out its documents.
    pub fn new(data: BlockData) -> Self {
        Self::with_id(NodeId::generate(), data)
    }

    /// Create a detached node with a chosen id.
    pub fn with_id(id: NodeId, data: BlockData) -> Self {
        let external_text_id = data
            .block_type()
            .has_text()
            .then(|| TextId::new(id.as_str()));
        Self {
            children_list_id: ChildrenListId::new(id.as_str()),
            external_text_id,
            parent_id: None,
            id,
            data,
        }
    }

    /// Set the parent.
    pub fn under(mut self, parent: &NodeId) -> Self {
        self.parent_id = Some(parent.clone());
        self
    }

    /// The block type.
    pub fn block_type(&self) -> BlockType {
        self.data.block_type()
    }
}
