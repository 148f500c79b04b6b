//! Chat text components.
//!
//! The protocol embeds human-readable text as JSON: a node carries its own
//! text and formatting plus an ordered list of child nodes under `extra`.
//! Servers in the wild also send bare JSON strings where a node is
//! expected, so decoding accepts both.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One chat text node and its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChatRepr")]
pub struct Chat {
    pub text: String,
    #[serde(skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub underlined: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub strikethrough: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub obfuscated: bool,
    /// Color name (`red`, `gold`, ...), purely cosmetic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Chat>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatRepr {
    Text(String),
    Node(ChatNode),
}

#[derive(Deserialize)]
struct ChatNode {
    #[serde(default)]
    text: String,
    #[serde(default)]
    bold: bool,
    #[serde(default)]
    italic: bool,
    #[serde(default)]
    underlined: bool,
    #[serde(default)]
    strikethrough: bool,
    #[serde(default)]
    obfuscated: bool,
    #[serde(default)]
    color: Option<String>,
    #[serde(default, alias = "Extra")]
    extra: Vec<Chat>,
}

impl From<ChatRepr> for Chat {
    fn from(repr: ChatRepr) -> Self {
        match repr {
            ChatRepr::Text(text) => Chat::text(text),
            ChatRepr::Node(node) => Chat {
                text: node.text,
                bold: node.bold,
                italic: node.italic,
                underlined: node.underlined,
                strikethrough: node.strikethrough,
                obfuscated: node.obfuscated,
                color: node.color.filter(|c| !c.is_empty()),
                extra: node.extra,
            },
        }
    }
}

impl Chat {
    /// Plain node without formatting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Node with a color hint.
    pub fn colored(text: impl Into<String>, color: &str) -> Self {
        Self {
            text: text.into(),
            color: Some(color.to_string()),
            ..Self::default()
        }
    }

    /// Append a child node.
    pub fn with_extra(mut self, child: Chat) -> Self {
        self.extra.push(child);
        self
    }

    /// This node's text followed by each direct child's text.
    ///
    /// Grandchildren are not included.
    pub fn plain_text(&self) -> String {
        self.to_string()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        for child in &self.extra {
            f.write_str(&child.text)?;
        }
        Ok(())
    }
}
