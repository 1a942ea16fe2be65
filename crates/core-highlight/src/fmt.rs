//! Visual attributes of a highlight rule.

use serde::{Deserialize, Serialize};

/// 24-bit RGB color, stored like it is persisted.
pub type Color = u32;

/// Declarative markup attributes. Every field is optional in the sense that
/// an unset field does not participate in composition: merging two specs
/// overrides field-wise, later wins where the later field is explicitly set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    #[serde(rename = "bg_col", skip_serializing_if = "Option::is_none", default)]
    pub bg_col: Option<Color>,
    #[serde(rename = "fg_col", skip_serializing_if = "Option::is_none", default)]
    pub fg_col: Option<Color>,
    /// Background fill style code; plain fill when unset.
    #[serde(rename = "bg_style", skip_serializing_if = "Option::is_none", default)]
    pub bg_style: Option<u8>,
    /// Foreground pattern style code.
    #[serde(rename = "fg_style", skip_serializing_if = "Option::is_none", default)]
    pub fg_style: Option<u8>,
    /// Outline color; not persisted, only set by dialogs at runtime.
    #[serde(skip)]
    pub outline_col: Option<Color>,
    #[serde(rename = "font", skip_serializing_if = "Option::is_none", default)]
    pub font: Option<String>,
    #[serde(rename = "font_underline", skip_serializing_if = "is_false", default)]
    pub underline: bool,
    #[serde(rename = "font_bold", skip_serializing_if = "is_false", default)]
    pub bold: bool,
    #[serde(rename = "font_italic", skip_serializing_if = "is_false", default)]
    pub italic: bool,
    #[serde(rename = "font_overstrike", skip_serializing_if = "is_false", default)]
    pub overstrike: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl FormatSpec {
    pub fn with_bg(col: Color) -> Self {
        Self {
            bg_col: Some(col),
            ..Self::default()
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Field-wise override: every explicitly set field of `other` replaces
    /// the corresponding field of `self`.
    pub fn merge(&mut self, other: &FormatSpec) {
        if other.bg_col.is_some() {
            self.bg_col = other.bg_col;
        }
        if other.fg_col.is_some() {
            self.fg_col = other.fg_col;
        }
        if other.bg_style.is_some() {
            self.bg_style = other.bg_style;
        }
        if other.fg_style.is_some() {
            self.fg_style = other.fg_style;
        }
        if other.outline_col.is_some() {
            self.outline_col = other.outline_col;
        }
        if other.font.is_some() {
            self.font = other.font.clone();
        }
        self.underline |= other.underline;
        self.bold |= other.bold;
        self.italic |= other.italic;
        self.overstrike |= other.overstrike;
    }
}
