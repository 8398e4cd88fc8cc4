use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> OcraResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    /// Outputs the hex value for that colour, uppercased.
    #[inline]
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Writes the truecolor SGR parameters for a foreground, without the `\x1b[` and `m`
    pub fn as_ansi_fg(&self, out: &mut String) {
        out.push_str(&format!("38;2;{};{};{}", self.r, self.g, self.b));
    }

    /// Same as [`Color::as_ansi_fg`] for the background
    pub fn as_ansi_bg(&self, out: &mut String) {
        out.push_str(&format!("48;2;{};{};{}", self.r, self.g, self.b));
    }

    /// Creates a Color from a `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA` string.
    ///
    /// Errors if the string is not one of those.
    pub fn from_hex(hex: &str) -> OcraResult<Self> {
        let original = hex;
        let Some(hex) = hex.strip_prefix('#') else {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "missing leading '#'".to_string(),
            });
        };
        if !hex.is_ascii() {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "non ascii characters".to_string(),
            });
        }

        match hex.len() {
            3 | 4 => {
                let r = parse_hex_component(&hex[0..1], original)?;
                let g = parse_hex_component(&hex[1..2], original)?;
                let b = parse_hex_component(&hex[2..3], original)?;
                let a = if hex.len() == 4 {
                    parse_hex_component(&hex[3..4], original)? * 17
                } else {
                    255
                };
                Ok(Color {
                    r: r * 17, // Convert 0xF to 0xFF
                    g: g * 17,
                    b: b * 17,
                    a,
                })
            }
            6 | 8 => {
                let r = parse_hex_component(&hex[0..2], original)?;
                let g = parse_hex_component(&hex[2..4], original)?;
                let b = parse_hex_component(&hex[4..6], original)?;
                let a = if hex.len() == 8 {
                    parse_hex_component(&hex[6..8], original)?
                } else {
                    255
                };
                Ok(Color { r, g, b, a })
            }
            _ => Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

pub(crate) fn is_valid_hex_color(value: &str) -> bool {
    Color::from_hex(value).is_ok()
}

/// Assigns a small integer id to every colour used by a theme.
///
/// Ids start at 1: 0 is the "not set" value in packed metadata.
/// Packed metadata only has room for ids up to 511 for foregrounds and 255 for
/// backgrounds, larger ids are ignored when styling tokens.
/// Colours are compared uppercased so `#fff` and `#FFF` share an id.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    color_to_id: HashMap<String, u32>,
    /// Index 0 is unused
    id_to_color: Vec<String>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self {
            color_to_id: HashMap::new(),
            id_to_color: vec![String::new()],
        }
    }

    /// Returns the id of that colour, allocating one if needed.
    /// `None` is always 0.
    pub fn get_id(&mut self, color: Option<&str>) -> u32 {
        let Some(color) = color else {
            return 0;
        };
        let color = color.to_uppercase();
        if let Some(id) = self.color_to_id.get(&color) {
            return *id;
        }
        let id = self.id_to_color.len() as u32;
        self.color_to_id.insert(color.clone(), id);
        self.id_to_color.push(color);
        id
    }

    /// The colour for a given id, `None` for 0 or an unknown id
    pub fn color(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.id_to_color.get(id as usize).map(|s| s.as_str())
    }

    /// All colours, indexed by id. Index 0 is an empty string.
    pub fn colors(&self) -> &[String] {
        &self.id_to_color
    }
}
