use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::OcraResult;

/// Style settings of a theme rule
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct RawThemeSettings {
    pub foreground: Option<String>,
    pub background: Option<String>,
    #[serde(rename = "fontStyle")]
    pub font_style: Option<String>,
}

impl RawThemeSettings {
    /// `inherit` is treated as not set
    pub fn foreground(&self) -> Option<&str> {
        match self.foreground.as_deref() {
            Some("inherit") | None => None,
            Some(s) => Some(s),
        }
    }

    /// `inherit` is treated as not set
    pub fn background(&self) -> Option<&str> {
        match self.background.as_deref() {
            Some("inherit") | None => None,
            Some(s) => Some(s),
        }
    }
}

/// Scopes of a theme rule: either `"a, b c"` or `["a", "b c"]`.
///
/// A string is split on commas after stripping leading/trailing ones, a list is taken
/// as is. Each item can be a space separated list of parent scopes ending with the
/// target scope.
fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Option<Vec<String>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim_matches(',');
            Ok(Some(trimmed.split(',').map(|s| s.to_owned()).collect()))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                vec.push(item);
            }
            Ok(Some(vec))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}

/// A single theme rule
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct RawThemeSetting {
    #[serde(default)]
    pub name: Option<String>,
    /// `None` means the rule applies to everything and sets the theme defaults
    #[serde(deserialize_with = "deserialize_scopes", default)]
    pub scope: Option<Vec<String>>,
    #[serde(default)]
    pub settings: RawThemeSettings,
}

/// The editor colours, only foreground and background are used: they become the defaults
/// of the theme unless a rule without scope overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Colors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for Colors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = Colors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of editor colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Colors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = Colors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let slot = match key.as_str() {
                        "foreground" | "editor.foreground" => &mut colors.foreground,
                        "background" | "editor.background" => &mut colors.background,
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                            continue;
                        }
                    };
                    if slot.is_none() {
                        *slot = map.next_value()?;
                    } else {
                        let _: de::IgnoredAny = map.next_value()?;
                    }
                }

                Ok(colors)
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

/// A theme as found in a TextMate (`settings`) or VSCode (`tokenColors`) JSON file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTheme {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub colors: Option<Colors>,
    #[serde(default)]
    pub settings: Option<Vec<RawThemeSetting>>,
    #[serde(rename = "tokenColors", default)]
    pub token_colors: Option<Vec<RawThemeSetting>>,
}

impl RawTheme {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let file = File::open(path)?;
        let theme = serde_json::from_reader(BufReader::new(file))?;
        Ok(theme)
    }

    pub fn from_json(json: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The rules in the order they should be applied.
    ///
    /// `settings` wins over `tokenColors` if both are present. Editor colours are turned
    /// into a leading rule without scope so explicit default rules still override them.
    pub fn rules(&self) -> Vec<RawThemeSetting> {
        let mut out = Vec::new();
        if let Some(colors) = &self.colors
            && (colors.foreground.is_some() || colors.background.is_some())
        {
            out.push(RawThemeSetting {
                name: None,
                scope: None,
                settings: RawThemeSettings {
                    foreground: colors.foreground.clone(),
                    background: colors.background.clone(),
                    font_style: None,
                },
            });
        }
        if let Some(settings) = self.settings.as_ref().or(self.token_colors.as_ref()) {
            out.extend(settings.iter().cloned());
        }
        out
    }
}
