use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Caption styles. Each one primes the language model with its own seed phrase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Creative,
    Technical,
    Simple,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Creative, Style::Technical, Style::Simple];

    pub fn id(self) -> &'static str {
        match self {
            Style::Creative => "creative",
            Style::Technical => "technical",
            Style::Simple => "simple",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Style::Creative => "Creative",
            Style::Technical => "Technical",
            Style::Simple => "Simple",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Style::Creative => "Natural, engaging descriptions",
            Style::Technical => "Detailed, objective descriptions",
            Style::Simple => "Short, straightforward descriptions",
        }
    }

    /// Prompt fed to the language model before decoding.
    pub fn seed_phrase(self) -> &'static str {
        match self {
            Style::Creative => "A beautiful image showing",
            Style::Technical => "This image contains:",
            Style::Simple => "This is",
        }
    }

    /// Lenient lookup used where an unknown style is not an error.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown caption style: {0}")]
pub struct UnknownStyle(pub String);

impl FromStr for Style {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Style::ALL
            .into_iter()
            .find(|style| style.id() == s)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StyleInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl From<Style> for StyleInfo {
    fn from(style: Style) -> Self {
        Self {
            id: style.id().to_string(),
            name: style.name().to_string(),
            description: style.description().to_string(),
        }
    }
}

pub fn catalog() -> Vec<StyleInfo> {
    Style::ALL.into_iter().map(StyleInfo::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_ids_only() {
        assert_eq!("creative".parse::<Style>(), Ok(Style::Creative));
        assert_eq!("technical".parse::<Style>(), Ok(Style::Technical));
        assert_eq!("simple".parse::<Style>(), Ok(Style::Simple));
        assert!("Creative".parse::<Style>().is_err());
        assert!("".parse::<Style>().is_err());
        assert!("poetic".parse::<Style>().is_err());
    }

    #[test]
    fn unknown_style_falls_back_to_creative() {
        assert_eq!(Style::parse_or_default("poetic"), Style::Creative);
        assert_eq!(Style::parse_or_default("simple"), Style::Simple);
    }

    #[test]
    fn catalog_keeps_declaration_order() {
        let ids: Vec<_> = catalog().into_iter().map(|info| info.id).collect();
        assert_eq!(ids, ["creative", "technical", "simple"]);
    }

    #[test]
    fn every_style_has_a_seed_phrase() {
        for style in Style::ALL {
            assert!(!style.seed_phrase().is_empty());
        }
        assert_eq!(Style::Technical.seed_phrase(), "This image contains:");
    }
}
