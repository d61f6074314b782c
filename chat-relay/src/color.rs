use std::{fmt, ops::Range, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Colors brighter than this are hard to read on a light background.
pub const MAX_LUMINANCE: f64 = 0.75;

const MAX_ATTEMPTS: usize = 100;

/// Display color attached to a participant, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Perceptual luminance in `0.0..=1.0`.
    pub fn luminance(&self) -> f64 {
        (0.299 * f64::from(self.r) + 0.587 * f64::from(self.g) + 0.114 * f64::from(self.b))
            / 255.0
    }

    pub fn is_readable(&self) -> bool {
        self.luminance() <= MAX_LUMINANCE
    }

    /// Draws uniformly random colors until one is dark enough to read.
    ///
    /// Gives up after a bounded number of draws and returns [`Color::BLACK`].
    pub fn random_readable<R: Rng>(rng: &mut R) -> Self {
        for _ in 0..MAX_ATTEMPTS {
            let candidate = Color::new(rng.r#gen(), rng.r#gen(), rng.r#gen());
            if candidate.is_readable() {
                return candidate;
            }
        }
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid color '{0}', expected #RRGGBB")]
pub struct ColorParseError(String);

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ColorParseError(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel =
            |range: Range<usize>| u8::from_str_radix(&hex[range], 16).map_err(|_| invalid());
        Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn generated_colors_are_never_too_light() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let color = Color::random_readable(&mut rng);
            assert!(
                color.luminance() <= MAX_LUMINANCE,
                "{color} has luminance {}",
                color.luminance()
            );
        }
    }

    #[test]
    fn falls_back_to_black_when_every_draw_is_too_light() {
        // StepRng yields u64::MAX forever, so every channel is 0xFF.
        let mut rng = rand::rngs::mock::StepRng::new(u64::MAX, 0);
        assert_eq!(Color::random_readable(&mut rng), Color::BLACK);
    }

    #[test]
    fn luminance_boundaries() {
        assert_eq!(Color::BLACK.luminance(), 0.0);
        assert!((Color::new(255, 255, 255).luminance() - 1.0).abs() < 1e-9);
        assert!(!Color::new(255, 255, 255).is_readable());
        assert!(Color::new(0x33, 0x66, 0x99).is_readable());
    }

    #[test]
    fn formats_and_parses_hex() {
        let color = Color::new(0x0A, 0xBC, 0x3F);
        assert_eq!(color.to_string(), "#0ABC3F");
        assert_eq!("#0abc3f".parse::<Color>(), Ok(color));
        assert!("0ABC3F".parse::<Color>().is_err());
        assert!("#0ABC3".parse::<Color>().is_err());
        assert!("#GGGGGG".parse::<Color>().is_err());
    }

    #[test]
    fn serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::new(1, 2, 3)).expect("serialize");
        assert_eq!(json, "\"#010203\"");
        let parsed: Color = serde_json::from_str("\"#010203\"").expect("deserialize");
        assert_eq!(parsed, Color::new(1, 2, 3));
        assert!(serde_json::from_str::<Color>("\"red\"").is_err());
    }
}
