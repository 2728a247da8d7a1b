//! Color classification
//!
//! Maps raw tri-channel readings from the floor sensor to symbolic color
//! tokens by nearest-neighbor match against a reference table of mean
//! colors. The table is injected at construction so it can be recalibrated
//! per lighting condition without touching call sites.

use serde::{Deserialize, Serialize};

/// Symbolic color token over the closed landmark palette.
///
/// `Unknown` means "no new information" (sensor glare, timeout, or a
/// zero-sum reading) and must never advance navigation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorToken {
    Black,
    White,
    Grey,
    Orange,
    Yellow,
    Red,
    Green,
    Blue,
    Unknown,
}

impl std::fmt::Display for ColorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One reference entry: the mean RGB triplet measured for a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorReference {
    pub token: ColorToken,
    pub rgb: [f64; 3],
}

/// Nearest-neighbor color classifier.
///
/// Pure and deterministic: identical input always yields identical output.
/// Ties on exact distance resolve to the first table entry; callers must
/// not rely on which entry wins a tie.
#[derive(Debug, Clone)]
pub struct ColorClassifier {
    table: Vec<ColorReference>,
    normalize: bool,
}

impl ColorClassifier {
    /// Build a classifier over a reference table.
    ///
    /// With `normalize` set, both the sample and the references are scaled
    /// so their channel sum is 1 before the distance computation, which
    /// makes the match brightness-invariant.
    pub fn new(table: Vec<ColorReference>, normalize: bool) -> Self {
        Self { table, normalize }
    }

    /// Classify a raw RGB triplet to the nearest reference token.
    ///
    /// Returns `Unknown` for non-finite channels or a zero channel sum
    /// rather than guessing a nearest neighbor.
    pub fn classify(&self, sample: (f64, f64, f64)) -> ColorToken {
        let (r, g, b) = sample;
        if !(r.is_finite() && g.is_finite() && b.is_finite()) {
            return ColorToken::Unknown;
        }
        if r + g + b == 0.0 {
            return ColorToken::Unknown;
        }

        let sample = self.prepare([r, g, b]);

        let mut best: Option<(f64, ColorToken)> = None;
        for entry in &self.table {
            let reference = self.prepare(entry.rgb);
            let distance = euclidean(sample, reference);
            // Strict comparison keeps the first minimum on exact ties.
            match best {
                Some((d, _)) if distance >= d => {}
                _ => best = Some((distance, entry.token)),
            }
        }

        best.map(|(_, token)| token).unwrap_or(ColorToken::Unknown)
    }

    fn prepare(&self, rgb: [f64; 3]) -> [f64; 3] {
        if !self.normalize {
            return rgb;
        }
        let sum = rgb[0] + rgb[1] + rgb[2];
        if sum == 0.0 {
            return rgb;
        }
        [rgb[0] / sum, rgb[1] / sum, rgb[2] / sum]
    }
}

fn euclidean(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Mean RGB values measured on the delivery course under lab lighting.
pub fn default_reference_table() -> Vec<ColorReference> {
    vec![
        ColorReference {
            token: ColorToken::Orange,
            rgb: [173.44, 81.67, 27.17],
        },
        ColorReference {
            token: ColorToken::Yellow,
            rgb: [199.61, 164.11, 39.06],
        },
        ColorReference {
            token: ColorToken::White,
            rgb: [234.59, 245.94, 296.59],
        },
        ColorReference {
            token: ColorToken::Green,
            rgb: [106.35, 169.82, 41.88],
        },
        ColorReference {
            token: ColorToken::Red,
            rgb: [140.06, 18.89, 22.22],
        },
        ColorReference {
            token: ColorToken::Black,
            rgb: [33.70, 35.45, 21.35],
        },
        ColorReference {
            token: ColorToken::Blue,
            rgb: [114.95, 167.65, 247.30],
        },
        ColorReference {
            token: ColorToken::Grey,
            rgb: [177.0, 188.0, 221.0],
        },
    ]
}
