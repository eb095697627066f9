//! Color parsing and perceptual color distance.
//!
//! Hex colors are read as sRGB, converted to CIE XYZ under the D65 white
//! point and then to CIE L\*a\*b\*. Distances use CIEDE2000.

/// A color in CIE L\*a\*b\* space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

/// D65 reference white
const WHITE_X: f64 = 0.95047;
const WHITE_Y: f64 = 1.0;
const WHITE_Z: f64 = 1.08883;

const CIE_EPSILON: f64 = 216.0 / 24389.0;
const CIE_KAPPA: f64 = 24389.0 / 27.0;

impl Lab {
    /// Midpoint used when an item's color is missing or unreadable
    pub const NEUTRAL: Lab = Lab {
        l: 50.0,
        a: 0.0,
        b: 0.0,
    };

    pub fn from_hex(hex: &str) -> Option<Lab> {
        parse_hex(hex).map(Lab::from_srgb)
    }

    /// Converts gamma-encoded sRGB components in `[0, 1]`
    pub fn from_srgb([r, g, b]: [f64; 3]) -> Lab {
        let r = linearize(r);
        let g = linearize(g);
        let b = linearize(b);

        let x = 0.412_424 * r + 0.357_579 * g + 0.180_464 * b;
        let y = 0.212_656 * r + 0.715_158 * g + 0.072_185_6 * b;
        let z = 0.019_332_4 * r + 0.119_193 * g + 0.950_444 * b;

        let fx = lab_f(x / WHITE_X);
        let fy = lab_f(y / WHITE_Y);
        let fz = lab_f(z / WHITE_Z);

        Lab {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }

    pub fn distance(&self, other: &Lab) -> f64 {
        ciede2000(self, other)
    }
}

/// Parses `#rrggbb` or `#rgb` (leading `#` optional) into sRGB components in `[0, 1]`
pub fn parse_hex(hex: &str) -> Option<[f64; 3]> {
    let digits = hex.trim().trim_start_matches('#');
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| f64::from(v) / 255.0);

    match digits.len() {
        6 => Some([
            channel(&digits[0..2])?,
            channel(&digits[2..4])?,
            channel(&digits[4..6])?,
        ]),
        3 => {
            let mut out = [0.0; 3];
            for (slot, c) in out.iter_mut().zip(digits.chars()) {
                *slot = channel(&format!("{}{}", c, c))?;
            }
            Some(out)
        }
        _ => None,
    }
}

fn linearize(v: f64) -> f64 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f64) -> f64 {
    if t > CIE_EPSILON {
        t.cbrt()
    } else {
        (CIE_KAPPA * t + 16.0) / 116.0
    }
}

/// Hue angle in degrees in `[0, 360)`
fn hue_degrees(b: f64, a: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 0.0;
    }
    let h = b.atan2(a).to_degrees();
    if h < 0.0 {
        h + 360.0
    } else {
        h
    }
}

/// CIEDE2000 color difference with unit weighting factors
pub fn ciede2000(c1: &Lab, c2: &Lab) -> f64 {
    let pow25_7 = 25f64.powi(7);

    let chroma1 = c1.a.hypot(c1.b);
    let chroma2 = c2.a.hypot(c2.b);
    let chroma_mean7 = ((chroma1 + chroma2) / 2.0).powi(7);
    let g = 0.5 * (1.0 - (chroma_mean7 / (chroma_mean7 + pow25_7)).sqrt());

    let a1p = (1.0 + g) * c1.a;
    let a2p = (1.0 + g) * c2.a;
    let c1p = a1p.hypot(c1.b);
    let c2p = a2p.hypot(c2.b);
    let h1p = hue_degrees(c1.b, a1p);
    let h2p = hue_degrees(c2.b, a2p);

    let delta_l = c2.l - c1.l;
    let delta_c = c2p - c1p;

    let chroma_product = c1p * c2p;
    let delta_h_angle = if chroma_product == 0.0 {
        0.0
    } else {
        let diff = h2p - h1p;
        if diff > 180.0 {
            diff - 360.0
        } else if diff < -180.0 {
            diff + 360.0
        } else {
            diff
        }
    };
    let delta_h = 2.0 * chroma_product.sqrt() * (delta_h_angle.to_radians() / 2.0).sin();

    let l_mean = (c1.l + c2.l) / 2.0;
    let cp_mean = (c1p + c2p) / 2.0;
    let hp_mean = if chroma_product == 0.0 {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (hp_mean - 30.0).to_radians().cos()
        + 0.24 * (2.0 * hp_mean).to_radians().cos()
        + 0.32 * (3.0 * hp_mean + 6.0).to_radians().cos()
        - 0.20 * (4.0 * hp_mean - 63.0).to_radians().cos();

    let delta_theta = 30.0 * (-((hp_mean - 275.0) / 25.0).powi(2)).exp();
    let cp_mean7 = cp_mean.powi(7);
    let r_c = 2.0 * (cp_mean7 / (cp_mean7 + pow25_7)).sqrt();
    let l_offset = (l_mean - 50.0).powi(2);
    let s_l = 1.0 + 0.015 * l_offset / (20.0 + l_offset).sqrt();
    let s_c = 1.0 + 0.045 * cp_mean;
    let s_h = 1.0 + 0.015 * cp_mean * t;
    let r_t = -(2.0 * delta_theta).to_radians().sin() * r_c;

    let dl = delta_l / s_l;
    let dc = delta_c / s_c;
    let dh = delta_h / s_h;

    (dl * dl + dc * dc + dh * dh + r_t * dc * dh).sqrt()
}

/// Mean pairwise CIEDE2000 distance; zero when fewer than two colors
pub fn mean_pairwise_distance(colors: &[Lab]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, first) in colors.iter().enumerate() {
        for second in &colors[i + 1..] {
            total += first.distance(second);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("#ffffff"), Some([1.0, 1.0, 1.0]));
        assert_eq!(parse_hex("000"), Some([0.0, 0.0, 0.0]));
        assert_eq!(parse_hex("#f00"), parse_hex("#ff0000"));
        assert_eq!(parse_hex("nan"), None);
        assert_eq!(parse_hex("#12345"), None);
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn test_known_lab_conversions() {
        let white = Lab::from_hex("#ffffff").unwrap();
        assert!(close(white.l, 100.0, 0.05));
        assert!(close(white.a, 0.0, 0.05));
        assert!(close(white.b, 0.0, 0.05));

        let black = Lab::from_hex("#000000").unwrap();
        assert!(close(black.l, 0.0, 1e-9));

        let red = Lab::from_hex("#ff0000").unwrap();
        assert!(close(red.l, 53.24, 0.05));
        assert!(close(red.a, 80.09, 0.05));
        assert!(close(red.b, 67.20, 0.05));
    }

    #[test]
    fn test_ciede2000_reference_pairs() {
        // Sharma, Wu & Dalal reference data
        let pairs = [
            ((50.0, 2.6772, -79.7751), (50.0, 0.0, -82.7485), 2.0425),
            ((50.0, 0.0, 0.0), (50.0, -1.0, 2.0), 2.3669),
            ((50.0, 2.5, 0.0), (73.0, 25.0, -18.0), 27.1492),
            ((2.0776, 0.0795, -1.1350), (0.9033, -0.0636, -0.5514), 0.9082),
        ];
        for ((l1, a1, b1), (l2, a2, b2), expected) in pairs {
            let c1 = Lab { l: l1, a: a1, b: b1 };
            let c2 = Lab { l: l2, a: a2, b: b2 };
            assert!(close(ciede2000(&c1, &c2), expected, 1e-4));
            assert!(close(ciede2000(&c2, &c1), expected, 1e-4));
        }
    }

    #[test]
    fn test_mean_pairwise_distance_needs_two_colors() {
        assert_eq!(mean_pairwise_distance(&[]), 0.0);
        assert_eq!(mean_pairwise_distance(&[Lab::NEUTRAL]), 0.0);

        let red = Lab::from_hex("#ff0000").unwrap();
        let blue = Lab::from_hex("#0000ff").unwrap();
        assert!(close(mean_pairwise_distance(&[red, blue]), red.distance(&blue), 1e-12));
        assert_eq!(mean_pairwise_distance(&[red, red]), 0.0);
    }
}
