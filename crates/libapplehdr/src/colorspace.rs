use lcms2::{Profile, Tag, TagSignature, CIEXYZ, CIExyY};
use log::trace;

/// The closed set of RGB primaries this crate converts between. All use the D65 white point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorPrimaries {
    /// [sRGB](https://en.wikipedia.org/wiki/SRGB), same primaries as ITU-R BT.709.
    Srgb,
    /// [Display P3](https://en.wikipedia.org/wiki/DCI-P3#Display_P3), the Apple default.
    DisplayP3,
    /// ITU-R BT.2020 / [Rec.2020](https://en.wikipedia.org/wiki/Rec._2020).
    Bt2020,
}

/// CIE 1931 xy chromaticities of the primaries and white point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chromaticities {
    pub red: [f32; 2],
    pub green: [f32; 2],
    pub blue: [f32; 2],
    pub white: [f32; 2],
}

const WHITE_POINT_D65: [f32; 2] = [0.3127, 0.3290];

impl ColorPrimaries {
    pub const ALL: [ColorPrimaries; 3] = [ColorPrimaries::Srgb, ColorPrimaries::DisplayP3, ColorPrimaries::Bt2020];

    pub const fn chromaticities(&self) -> Chromaticities {
        match self {
            ColorPrimaries::Srgb => Chromaticities {
                red: [0.640, 0.330],
                green: [0.300, 0.600],
                blue: [0.150, 0.060],
                white: WHITE_POINT_D65,
            },
            ColorPrimaries::DisplayP3 => Chromaticities {
                red: [0.680, 0.320],
                green: [0.265, 0.690],
                blue: [0.150, 0.060],
                white: WHITE_POINT_D65,
            },
            ColorPrimaries::Bt2020 => Chromaticities {
                red: [0.708, 0.292],
                green: [0.170, 0.797],
                blue: [0.131, 0.046],
                white: WHITE_POINT_D65,
            },
        }
    }

    /// Relative luminance weights, i.e. the Y row of the RGB to XYZ matrix.
    pub const fn luminance_coefficients(&self) -> [f32; 3] {
        match self {
            ColorPrimaries::Srgb => [0.2126, 0.7152, 0.0722],
            ColorPrimaries::DisplayP3 => [0.2290, 0.6917, 0.0793],
            ColorPrimaries::Bt2020 => [0.2627, 0.6780, 0.0593],
        }
    }

    pub fn luminance(&self, rgb: [f32; 3]) -> f32 {
        let [kr, kg, kb] = self.luminance_coefficients();
        kr * rgb[0] + kg * rgb[1] + kb * rgb[2]
    }

    /// Recognizes the usual spellings of color space and ICC profile names.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("p3") {
            Some(ColorPrimaries::DisplayP3)
        } else if name.contains("2020") || name.contains("2100") {
            Some(ColorPrimaries::Bt2020)
        } else if name.contains("srgb") || name.contains("709") {
            Some(ColorPrimaries::Srgb)
        } else {
            None
        }
    }

    /// Identifies the primaries of an ICC profile: by its description first, otherwise by the nearest colorant set.
    pub fn from_icc_profile(icc_profile: &Profile) -> Option<Self> {
        if let Some(description) = read_mlu_tag(icc_profile, TagSignature::ProfileDescriptionTag) {
            trace!("ICC profile description: {}", description);
            if let Some(primaries) = Self::from_name(&description) {
                return Some(primaries);
            }
        }

        let red = read_colorant_xy(icc_profile, TagSignature::RedColorantTag)?;
        let green = read_colorant_xy(icc_profile, TagSignature::GreenColorantTag)?;
        let blue = read_colorant_xy(icc_profile, TagSignature::BlueColorantTag)?;

        // Colorants are stored adapted to D50, which shifts them slightly; the named sets are far enough apart
        // for the nearest one to still be the right one.
        let distance = |primaries: &ColorPrimaries| -> f32 {
            let c = primaries.chromaticities();
            [(red, c.red), (green, c.green), (blue, c.blue)]
                .iter()
                .map(|(a, b)| (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2))
                .sum()
        };

        Self::ALL
            .into_iter()
            .min_by(|a, b| distance(a).total_cmp(&distance(b)))
    }
}

// Linear-light RGB to RGB conversions, row-major, to left-multiply a column vector.
// Derived from the primaries' normalized primary matrices (SMPTE RP 177); both ends use D65.

static SRGB_TO_DISPLAY_P3: [[f32; 3]; 3] = [
    [0.8224619687, 0.1775380313, 0.0000000000],
    [0.0331941989, 0.9668058011, 0.0000000000],
    [0.0170826307, 0.0723974407, 0.9105199286],
];
static SRGB_TO_BT2020: [[f32; 3]; 3] = [
    [0.6274038959, 0.3292830384, 0.0433130657],
    [0.0690972894, 0.9195403951, 0.0113623156],
    [0.0163914389, 0.0880133079, 0.8955952532],
];
static DISPLAY_P3_TO_SRGB: [[f32; 3]; 3] = [
    [1.2249401763, -0.2249401763, 0.0000000000],
    [-0.0420569547, 1.0420569547, 0.0000000000],
    [-0.0196375546, -0.0786360456, 1.0982736001],
];
static DISPLAY_P3_TO_BT2020: [[f32; 3]; 3] = [
    [0.7538330344, 0.1985973691, 0.0475695966],
    [0.0457438490, 0.9417772198, 0.0124789312],
    [-0.0012103404, 0.0176017173, 0.9836086231],
];
static BT2020_TO_SRGB: [[f32; 3]; 3] = [
    [1.6604910021, -0.5876411388, -0.0728498633],
    [-0.1245504745, 1.1328998971, -0.0083494226],
    [-0.0181507634, -0.1005788980, 1.1187296614],
];
static BT2020_TO_DISPLAY_P3: [[f32; 3]; 3] = [
    [1.3435782526, -0.2821796705, -0.0613985821],
    [-0.0652974528, 1.0757879158, -0.0104904631],
    [0.0028217873, -0.0195984945, 1.0167767073],
];
static IDENTITY: [[f32; 3]; 3] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];

/// A linear-light conversion between two [`ColorPrimaries`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimariesTransform {
    src: ColorPrimaries,
    dst: ColorPrimaries,
    matrix: &'static [[f32; 3]; 3],
}

impl PrimariesTransform {
    pub fn new(src: ColorPrimaries, dst: ColorPrimaries) -> Self {
        use ColorPrimaries::*;

        let matrix = match (src, dst) {
            (Srgb, DisplayP3) => &SRGB_TO_DISPLAY_P3,
            (Srgb, Bt2020) => &SRGB_TO_BT2020,
            (DisplayP3, Srgb) => &DISPLAY_P3_TO_SRGB,
            (DisplayP3, Bt2020) => &DISPLAY_P3_TO_BT2020,
            (Bt2020, Srgb) => &BT2020_TO_SRGB,
            (Bt2020, DisplayP3) => &BT2020_TO_DISPLAY_P3,
            (Srgb, Srgb) | (DisplayP3, DisplayP3) | (Bt2020, Bt2020) => &IDENTITY,
        };

        Self { src, dst, matrix }
    }

    pub const fn src(&self) -> ColorPrimaries {
        self.src
    }

    pub const fn dst(&self) -> ColorPrimaries {
        self.dst
    }

    pub fn is_identity(&self) -> bool {
        self.src == self.dst
    }

    #[inline]
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = self.matrix;
        [
            m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
            m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
            m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
        ]
    }
}

/// IEC 61966-2-1 sRGB EOTF, also used by Display P3.
pub fn srgb_eotf(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Maps integer code values to linear light, one table per channel.
#[derive(Debug, Clone)]
pub struct TransferLut {
    tables: [Vec<f32>; 3],
}

impl TransferLut {
    /// * `max_code` - Largest code value, e.g. `255` for 8-bit samples.
    pub fn srgb(max_code: u16) -> Self {
        let table = Self::tabulate(max_code, srgb_eotf);
        Self { tables: [table.clone(), table.clone(), table] }
    }

    /// Tabulates the red, green and blue TRC tags of an ICC profile. Missing curves are treated as linear.
    pub fn from_icc_profile(icc_profile: &Profile, max_code: u16) -> Option<Self> {
        let signatures = [TagSignature::RedTRCTag, TagSignature::GreenTRCTag, TagSignature::BlueTRCTag];
        if !signatures.iter().any(|sig| icc_profile.has_tag(*sig)) {
            return None;
        }

        let tables = signatures.map(|sig| match read_tag(icc_profile, sig) {
            Some(Tag::ToneCurve(curve)) => Self::tabulate(max_code, |v| curve.eval(v)),
            _ => Self::tabulate(max_code, |v| v),
        });

        Some(Self { tables })
    }

    fn tabulate(max_code: u16, f: impl Fn(f32) -> f32) -> Vec<f32> {
        let max = max_code.max(1) as f32;
        (0..=max_code).map(|code| f(code as f32 / max)).collect()
    }

    /// Linear value of a code value; codes past the table end clamp to its last entry.
    #[inline]
    pub fn linearize(&self, channel: usize, code: u16) -> f32 {
        let table = &self.tables[channel];
        table[(code as usize).min(table.len() - 1)]
    }
}

fn read_mlu_tag(icc_profile: &Profile, sig: TagSignature) -> Option<String> {
    match read_tag(icc_profile, sig)? {
        Tag::MLU(mlu) => {
            let locale = *mlu.tanslations().first()?;
            mlu.text(locale).ok()
        },
        _ => None,
    }
}

fn read_colorant_xy(icc_profile: &Profile, sig: TagSignature) -> Option<[f32; 2]> {
    let xyz: CIEXYZ = match read_tag(icc_profile, sig)? {
        Tag::CIEXYZ(xyz) => *xyz,
        _ => return None,
    };
    let xyy: CIExyY = lcms2::XYZ2xyY(&xyz);
    Some([xyy.x as f32, xyy.y as f32])
}

fn read_tag(icc_profile: &Profile, sig: TagSignature) -> Option<Tag<'_>> {
    if icc_profile.has_tag(sig) {
        return Some(icc_profile.read_tag(sig));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invert_matrix(matrix: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
        let det =
              matrix[0][0] * (matrix[1][1] * matrix[2][2] - matrix[1][2] * matrix[2][1])
            - matrix[0][1] * (matrix[1][0] * matrix[2][2] - matrix[1][2] * matrix[2][0])
            + matrix[0][2] * (matrix[1][0] * matrix[2][1] - matrix[1][1] * matrix[2][0]);
        assert!(det.abs() > 1e-10);

        let inv_det = 1.0 / det;
        [
            [
                (matrix[1][1] * matrix[2][2] - matrix[1][2] * matrix[2][1]) * inv_det,
                (matrix[0][2] * matrix[2][1] - matrix[0][1] * matrix[2][2]) * inv_det,
                (matrix[0][1] * matrix[1][2] - matrix[0][2] * matrix[1][1]) * inv_det,
            ],
            [
                (matrix[1][2] * matrix[2][0] - matrix[1][0] * matrix[2][2]) * inv_det,
                (matrix[0][0] * matrix[2][2] - matrix[0][2] * matrix[2][0]) * inv_det,
                (matrix[0][2] * matrix[1][0] - matrix[0][0] * matrix[1][2]) * inv_det,
            ],
            [
                (matrix[1][0] * matrix[2][1] - matrix[1][1] * matrix[2][0]) * inv_det,
                (matrix[0][1] * matrix[2][0] - matrix[0][0] * matrix[2][1]) * inv_det,
                (matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0]) * inv_det,
            ],
        ]
    }

    fn multiply(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
        let mut result = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                result[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        result
    }

    /// RGB to XYZ matrix from xy chromaticities.
    #[allow(non_snake_case)]
    fn normalized_primary_matrix(primaries: ColorPrimaries) -> [[f64; 3]; 3] {
        let c = primaries.chromaticities();
        let XYZ = |xy: [f32; 2]| {
            let (x, y) = (xy[0] as f64, xy[1] as f64);
            [x / y, 1.0, (1.0 - x - y) / y]
        };
        let (r, g, b, w) = (XYZ(c.red), XYZ(c.green), XYZ(c.blue), XYZ(c.white));

        let p = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
        let p_inv = invert_matrix(p);
        let s: Vec<f64> = (0..3).map(|i| p_inv[i][0] * w[0] + p_inv[i][1] * w[1] + p_inv[i][2] * w[2]).collect();

        let mut m = p;
        for row in &mut m {
            for (column, value) in row.iter_mut().enumerate() {
                *value *= s[column];
            }
        }
        m
    }

    #[test]
    fn named_matrices_match_derivation() {
        for src in ColorPrimaries::ALL {
            for dst in ColorPrimaries::ALL {
                let expected = multiply(&invert_matrix(normalized_primary_matrix(dst)), &normalized_primary_matrix(src));
                let transform = PrimariesTransform::new(src, dst);
                for i in 0..3 {
                    for j in 0..3 {
                        assert!(
                            (transform.matrix[i][j] as f64 - expected[i][j]).abs() < 1e-6,
                            "{:?} -> {:?} [{}][{}]: {} vs {}", src, dst, i, j, transform.matrix[i][j], expected[i][j],
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn luminance_coefficients_match_derivation() {
        for primaries in ColorPrimaries::ALL {
            let y_row = normalized_primary_matrix(primaries)[1];
            let coefficients = primaries.luminance_coefficients();
            for i in 0..3 {
                assert!((coefficients[i] as f64 - y_row[i]).abs() < 1e-3, "{:?}", primaries);
            }
        }
    }

    #[test]
    fn white_is_preserved() {
        for src in ColorPrimaries::ALL {
            for dst in ColorPrimaries::ALL {
                let white = PrimariesTransform::new(src, dst).apply([1.0, 1.0, 1.0]);
                for v in white {
                    assert!((v - 1.0).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn display_p3_red_is_inside_bt2020() {
        let red = PrimariesTransform::new(ColorPrimaries::DisplayP3, ColorPrimaries::Bt2020).apply([1.0, 0.0, 0.0]);
        assert!(red.iter().all(|v| *v >= -5e-3));
        assert!(red[0] > red[1] && red[0] > red[2]);
    }

    #[test]
    fn recognizes_names() {
        assert_eq!(ColorPrimaries::from_name("Display P3"), Some(ColorPrimaries::DisplayP3));
        assert_eq!(ColorPrimaries::from_name("sRGB IEC61966-2.1"), Some(ColorPrimaries::Srgb));
        assert_eq!(ColorPrimaries::from_name("ITU-R BT.2020"), Some(ColorPrimaries::Bt2020));
        assert_eq!(ColorPrimaries::from_name("Adobe RGB (1998)"), None);
    }

    #[test]
    fn detects_srgb_icc_profile() {
        let profile = Profile::new_srgb();
        assert_eq!(ColorPrimaries::from_icc_profile(&profile), Some(ColorPrimaries::Srgb));

        let lut = TransferLut::from_icc_profile(&profile, 255).unwrap();
        for code in [0u16, 10, 128, 200, 255] {
            let expected = srgb_eotf(code as f32 / 255.0);
            assert!((lut.linearize(1, code) - expected).abs() < 1e-3, "code {}", code);
        }
    }

    #[test]
    fn srgb_lut_matches_eotf() {
        let lut = TransferLut::srgb(255);
        assert_eq!(lut.linearize(0, 0), 0.0);
        assert!((lut.linearize(2, 255) - 1.0).abs() < 1e-6);
        assert!((lut.linearize(0, 188) - 0.5).abs() < 5e-3);
        assert_eq!(lut.linearize(0, 1000), lut.linearize(0, 255));
    }
}
