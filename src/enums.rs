/// Axis along which a 2D slice is cut out of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Kernel used when a sample falls between grid points
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Whether the gantry-tilt stage only reports or also rewrites slices
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TiltMode {
    #[default]
    CheckOnly,
    ApplyCorrection,
}

/// Whether the sample values of a volume are integral
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleKind {
    #[default]
    Integer,
    Float,
}

impl SampleKind {
    /// Round `value` to the nearest integer for integral volumes
    #[inline]
    pub fn settle(self, value: f64) -> f64 {
        match self {
            SampleKind::Integer => value.round_ties_even(),
            SampleKind::Float => value,
        }
    }
}
