use std::fmt;

/// Named outputs of the derivation table. `Mean2` is an intermediate and
/// never reaches disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantName {
    Original,
    FourE,
    Standard,
    Mean2,
    ImprovedZ,
    ImprovedT,
    ImprovedZt1,
    ImprovedZt2,
}

impl VariantName {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantName::Original => "original",
            VariantName::FourE => "4E",
            VariantName::Standard => "standard",
            VariantName::Mean2 => "mean2",
            VariantName::ImprovedZ => "improved_z",
            VariantName::ImprovedT => "improved_t",
            VariantName::ImprovedZt1 => "improved_zt1",
            VariantName::ImprovedZt2 => "improved_zt2",
        }
    }

    pub fn is_written(self) -> bool {
        !matches!(self, VariantName::Mean2)
    }

    /// File name of the persisted variant, e.g. `4E.tif`
    pub fn file_name(self) -> String {
        format!("{}.tif", self.as_str())
    }
}

impl fmt::Display for VariantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis layout tag written next to the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    Tzcyx,
    Tzyx,
}

impl AxisOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            AxisOrder::Tzcyx => "TZCYX",
            AxisOrder::Tzyx => "TZYX",
        }
    }

    pub fn ndim(self) -> usize {
        self.as_str().len()
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the `standard` variant records its in-plane resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Keep the base resolution for `standard`, matching files produced by
    /// earlier runs.
    #[default]
    Compatible,
    /// Halve the x/y resolution of `standard` to match its spatial stride.
    Rescaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Gray8,
    Gray16,
}

impl PixelType {
    pub fn as_str(self) -> &'static str {
        match self {
            PixelType::Gray8 => "Gray8",
            PixelType::Gray16 => "Gray16",
        }
    }
}
