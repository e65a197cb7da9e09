use crate::enums::{AxisOrder, PixelType, VariantName};
use crate::error::{Result, SamplingError};

use ndarray::{ArrayD, Axis};
use std::path::PathBuf;

/// Physical unit of every spacing value (micrometers).
pub const UNIT: &str = "um";

/// Dimensionality of one decoded timepoint: (depth, channel, height, width)
pub const VOLUME_NDIM: usize = 4;

/// Dimensionality of the assembled stack: (time, depth, channel, height, width)
pub const STACK_NDIM: usize = 5;

/// Numeric pixel data of any dimensionality, tagged by pixel type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    Gray8(ArrayD<u8>),
    Gray16(ArrayD<u16>),
}

/// Apply the same generic expression to whichever array a `PixelArray`
/// holds, keeping the pixel type.
macro_rules! map_pixels {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            PixelArray::Gray8($arr) => PixelArray::Gray8($body),
            PixelArray::Gray16($arr) => PixelArray::Gray16($body),
        }
    };
}
pub(crate) use map_pixels;

impl PixelArray {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelArray::Gray8(_) => PixelType::Gray8,
            PixelArray::Gray16(_) => PixelType::Gray16,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            PixelArray::Gray8(data) => data.shape(),
            PixelArray::Gray16(data) => data.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn as_gray8(&self) -> Option<&ArrayD<u8>> {
        match self {
            PixelArray::Gray8(data) => Some(data),
            PixelArray::Gray16(_) => None,
        }
    }

    pub fn as_gray16(&self) -> Option<&ArrayD<u16>> {
        match self {
            PixelArray::Gray16(data) => Some(data),
            PixelArray::Gray8(_) => None,
        }
    }

    /// Remove every axis of length 1.
    pub fn squeeze(self) -> Self {
        map_pixels!(self, data => squeeze_array(data))
    }

    /// Fail with a shape error unless the array has exactly `expected` axes.
    pub fn ensure_ndim(&self, expected: usize) -> Result<()> {
        let actual = self.ndim();
        if actual != expected {
            return Err(SamplingError::Shape { actual, expected });
        }
        Ok(())
    }
}

fn squeeze_array<T>(mut data: ArrayD<T>) -> ArrayD<T> {
    for axis in (0..data.ndim()).rev() {
        if data.len_of(Axis(axis)) == 1 {
            data = data.index_axis_move(Axis(axis), 0);
        }
    }
    data
}

/// One decoded acquisition timepoint.
#[derive(Debug, Clone)]
pub struct SourceVolume {
    pub path: PathBuf,
    pub timepoint_index: u64,
    pub data: PixelArray,
}

/// All timepoints stacked along a leading time axis:
/// (time, depth, channel, height, width).
#[derive(Debug, Clone)]
pub struct Stack {
    data: PixelArray,
}

impl Stack {
    pub fn new(data: PixelArray) -> Result<Self> {
        data.ensure_ndim(STACK_NDIM)?;
        Ok(Self { data })
    }

    /// Get the dimensions of the stack (time, depth, channel, height, width)
    pub fn dim(&self) -> (usize, usize, usize, usize, usize) {
        let s = self.data.shape();
        (s[0], s[1], s[2], s[3], s[4])
    }

    pub fn timepoints(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &PixelArray {
        &self.data
    }

    pub fn into_data(self) -> PixelArray {
        self.data
    }
}

/// Physical sample spacing along x, y and z, in [`UNIT`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub scale_x: f64,
    pub scale_y: f64,
    pub scale_z: f64,
}

impl Calibration {
    pub fn new(scale_x: f64, scale_y: f64, scale_z: f64) -> Result<Self> {
        for (axis, value) in [("x", scale_x), ("y", scale_y), ("z", scale_z)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SamplingError::MetadataFormat(format!(
                    "scaling {axis} = {value} (must be strictly positive)"
                )));
            }
        }
        Ok(Self {
            scale_x,
            scale_y,
            scale_z,
        })
    }

    pub fn unit(&self) -> &'static str {
        UNIT
    }

    /// Pixels per unit along x and y after the spacing is multiplied by `factor`.
    pub fn resolution(&self, factor: f64) -> (f64, f64) {
        (
            1.0 / (self.scale_x * factor),
            1.0 / (self.scale_y * factor),
        )
    }
}

/// A named output produced by the derivation engine.
#[derive(Debug, Clone)]
pub struct DerivedVolume {
    pub name: VariantName,
    pub data: PixelArray,
    pub resolution: (f64, f64),
    pub z_spacing: f64,
    pub axes: AxisOrder,
}

impl DerivedVolume {
    pub fn unit(&self) -> &'static str {
        UNIT
    }
}
