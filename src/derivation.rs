//! Table-driven derivation of the reduced-resolution variants.
//!
//! Every output is described by a [`VariantSpec`]: where its data comes from,
//! which reductions are applied in order, and how the physical spacing
//! changes as a result. [`DerivationEngine::derive`] walks [`VARIANTS`] in
//! order, so a variant may only reference variants listed before it.

use std::borrow::Cow;

use crate::enums::{AxisOrder, ResolutionPolicy, VariantName};
use crate::error::{Result, SamplingError};
use crate::volume::{Calibration, DerivedVolume, PixelArray, Stack};

/// Axis indices of the 5-D stack.
///
/// [`crate::czi::CziDecoder`] orders C before Z, so for CZI input `DEPTH`
/// holds the CZI channel axis and `CHANNEL` the focal planes. `original`
/// swaps the two back into `TZCYX`.
pub mod stack_axis {
    pub const TIME: usize = 0;
    pub const DEPTH: usize = 1;
    pub const CHANNEL: usize = 2;
    pub const HEIGHT: usize = 3;
    pub const WIDTH: usize = 4;
}

/// Axis indices of a 4-D `TZYX` variant.
pub mod reduced_axis {
    pub const TIME: usize = 0;
    pub const DEPTH: usize = 1;
    pub const HEIGHT: usize = 2;
    pub const WIDTH: usize = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Stack,
    Variant(VariantName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SwapAxes(usize, usize),
    /// Mean along the axis, clipped and cast to u8.
    MeanToU8(usize),
    /// Keep even indices along every listed axis.
    Stride2(&'static [usize]),
    Select { axis: usize, index: usize },
}

impl Step {
    fn apply(&self, data: &PixelArray) -> Result<PixelArray> {
        match *self {
            Step::SwapAxes(a, b) => data.swap_axes(a, b),
            Step::MeanToU8(axis) => data.mean_to_u8(axis),
            Step::Stride2(axes) => data.stride2(axes),
            Step::Select { axis, index } => data.select(axis, index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantSpec {
    pub name: VariantName,
    pub source: Source,
    pub steps: &'static [Step],
    /// Multiplier applied to `scale_z` for the recorded spacing.
    pub z_spacing_factor: f64,
    /// Multiplier applied to `scale_x`/`scale_y` before taking the reciprocal.
    pub xy_spacing_factor: f64,
    pub axes: AxisOrder,
}

impl VariantSpec {
    pub fn xy_factor_for(&self, policy: ResolutionPolicy) -> f64 {
        match (self.name, policy) {
            (VariantName::Standard, ResolutionPolicy::Rescaled) => self.xy_spacing_factor * 2.0,
            _ => self.xy_spacing_factor,
        }
    }
}

pub const VARIANTS: [VariantSpec; 8] = [
    VariantSpec {
        name: VariantName::Original,
        source: Source::Stack,
        steps: &[Step::SwapAxes(stack_axis::DEPTH, stack_axis::CHANNEL)],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzcyx,
    },
    VariantSpec {
        name: VariantName::FourE,
        source: Source::Stack,
        steps: &[Step::MeanToU8(stack_axis::DEPTH)],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::Standard,
        source: Source::Variant(VariantName::FourE),
        steps: &[Step::Stride2(&[reduced_axis::HEIGHT, reduced_axis::WIDTH])],
        z_spacing_factor: 2.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::Mean2,
        source: Source::Stack,
        steps: &[
            Step::Stride2(&[stack_axis::DEPTH]),
            Step::MeanToU8(stack_axis::DEPTH),
        ],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::ImprovedZ,
        source: Source::Variant(VariantName::Mean2),
        steps: &[Step::Stride2(&[reduced_axis::TIME])],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::ImprovedT,
        source: Source::Variant(VariantName::Mean2),
        steps: &[Step::Stride2(&[reduced_axis::DEPTH])],
        z_spacing_factor: 2.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::ImprovedZt1,
        source: Source::Variant(VariantName::FourE),
        steps: &[Step::Stride2(&[reduced_axis::HEIGHT, reduced_axis::WIDTH])],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 2.0,
        axes: AxisOrder::Tzyx,
    },
    VariantSpec {
        name: VariantName::ImprovedZt2,
        source: Source::Stack,
        steps: &[Step::Select {
            axis: stack_axis::DEPTH,
            index: 0,
        }],
        z_spacing_factor: 1.0,
        xy_spacing_factor: 1.0,
        axes: AxisOrder::Tzyx,
    },
];

/// Names of the variants that are persisted, in write order.
pub fn written_variants() -> impl Iterator<Item = VariantName> {
    VARIANTS
        .iter()
        .map(|spec| spec.name)
        .filter(|name| name.is_written())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DerivationEngine {
    policy: ResolutionPolicy,
}

impl DerivationEngine {
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self { policy }
    }

    /// Compute every variant in [`VARIANTS`] from `stack`.
    ///
    /// Intermediates are dropped from the result, which holds the written
    /// variants in table order.
    ///
    /// # Errors
    ///
    /// Returns a shape error if a reduction addresses an axis the data does
    /// not have, or if a result does not match its declared axis order.
    pub fn derive(&self, stack: &Stack, calibration: &Calibration) -> Result<Vec<DerivedVolume>> {
        let mut derived: Vec<DerivedVolume> = Vec::with_capacity(VARIANTS.len());

        for spec in &VARIANTS {
            let data = {
                let source = match spec.source {
                    Source::Stack => stack.data(),
                    Source::Variant(name) => derived
                        .iter()
                        .find(|volume| volume.name == name)
                        .map(|volume| &volume.data)
                        .ok_or(SamplingError::VariantOrder {
                            variant: spec.name,
                            depends_on: name,
                        })?,
                };
                apply_steps(source, spec.steps)?
            };
            data.ensure_ndim(spec.axes.ndim())?;
            log::debug!(
                "Derived {} with shape {:?} ({})",
                spec.name,
                data.shape(),
                spec.axes
            );

            derived.push(DerivedVolume {
                name: spec.name,
                data,
                resolution: calibration.resolution(spec.xy_factor_for(self.policy)),
                z_spacing: calibration.scale_z * spec.z_spacing_factor,
                axes: spec.axes,
            });
        }

        derived.retain(|volume| volume.name.is_written());
        Ok(derived)
    }
}

fn apply_steps(source: &PixelArray, steps: &[Step]) -> Result<PixelArray> {
    let mut current = Cow::Borrowed(source);
    for step in steps {
        current = Cow::Owned(step.apply(&current)?);
    }
    Ok(current.into_owned())
}
