use crate::error::{Result, SamplingError};
use crate::volume::{PixelArray, map_pixels};

use ndarray::{ArrayD, Axis, Slice, Zip};

fn check_axis(ndim: usize, axis: usize) -> Result<()> {
    if axis >= ndim {
        return Err(SamplingError::AxisOutOfRange { axis, ndim });
    }
    Ok(())
}

#[inline]
fn clip_to_u8(value: f64) -> u8 {
    // `as` truncates toward zero
    value.clamp(0.0, 255.0) as u8
}

/// Arithmetic mean along `axis`, clipped to [0, 255] and truncated to u8.
/// The reduced axis is removed from the result.
pub(crate) fn mean_to_u8<T>(data: &ArrayD<T>, axis: usize) -> Result<ArrayD<u8>>
where
    T: Copy + Into<f64> + Send + Sync,
{
    check_axis(data.ndim(), axis)?;
    let len = data.len_of(Axis(axis)) as f64;
    Ok(Zip::from(data.lanes(Axis(axis))).par_map_collect(|lane| {
        let sum: f64 = lane.iter().map(|&v| v.into()).sum();
        clip_to_u8(sum / len)
    }))
}

/// Keep every second element (offset 0) along each of `axes`.
pub(crate) fn stride2<T: Clone>(data: &ArrayD<T>, axes: &[usize]) -> Result<ArrayD<T>> {
    let mut view = data.view();
    for &axis in axes {
        check_axis(view.ndim(), axis)?;
        view.slice_axis_inplace(Axis(axis), Slice::new(0, None, 2));
    }
    Ok(view.to_owned())
}

/// Take the hyperplane at `index` along `axis`, removing that axis.
pub(crate) fn select<T: Clone>(data: &ArrayD<T>, axis: usize, index: usize) -> Result<ArrayD<T>> {
    check_axis(data.ndim(), axis)?;
    let len = data.len_of(Axis(axis));
    if index >= len {
        return Err(SamplingError::IndexOutOfRange { axis, index, len });
    }
    Ok(data.index_axis(Axis(axis), index).to_owned())
}

pub(crate) fn swap_axes<T: Clone>(data: &ArrayD<T>, a: usize, b: usize) -> Result<ArrayD<T>> {
    check_axis(data.ndim(), a.max(b))?;
    let mut view = data.view();
    view.swap_axes(a, b);
    Ok(view.as_standard_layout().into_owned())
}

impl PixelArray {
    pub fn mean_to_u8(&self, axis: usize) -> Result<PixelArray> {
        let reduced = match self {
            PixelArray::Gray8(data) => mean_to_u8(data, axis)?,
            PixelArray::Gray16(data) => mean_to_u8(data, axis)?,
        };
        Ok(PixelArray::Gray8(reduced))
    }

    pub fn stride2(&self, axes: &[usize]) -> Result<PixelArray> {
        Ok(map_pixels!(self, data => stride2(data, axes)?))
    }

    pub fn select(&self, axis: usize, index: usize) -> Result<PixelArray> {
        Ok(map_pixels!(self, data => select(data, axis, index)?))
    }

    pub fn swap_axes(&self, a: usize, b: usize) -> Result<PixelArray> {
        Ok(map_pixels!(self, data => swap_axes(data, a, b)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, arr2, arr3};

    #[test]
    fn mean_truncates_after_clipping() {
        // lanes along axis 0: (1, 2) -> 1.5, (255, 254) -> 254.5, (0, 1) -> 0.5
        let data = arr2(&[[1u16, 255, 0], [2, 254, 1]]).into_dyn();
        let mean = mean_to_u8(&data, 0).unwrap();
        assert_eq!(mean.shape(), &[3]);
        assert_eq!(mean.iter().copied().collect::<Vec<_>>(), vec![1, 254, 0]);
    }

    #[test]
    fn mean_clips_values_above_u8_range() {
        let data = arr2(&[[1000u16, 300], [2000, 100]]).into_dyn();
        let mean = mean_to_u8(&data, 1).unwrap();
        assert_eq!(mean.iter().copied().collect::<Vec<_>>(), vec![255, 255]);
    }

    #[test]
    fn mean_removes_reduced_axis() {
        let data = ArrayD::<u8>::zeros(IxDyn(&[3, 4, 5, 6, 7]));
        assert_eq!(mean_to_u8(&data, 1).unwrap().shape(), &[3, 5, 6, 7]);
    }

    #[test]
    fn stride_keeps_even_indices() {
        let data = arr3(&[[[0u8, 1, 2], [3, 4, 5], [6, 7, 8]]]).into_dyn();
        let strided = stride2(&data, &[1, 2]).unwrap();
        assert_eq!(strided.shape(), &[1, 2, 2]);
        assert_eq!(strided.iter().copied().collect::<Vec<_>>(), vec![0, 2, 6, 8]);
    }

    #[test]
    fn stride_rounds_odd_lengths_up() {
        let data = ArrayD::<u8>::zeros(IxDyn(&[5, 7]));
        assert_eq!(stride2(&data, &[0, 1]).unwrap().shape(), &[3, 4]);
    }

    #[test]
    fn select_takes_first_plane() {
        let data = arr3(&[[[1u16, 2]], [[3, 4]]]).into_dyn();
        let selected = select(&data, 0, 0).unwrap();
        assert_eq!(selected.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn swap_axes_yields_standard_layout() {
        let data = ArrayD::from_shape_vec(IxDyn(&[1, 2, 3]), (0u8..6).collect()).unwrap();
        let swapped = swap_axes(&data, 1, 2).unwrap();
        assert_eq!(swapped.shape(), &[1, 3, 2]);
        assert_eq!(swapped.as_slice().unwrap(), &[0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn out_of_range_axis_names_axis_and_rank() {
        let data = ArrayD::<u8>::zeros(IxDyn(&[2, 2]));
        assert!(matches!(
            mean_to_u8(&data, 2),
            Err(SamplingError::AxisOutOfRange { axis: 2, ndim: 2 })
        ));
        assert!(matches!(
            stride2(&data, &[0, 3]),
            Err(SamplingError::AxisOutOfRange { axis: 3, ndim: 2 })
        ));
    }

    #[test]
    fn select_past_the_end_names_the_index() {
        let data = ArrayD::<u16>::zeros(IxDyn(&[2, 3, 4]));
        let err = select(&data, 1, 3).unwrap_err();
        assert!(matches!(
            err,
            SamplingError::IndexOutOfRange {
                axis: 1,
                index: 3,
                len: 3
            }
        ));
        assert_eq!(
            err.to_string(),
            "Index 3 is out of range for axis 1 of length 3"
        );
    }

    #[test]
    fn pixel_array_mean_is_always_gray8() {
        let data = PixelArray::Gray16(ArrayD::from_elem(IxDyn(&[2, 2]), 7));
        let mean = data.mean_to_u8(0).unwrap();
        assert_eq!(mean, PixelArray::Gray8(ArrayD::from_elem(IxDyn(&[2]), 7)));
    }
}
