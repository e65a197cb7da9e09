//! Calibrated multi-page TIFF output in the ImageJ hyperstack layout.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use tiff::decoder::{Decoder, ifd::Value};
use tiff::encoder::{Rational, TiffEncoder, TiffKind, TiffValue, colortype};
use tiff::tags::{ResolutionUnit, Tag};

use crate::enums::AxisOrder;
use crate::error::{Result, SamplingError};
use crate::volume::{DerivedVolume, PixelArray};

/// Persists one derived volume.
pub trait VolumeEncoder {
    fn encode(&self, path: &Path, volume: &DerivedVolume) -> Result<()>;
}

/// Classic TIFF stores 32-bit offsets.
pub const CLASSIC_TIFF_LIMIT: u64 = u32::MAX as u64;

/// Bytes reserved per page for its IFD, tags and alignment.
const PAGE_OVERHEAD: u64 = 1024;

/// Writes every (Y, X) plane as one page, leading axes in C order, with an
/// ImageJ description on the first page.
///
/// Files whose estimated size passes the BigTIFF threshold are written with
/// 64-bit offsets.
#[derive(Debug, Clone, Copy)]
pub struct ImageJTiffEncoder {
    bigtiff_threshold: u64,
}

impl Default for ImageJTiffEncoder {
    fn default() -> Self {
        Self {
            bigtiff_threshold: CLASSIC_TIFF_LIMIT,
        }
    }
}

impl ImageJTiffEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to BigTIFF once a file would exceed `bytes`.
    pub fn with_bigtiff_threshold(mut self, bytes: u64) -> Self {
        self.bigtiff_threshold = bytes.min(CLASSIC_TIFF_LIMIT);
        self
    }

    fn needs_bigtiff(&self, volume: &DerivedVolume, description: &str) -> bool {
        estimated_size(volume, description) > self.bigtiff_threshold
    }
}

impl VolumeEncoder for ImageJTiffEncoder {
    fn encode(&self, path: &Path, volume: &DerivedVolume) -> Result<()> {
        let description = imagej_description(volume)?;
        let resolution = (
            to_rational(volume.resolution.0)?,
            to_rational(volume.resolution.1)?,
        );
        let writer = BufWriter::new(File::create(path)?);
        if self.needs_bigtiff(volume, &description) {
            log::debug!("Writing {path:?} as BigTIFF");
            write_volume(&mut TiffEncoder::new_big(writer)?, volume, &description, resolution)
        } else {
            write_volume(&mut TiffEncoder::new(writer)?, volume, &description, resolution)
        }
    }
}

fn estimated_size(volume: &DerivedVolume, description: &str) -> u64 {
    let shape = volume.data.shape();
    let sample_bytes = match volume.data {
        PixelArray::Gray8(_) => 1,
        PixelArray::Gray16(_) => 2,
    };
    let samples: u64 = shape.iter().map(|&len| len as u64).product();
    let pages: u64 = shape[..shape.len().saturating_sub(2)]
        .iter()
        .map(|&len| len as u64)
        .product();
    samples * sample_bytes + pages * PAGE_OVERHEAD + description.len() as u64
}

fn write_volume<W, K>(
    encoder: &mut TiffEncoder<W, K>,
    volume: &DerivedVolume,
    description: &str,
    resolution: (Rational, Rational),
) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
{
    match &volume.data {
        PixelArray::Gray8(data) => {
            write_pages::<colortype::Gray8, _, _>(encoder, data, description, resolution)
        }
        PixelArray::Gray16(data) => {
            write_pages::<colortype::Gray16, _, _>(encoder, data, description, resolution)
        }
    }
}

fn write_pages<C, W, K>(
    encoder: &mut TiffEncoder<W, K>,
    data: &ArrayD<C::Inner>,
    description: &str,
    (x_resolution, y_resolution): (Rational, Rational),
) -> Result<()>
where
    C: colortype::ColorType,
    C::Inner: Clone,
    [C::Inner]: TiffValue,
    W: Write + Seek,
    K: TiffKind,
{
    let (height, width) = plane_size(data.shape())?;
    let contiguous = data.as_standard_layout();
    let pixels = contiguous
        .as_slice()
        .ok_or_else(|| SamplingError::NonContiguous(data.shape().to_vec()))?;

    for (page, plane) in pixels.chunks(height * width).enumerate() {
        let mut image = encoder.new_image::<C>(width as u32, height as u32)?;
        if page == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description)?;
        }
        image.resolution_unit(ResolutionUnit::None);
        image.x_resolution(x_resolution.clone());
        image.y_resolution(y_resolution.clone());
        image.write_data(plane)?;
    }
    Ok(())
}

fn plane_size(shape: &[usize]) -> Result<(usize, usize)> {
    match shape {
        [.., height, width] if *height > 0 && *width > 0 => Ok((*height, *width)),
        _ => Err(SamplingError::Shape {
            actual: shape.len(),
            expected: 2,
        }),
    }
}

fn imagej_description(volume: &DerivedVolume) -> Result<String> {
    let shape = volume.data.shape();
    volume.data.ensure_ndim(volume.axes.ndim())?;
    let images: usize = shape[..shape.len() - 2].iter().product();
    let (frames, slices, channels) = match volume.axes {
        AxisOrder::Tzcyx => (shape[0], shape[1], shape[2]),
        AxisOrder::Tzyx => (shape[0], shape[1], 1),
    };

    let mut lines = vec!["ImageJ=1.11a".to_string(), format!("images={images}")];
    if channels > 1 {
        lines.push(format!("channels={channels}"));
    }
    if slices > 1 {
        lines.push(format!("slices={slices}"));
    }
    if frames > 1 {
        lines.push(format!("frames={frames}"));
    }
    lines.push("hyperstack=true".to_string());
    if channels > 1 {
        lines.push("mode=grayscale".to_string());
    }
    lines.push(format!("unit={}", volume.unit()));
    lines.push(format!("spacing={}", volume.z_spacing));
    lines.push("loop=false".to_string());
    lines.push(format!("axes={}", volume.axes));

    let mut description = lines.join("\n");
    description.push('\n');
    Ok(description)
}

/// Best rational approximation of `value` with numerator and denominator
/// both fitting in u32, found by continued fraction expansion.
///
/// # Errors
///
/// Returns [`SamplingError::Resolution`] for values that are not finite and
/// positive, or that round to zero or past `u32::MAX`.
fn to_rational(value: f64) -> Result<Rational> {
    let max = u128::from(u32::MAX);
    if !(value.is_finite() && value > 0.0) || value > u32::MAX as f64 {
        return Err(SamplingError::Resolution(value));
    }

    // (p0/q0, p1/q1) are the last two convergents.
    let (mut p0, mut q0, mut p1, mut q1) = (0u128, 1u128, 1u128, 0u128);
    let mut x = value;
    for _ in 0..64 {
        let a = x.floor();
        let a_int = a.min(u64::MAX as f64) as u128;
        let p2 = a_int * p1 + p0;
        let q2 = a_int * q1 + q0;
        if p2 > max || q2 > max {
            // largest semiconvergent that still fits
            let k = [(max - q0) / q1.max(1), (max - p0) / p1.max(1)]
                .into_iter()
                .min()
                .unwrap_or(0);
            let (ps, qs) = (p0 + k * p1, q0 + k * q1);
            if qs > 0 {
                let semiconvergent = ps as f64 / qs as f64;
                let convergent = p1 as f64 / q1 as f64;
                if (semiconvergent - value).abs() < (convergent - value).abs() {
                    (p1, q1) = (ps, qs);
                }
            }
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p2, q2);
        let fraction = x - a;
        if fraction <= f64::EPSILON * x.max(1.0) {
            break;
        }
        x = 1.0 / fraction;
    }

    match (u32::try_from(p1), u32::try_from(q1)) {
        (Ok(n), Ok(d)) if n > 0 && d > 0 => Ok(Rational { n, d }),
        _ => Err(SamplingError::Resolution(value)),
    }
}

/// Writes derived volumes as `<name>.tif` files into one directory.
pub struct VolumeWriter<E> {
    output_dir: PathBuf,
    encoder: E,
}

impl<E: VolumeEncoder> VolumeWriter<E> {
    pub fn new(output_dir: impl Into<PathBuf>, encoder: E) -> Self {
        Self {
            output_dir: output_dir.into(),
            encoder,
        }
    }

    /// Write each volume in order, stopping at the first failure.
    pub fn write_all(&self, volumes: &[DerivedVolume]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let path = self.output_dir.join(volume.name.file_name());
            self.encoder.encode(&path, volume)?;
            log::info!(
                "Wrote {path:?} {:?} ({}, spacing {} {})",
                volume.data.shape(),
                volume.axes,
                volume.z_spacing,
                volume.unit()
            );
            written.push(path);
        }
        Ok(written)
    }
}

/// Calibration read back from a file written by [`ImageJTiffEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCalibration {
    pub resolution: (f64, f64),
    pub spacing: f64,
    pub unit: String,
    pub axes: String,
    pub pages: usize,
    /// (width, height) of every page
    pub plane: (u32, u32),
}

pub fn read_calibration(path: &Path) -> Result<StoredCalibration> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription)?;
    let fields: HashMap<&str, &str> = description
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| SamplingError::MetadataFormat(format!("ImageDescription/{key}")))
    };

    let spacing = field("spacing")?
        .parse()
        .map_err(|_| SamplingError::MetadataFormat("ImageDescription/spacing".to_string()))?;
    let unit = field("unit")?.to_string();
    let axes = field("axes")?.to_string();
    let resolution = (
        rational_tag(&mut decoder, Tag::XResolution)?,
        rational_tag(&mut decoder, Tag::YResolution)?,
    );
    let plane = decoder.dimensions()?;

    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        pages += 1;
    }

    Ok(StoredCalibration {
        resolution,
        spacing,
        unit,
        axes,
        pages,
        plane,
    })
}

fn rational_tag<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<f64> {
    let value = match decoder.get_tag(tag)? {
        Value::List(mut values) if values.len() == 1 => values.remove(0),
        value => value,
    };
    match value {
        Value::Rational(n, d) if d != 0 => Ok(f64::from(n) / f64::from(d)),
        other => Err(SamplingError::MetadataFormat(format!("{tag:?} = {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::VariantName;
    use ndarray::IxDyn;

    fn volume(data: PixelArray, axes: AxisOrder) -> DerivedVolume {
        DerivedVolume {
            name: VariantName::FourE,
            data,
            resolution: (1.0 / 0.3, 1.0 / 0.15),
            z_spacing: 1.25,
            axes,
        }
    }

    fn rational(value: f64) -> (u32, u32) {
        let r = to_rational(value).unwrap();
        (r.n, r.d)
    }

    /// Version word of the TIFF header: 42 for classic, 43 for BigTIFF.
    fn tiff_version(path: &Path) -> u16 {
        let header = std::fs::read(path).unwrap();
        u16::from_le_bytes([header[2], header[3]])
    }

    #[test]
    fn rational_finds_exact_fractions() {
        assert_eq!(rational(10.0), (10, 1));
        assert_eq!(rational(1.0 / 0.3), (10, 3));
        assert_eq!(rational(81.3), (813, 10));
        assert_eq!(rational(1.0 / 2.5e6), (1, 2_500_000));
        assert_eq!(rational(1.0e7), (10_000_000, 1));
    }

    #[test]
    fn rational_approximates_irrationals_closely() {
        let (n, d) = rational(std::f64::consts::PI);
        assert!((f64::from(n) / f64::from(d) - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn rational_rejects_unrepresentable_values() {
        for value in [1.0e-10, 1.0e10, 0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(to_rational(value), Err(SamplingError::Resolution(_))),
                "{value}"
            );
        }
    }

    #[test]
    fn description_lists_hyperstack_dimensions() {
        let data = PixelArray::Gray8(ArrayD::zeros(IxDyn(&[3, 4, 2, 5, 6])));
        let description = imagej_description(&volume(data, AxisOrder::Tzcyx)).unwrap();
        assert_eq!(
            description,
            "ImageJ=1.11a\nimages=24\nchannels=2\nslices=4\nframes=3\nhyperstack=true\n\
             mode=grayscale\nunit=um\nspacing=1.25\nloop=false\naxes=TZCYX\n"
        );
    }

    #[test]
    fn description_rejects_mismatched_axes() {
        let data = PixelArray::Gray8(ArrayD::zeros(IxDyn(&[3, 4, 5, 6])));
        assert!(imagej_description(&volume(data, AxisOrder::Tzcyx)).is_err());
    }

    #[test]
    fn round_trips_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("4E.tif");
        let data = PixelArray::Gray16(ArrayD::from_elem(IxDyn(&[2, 3, 5, 7]), 300));
        ImageJTiffEncoder::default()
            .encode(&path, &volume(data, AxisOrder::Tzyx))
            .unwrap();

        assert_eq!(tiff_version(&path), 42);
        let stored = read_calibration(&path).unwrap();
        assert_eq!(stored.pages, 6);
        assert_eq!(stored.plane, (7, 5));
        assert_eq!(stored.unit, "um");
        assert_eq!(stored.axes, "TZYX");
        assert_eq!(stored.spacing, 1.25);
        assert!((1.0 / stored.resolution.0 - 0.3).abs() < 1e-6);
        assert!((1.0 / stored.resolution.1 - 0.15).abs() < 1e-6);
    }

    #[test]
    fn large_volumes_switch_to_bigtiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("original.tif");
        let data = PixelArray::Gray8(ArrayD::from_elem(IxDyn(&[2, 3, 2, 5, 7]), 9));
        let volume = volume(data, AxisOrder::Tzcyx);

        let encoder = ImageJTiffEncoder::new().with_bigtiff_threshold(64);
        assert!(encoder.needs_bigtiff(&volume, &imagej_description(&volume).unwrap()));
        encoder.encode(&path, &volume).unwrap();

        assert_eq!(tiff_version(&path), 43);
        let stored = read_calibration(&path).unwrap();
        assert_eq!(stored.pages, 12);
        assert_eq!(stored.plane, (7, 5));
        assert_eq!(stored.axes, "TZCYX");
        assert_eq!(stored.spacing, 1.25);
        assert!((1.0 / stored.resolution.0 - 0.3).abs() < 1e-9);
    }

    #[test]
    fn classic_limit_accounts_for_page_overhead() {
        let data = PixelArray::Gray16(ArrayD::zeros(IxDyn(&[1, 1, 1, 1])));
        let volume = volume(data, AxisOrder::Tzyx);
        let size = estimated_size(&volume, "abc");
        assert_eq!(size, 2 + PAGE_OVERHEAD + 3);
        assert!(!ImageJTiffEncoder::default().needs_bigtiff(&volume, "abc"));
    }

    #[test]
    fn writer_names_files_after_variants() {
        let dir = tempfile::tempdir().unwrap();
        let data = PixelArray::Gray8(ArrayD::zeros(IxDyn(&[1, 1, 2, 2])));
        let writer = VolumeWriter::new(dir.path(), ImageJTiffEncoder::default());
        let written = writer
            .write_all(&[volume(data, AxisOrder::Tzyx)])
            .unwrap();
        assert_eq!(written, vec![dir.path().join("4E.tif")]);
        assert!(written[0].is_file());
    }
}
