use std::path::{Path, PathBuf};

use crate::calibration::CalibrationReader;
use crate::config::SamplingConfig;
use crate::czi::CziDecoder;
use crate::derivation::DerivationEngine;
use crate::error::Result;
use crate::tiff_writer::{ImageJTiffEncoder, VolumeEncoder, VolumeWriter};
use crate::volume_loader::{VolumeDecoder, VolumeLoader};

/// Assemble every source file of `input_dir`, derive all variants and write
/// them into `output_dir`, which must already exist.
///
/// Nothing is written until every variant has been computed. A failure while
/// writing leaves the files written so far in place.
pub fn run<D, E>(
    decoder: D,
    encoder: E,
    input_dir: &Path,
    output_dir: &Path,
    config: &SamplingConfig,
) -> Result<Vec<PathBuf>>
where
    D: VolumeDecoder,
    E: VolumeEncoder,
{
    let loader = VolumeLoader::new(decoder, config)?;
    let paths = loader.discover(input_dir)?;
    let stack = loader.load_from_file_paths(&paths)?;
    let calibration = CalibrationReader::read(loader.decoder(), &paths[0])?;

    let volumes = DerivationEngine::new(config.resolution_policy).derive(&stack, &calibration)?;
    drop(stack);

    VolumeWriter::new(output_dir, encoder).write_all(&volumes)
}

/// [`run`] with the CZI reader and the ImageJ TIFF writer.
pub fn run_czi(input_dir: &Path, output_dir: &Path, config: &SamplingConfig) -> Result<Vec<PathBuf>> {
    run(CziDecoder, ImageJTiffEncoder::default(), input_dir, output_dir, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::czi::tests::{Plane, synthetic_czi};
    use crate::derivation::written_variants;
    use crate::tiff_writer::read_calibration;
    use std::fs;

    const SCALING: &str = r#"<ImageDocument><Metadata><Scaling><Items>
        <Distance Id="X"><Value>0.2</Value></Distance>
        <Distance Id="Y"><Value>0.4</Value></Distance>
        <Distance Id="Z"><Value>1.5</Value></Distance>
        </Items></Scaling></Metadata></ImageDocument>"#;

    fn write_timepoint(dir: &Path, index: u8) {
        let mut planes = Vec::new();
        for c in 0..2 {
            for z in 0..3 {
                planes.push(Plane {
                    coords: vec![("T", 0), ("C", c), ("Z", z)],
                    bytes: vec![index * 10 + (c * 3 + z) as u8; 6 * 8],
                });
            }
        }
        // gray8, uncompressed
        let bytes = synthetic_czi(0, 0, (6, 8), &planes, SCALING);
        fs::write(dir.join(format!("embryo_pt{index}.czi")), bytes).unwrap();
    }

    #[test]
    fn converts_czi_directory_to_calibrated_tiffs() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        for index in [2, 0, 1] {
            write_timepoint(input.path(), index);
        }
        fs::write(input.path().join("notes.txt"), "not a volume").unwrap();

        let written = run_czi(input.path(), output.path(), &SamplingConfig::default()).unwrap();
        let expected: Vec<_> = written_variants()
            .map(|name| output.path().join(name.file_name()))
            .collect();
        assert_eq!(written, expected);

        let original = read_calibration(&output.path().join("original.tif")).unwrap();
        assert_eq!(original.axes, "TZCYX");
        assert_eq!(original.pages, 3 * 2 * 3);
        assert_eq!(original.spacing, 1.5);
        assert!((original.resolution.0 - 5.0).abs() < 1e-9);
        assert!((original.resolution.1 - 2.5).abs() < 1e-9);

        let standard = read_calibration(&output.path().join("standard.tif")).unwrap();
        assert_eq!(standard.plane, (4, 3));
        assert_eq!(standard.spacing, 3.0);

        let zt1 = read_calibration(&output.path().join("improved_zt1.tif")).unwrap();
        assert!((zt1.resolution.0 - 2.5).abs() < 1e-9);
        assert!((zt1.resolution.1 - 1.25).abs() < 1e-9);
    }

    #[test]
    fn empty_directory_fails_before_writing() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let result = run_czi(input.path(), output.path(), &SamplingConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::SamplingError::EmptyInput { .. })
        ));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }
}
