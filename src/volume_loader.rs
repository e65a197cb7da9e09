use crate::config::SamplingConfig;
use crate::error::{Result, SamplingError};
use crate::volume::{PixelArray, SourceVolume, Stack, VOLUME_NDIM};

use ndarray::{ArrayD, ArrayViewD, Axis};
use rayon::{ThreadPoolBuilder, prelude::*};
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Decodes one acquisition file.
pub trait VolumeDecoder: Sync {
    /// Decode the pixel data of `path` into an array of any dimensionality.
    fn decode(&self, path: &Path) -> Result<PixelArray>;

    /// Return the metadata document embedded in `path`.
    fn metadata_xml(&self, path: &Path) -> Result<String>;
}

impl<D: VolumeDecoder + ?Sized> VolumeDecoder for &D {
    fn decode(&self, path: &Path) -> Result<PixelArray> {
        (**self).decode(path)
    }

    fn metadata_xml(&self, path: &Path) -> Result<String> {
        (**self).metadata_xml(path)
    }
}

pub struct VolumeLoader<D> {
    decoder: D,
    extension: String,
    workers: usize,
    timepoint_pattern: Regex,
}

impl<D: VolumeDecoder> VolumeLoader<D> {
    pub fn new(decoder: D, config: &SamplingConfig) -> Result<Self> {
        let timepoint_pattern =
            Regex::new(&format!(r"(?i)pt(\d+)\.{}$", regex::escape(&config.extension)))?;
        Ok(Self {
            decoder,
            extension: config.extension.clone(),
            workers: config.worker_count(),
            timepoint_pattern,
        })
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// List the source files of a directory, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::EmptyInput`] if no file carries the
    /// configured extension.
    pub fn discover(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    log::warn!("Skipping unreadable entry in {dir:?}: {err}");
                    None
                }
            })
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
            })
            .collect();

        if paths.is_empty() {
            return Err(SamplingError::EmptyInput {
                dir: dir.to_path_buf(),
                extension: self.extension.clone(),
            });
        }

        paths.sort();
        log::info!("Found {} .{} files in {dir:?}", paths.len(), self.extension);
        Ok(paths)
    }

    /// Extract the timepoint index from a `...pt<digits>.<ext>` file name.
    pub fn parse_timepoint_index(&self, path: &Path) -> Result<u64> {
        let filename_error = || SamplingError::FilenameFormat(path.to_path_buf());
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(filename_error)?;
        let captures = self
            .timepoint_pattern
            .captures(name)
            .ok_or_else(filename_error)?;
        captures[1].parse().map_err(|_| filename_error())
    }

    /// Decode one source file into a 4-D (depth, channel, height, width)
    /// volume tagged with its timepoint index.
    pub fn load_volume(&self, path: &Path) -> Result<SourceVolume> {
        let timepoint_index = self.parse_timepoint_index(path)?;
        let data = self.decoder.decode(path)?.squeeze();
        if let Err(err) = data.ensure_ndim(VOLUME_NDIM) {
            log::error!("{path:?} decodes to shape {:?}", data.shape());
            return Err(err);
        }
        log::debug!(
            "Loaded timepoint {timepoint_index} from {path:?}: {:?} {}",
            data.shape(),
            data.pixel_type().as_str()
        );
        Ok(SourceVolume {
            path: path.to_path_buf(),
            timepoint_index,
            data,
        })
    }

    /// Load every file in parallel and stack them by ascending timepoint.
    ///
    /// # Errors
    ///
    /// Fails on the first file that cannot be named, decoded or shaped, on
    /// duplicate timepoints, and on volumes that disagree in shape or pixel
    /// type.
    pub fn load_from_file_paths(&self, paths: &[impl AsRef<Path> + Sync]) -> Result<Stack> {
        if paths.is_empty() {
            return Err(SamplingError::EmptyInput {
                dir: PathBuf::new(),
                extension: self.extension.clone(),
            });
        }

        // Reject badly named files before any decoding starts.
        for path in paths {
            self.parse_timepoint_index(path.as_ref())?;
        }

        let pool = ThreadPoolBuilder::new().num_threads(self.workers).build()?;
        log::info!(
            "Decoding {} volumes on {} workers",
            paths.len(),
            self.workers
        );
        let mut volumes = pool.install(|| {
            paths
                .par_iter()
                .map(|path| self.load_volume(path.as_ref()))
                .collect::<Result<Vec<_>>>()
        })?;

        Self::sort_volumes(&mut volumes)?;
        Self::validate_dimensions(&volumes)?;
        Self::build_stack(&volumes)
    }

    /// Load all source files of a directory into one stack.
    pub fn load_from_directory(&self, dir: impl AsRef<Path>) -> Result<Stack> {
        let paths = self.discover(dir)?;
        self.load_from_file_paths(&paths)
    }

    fn sort_volumes(volumes: &mut [SourceVolume]) -> Result<()> {
        volumes.sort_by_key(|volume| volume.timepoint_index);
        if let Some(pair) = volumes
            .windows(2)
            .find(|pair| pair[0].timepoint_index == pair[1].timepoint_index)
        {
            return Err(SamplingError::DuplicateTimepoint(pair[0].timepoint_index));
        }
        Ok(())
    }

    fn validate_dimensions(volumes: &[SourceVolume]) -> Result<()> {
        let first = &volumes[0].data;
        for volume in volumes {
            if volume.data.pixel_type() != first.pixel_type() {
                return Err(SamplingError::InconsistentPixelType {
                    path: volume.path.clone(),
                    expected: first.pixel_type().as_str(),
                    found: volume.data.pixel_type().as_str(),
                });
            }
            if volume.data.shape() != first.shape() {
                return Err(SamplingError::InconsistentDimensions {
                    path: volume.path.clone(),
                    expected: first.shape().to_vec(),
                    found: volume.data.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    fn build_stack(volumes: &[SourceVolume]) -> Result<Stack> {
        let data = match &volumes[0].data {
            PixelArray::Gray8(_) => PixelArray::Gray8(stack_views(
                volumes.iter().filter_map(|v| v.data.as_gray8()),
            )?),
            PixelArray::Gray16(_) => PixelArray::Gray16(stack_views(
                volumes.iter().filter_map(|v| v.data.as_gray16()),
            )?),
        };
        let stack = Stack::new(data)?;
        log::info!("Assembled stack {:?}", stack.dim());
        Ok(stack)
    }
}

fn stack_views<'a, T: Clone + 'a>(arrays: impl Iterator<Item = &'a ArrayD<T>>) -> Result<ArrayD<T>> {
    let views: Vec<ArrayViewD<'_, T>> = arrays.map(|array| array.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use std::collections::HashMap;

    struct ConstantDecoder {
        shapes: HashMap<String, Vec<usize>>,
    }

    impl VolumeDecoder for ConstantDecoder {
        fn decode(&self, path: &Path) -> Result<PixelArray> {
            let name = path.file_name().unwrap().to_str().unwrap();
            let index: u8 = name
                .trim_end_matches(".czi")
                .rsplit("pt")
                .next()
                .unwrap()
                .parse()
                .unwrap();
            let shape = self.shapes.get(name).cloned().unwrap_or(vec![1, 2, 3, 4, 5]);
            Ok(PixelArray::Gray8(ArrayD::from_elem(IxDyn(&shape), index)))
        }

        fn metadata_xml(&self, _path: &Path) -> Result<String> {
            Ok(String::new())
        }
    }

    fn loader() -> VolumeLoader<ConstantDecoder> {
        let decoder = ConstantDecoder {
            shapes: HashMap::new(),
        };
        VolumeLoader::new(decoder, &SamplingConfig::default()).unwrap()
    }

    #[test]
    fn parses_timepoint_from_file_name() {
        let loader = loader();
        assert_eq!(
            loader
                .parse_timepoint_index(Path::new("/data/sample_pt12.czi"))
                .unwrap(),
            12
        );
        assert_eq!(
            loader
                .parse_timepoint_index(Path::new("run_pt007.CZI"))
                .unwrap(),
            7
        );
    }

    #[test]
    fn rejects_names_without_timepoint() {
        let loader = loader();
        for name in ["sample.czi", "sample_pt.czi", "sample_pt3.tif", "pt3xczi"] {
            assert!(
                matches!(
                    loader.parse_timepoint_index(Path::new(name)),
                    Err(SamplingError::FilenameFormat(_))
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_timepoints_that_overflow() {
        let loader = loader();
        assert!(matches!(
            loader.parse_timepoint_index(Path::new("pt99999999999999999999999.czi")),
            Err(SamplingError::FilenameFormat(_))
        ));
    }

    #[test]
    fn load_volume_squeezes_to_four_axes() {
        let volume = loader().load_volume(Path::new("a_pt3.czi")).unwrap();
        assert_eq!(volume.timepoint_index, 3);
        assert_eq!(volume.data.shape(), &[2, 3, 4, 5]);
    }

    #[test]
    fn load_volume_rejects_other_dimensionality() {
        let mut shapes = HashMap::new();
        shapes.insert("a_pt1.czi".to_string(), vec![2, 3, 4]);
        let loader = VolumeLoader::new(ConstantDecoder { shapes }, &SamplingConfig::default()).unwrap();
        assert!(matches!(
            loader.load_volume(Path::new("a_pt1.czi")),
            Err(SamplingError::Shape {
                actual: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn stacks_in_timepoint_order() {
        let stack = loader()
            .load_from_file_paths(&["s_pt2.czi", "s_pt0.czi", "s_pt1.czi"])
            .unwrap();
        assert_eq!(stack.dim(), (3, 2, 3, 4, 5));
        let PixelArray::Gray8(data) = stack.data() else {
            panic!("expected 8-bit stack");
        };
        for t in 0..3 {
            assert!(data.index_axis(Axis(0), t).iter().all(|&v| v == t as u8));
        }
    }

    #[test]
    fn duplicate_timepoints_are_fatal() {
        let result = loader().load_from_file_paths(&["a_pt1.czi", "b_pt1.czi"]);
        assert!(matches!(result, Err(SamplingError::DuplicateTimepoint(1))));
    }

    #[test]
    fn mismatched_shapes_are_fatal() {
        let mut shapes = HashMap::new();
        shapes.insert("a_pt1.czi".to_string(), vec![6, 3, 4, 5]);
        let loader = VolumeLoader::new(ConstantDecoder { shapes }, &SamplingConfig::default()).unwrap();
        let result = loader.load_from_file_paths(&["a_pt0.czi", "a_pt1.czi"]);
        assert!(matches!(
            result,
            Err(SamplingError::InconsistentDimensions { .. })
        ));
    }
}
