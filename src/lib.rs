//! # CZI sampling library
//!
//! This crate assembles a time-lapse series of 3D microscopy volumes (one
//! CZI file per timepoint) into a single 5D stack and derives a fixed set of
//! reduced-resolution variants from it, each saved as a calibrated
//! multi-page TIFF.
//!
//! Source files are decoded in parallel using rayon and ordered by the
//! timepoint index embedded in their names (`..._pt<digits>.czi`). The
//! stack axes are (time, depth, channel, height, width). Variants are
//! produced only by block means and stride-2 subsampling, never by
//! interpolation:
//!  - original
//!  - 4E
//!  - standard
//!  - improved_z
//!  - improved_t
//!  - improved_zt1
//!  - improved_zt2
//!
//! Each output carries the x/y resolution, z spacing, unit and axis order
//! that match the reduction applied. See [`derivation::VARIANTS`] for the
//! full table.
//!
//! CZI files are assumed to have the following attributes:
//!  - Uncompressed Gray8 or Gray16 subblocks
//!  - Exactly four non-trivial axes per file
//!  - Scaling stored under `ImageDocument/Metadata/Scaling/Items`
//!
//! # Examples
//!
//! ## Converting a directory of CZI files
//!
//! ```no_run
//! # use czi_sampling::{config::SamplingConfig, pipeline};
//! # use std::path::Path;
//! let written = pipeline::run_czi(
//!     Path::new("acquisition"),
//!     Path::new("sampled"),
//!     &SamplingConfig::default(),
//! )
//! .expect("should have written all variants");
//! assert_eq!(written.len(), 7);
//! ```
//!
//! ## Deriving variants from an assembled stack
//!
//! ```no_run
//! # use czi_sampling::{
//! #     calibration::CalibrationReader, config::SamplingConfig, czi::CziDecoder,
//! #     derivation::DerivationEngine, volume_loader::VolumeLoader,
//! # };
//! let loader = VolumeLoader::new(CziDecoder, &SamplingConfig::default())
//!     .expect("should have built the loader");
//! let paths = loader.discover("acquisition").expect("should have found CZI files");
//! let stack = loader
//!     .load_from_file_paths(&paths)
//!     .expect("should have loaded files from directory");
//! let calibration = CalibrationReader::read(loader.decoder(), &paths[0])
//!     .expect("should have read the scaling");
//! let variants = DerivationEngine::default()
//!     .derive(&stack, &calibration)
//!     .expect("should have derived all variants");
//! ```

pub mod calibration;
pub mod config;
pub mod czi;
pub mod derivation;
pub mod enums;
pub mod error;
pub mod pipeline;
mod reducer;
pub mod tiff_writer;
pub mod volume;
pub mod volume_loader;

pub use error::{Result, SamplingError};
