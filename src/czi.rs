//! Minimal reader for Zeiss CZI (ZISRAW) files.
//!
//! Only what the sampling pipeline needs is supported: the embedded XML
//! metadata and uncompressed Gray8/Gray16 subblocks at full resolution.
//! Every non-planar dimension found in the subblock directory becomes one
//! array axis, ordered as in [`AXIS_ORDER`], followed by Y and X.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::{Result, SamplingError};
use crate::volume::PixelArray;
use crate::volume_loader::VolumeDecoder;

const SEGMENT_HEADER_SIZE: u64 = 32;
const SUBBLOCK_HEADER_MIN_SIZE: u64 = 256;
const DIRECTORY_ENTRY_FIXED_SIZE: u64 = 32;
const DIMENSION_ENTRY_SIZE: u64 = 20;

const FILE_SEGMENT: &str = "ZISRAWFILE";
const DIRECTORY_SEGMENT: &str = "ZISRAWDIRECTORY";
const METADATA_SEGMENT: &str = "ZISRAWMETADATA";
const SUBBLOCK_SEGMENT: &str = "ZISRAWSUBBLOCK";

/// Order of the non-planar axes in a decoded array.
pub const AXIS_ORDER: &str = "HBVSRITCZM";

const PIXEL_TYPE_GRAY8: i32 = 0;
const PIXEL_TYPE_GRAY16: i32 = 1;
const COMPRESSION_NONE: i32 = 0;

#[derive(Debug, Clone)]
struct DimensionEntry {
    name: String,
    start: i32,
    size: i32,
    stored_size: i32,
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    pixel_type: i32,
    file_position: u64,
    compression: i32,
    pyramid_type: u8,
    dimensions: Vec<DimensionEntry>,
}

impl DirectoryEntry {
    fn dimension(&self, name: &str) -> Option<&DimensionEntry> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    fn encoded_size(&self) -> u64 {
        DIRECTORY_ENTRY_FIXED_SIZE + DIMENSION_ENTRY_SIZE * self.dimensions.len() as u64
    }

    /// Full-resolution plane, as opposed to a pyramid level.
    fn is_base_level(&self) -> bool {
        self.pyramid_type == 0
            && ["X", "Y"].iter().all(|axis| {
                self.dimension(axis)
                    .is_some_and(|dim| dim.stored_size == dim.size)
            })
    }

    fn plane_size(&self) -> Result<(usize, usize)> {
        let extent = |axis: &str| {
            self.dimension(axis)
                .and_then(|dim| usize::try_from(dim.size).ok())
                .ok_or_else(|| SamplingError::UnsupportedCzi(format!("subblock without {axis} extent")))
        };
        Ok((extent("Y")?, extent("X")?))
    }
}

/// Reader over any seekable ZISRAW byte stream.
pub struct CziReader<R> {
    reader: R,
    directory_position: u64,
    metadata_position: u64,
}

impl CziReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> CziReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        seek_segment(&mut reader, 0, FILE_SEGMENT)?;
        // major, minor, two reserved words, two GUIDs, file part
        skip(&mut reader, 4 * 4 + 16 * 2 + 4)?;
        let directory_position = read_position(&mut reader)?;
        let metadata_position = read_position(&mut reader)?;
        Ok(Self {
            reader,
            directory_position,
            metadata_position,
        })
    }

    /// The embedded XML metadata document.
    pub fn metadata_xml(&mut self) -> Result<String> {
        if self.metadata_position == 0 {
            return Err(SamplingError::MetadataFormat(
                "file header (no metadata segment)".to_string(),
            ));
        }
        seek_segment(&mut self.reader, self.metadata_position, METADATA_SEGMENT)?;
        let xml_size = read_size(&mut self.reader)?;
        let _attachment_size = self.reader.read_i32::<LittleEndian>()?;
        skip(&mut self.reader, 248)?;
        let mut xml = vec![0u8; xml_size];
        self.reader.read_exact(&mut xml)?;
        String::from_utf8(xml)
            .map_err(|_| SamplingError::MetadataFormat("metadata segment (not UTF-8)".to_string()))
    }

    fn read_directory(&mut self) -> Result<Vec<DirectoryEntry>> {
        seek_segment(&mut self.reader, self.directory_position, DIRECTORY_SEGMENT)?;
        let count = read_size(&mut self.reader)?;
        skip(&mut self.reader, 124)?;
        (0..count).map(|_| read_entry(&mut self.reader)).collect()
    }

    /// Decode every full-resolution subblock into one array.
    pub fn read_pixels(&mut self) -> Result<PixelArray> {
        let entries: Vec<_> = self
            .read_directory()?
            .into_iter()
            .filter(DirectoryEntry::is_base_level)
            .collect();
        let first = entries
            .first()
            .ok_or_else(|| SamplingError::UnsupportedCzi("no full-resolution subblocks".to_string()))?;

        for entry in &entries {
            if entry.compression != COMPRESSION_NONE {
                return Err(SamplingError::UnsupportedCzi(format!(
                    "compression mode {}",
                    entry.compression
                )));
            }
            if entry.pixel_type != first.pixel_type {
                return Err(SamplingError::UnsupportedCzi("mixed pixel types".to_string()));
            }
            if entry.plane_size()? != first.plane_size()? {
                return Err(SamplingError::UnsupportedCzi("tiles of differing size".to_string()));
            }
        }

        let layout = Layout::from_entries(&entries)?;
        match first.pixel_type {
            PIXEL_TYPE_GRAY8 => Ok(PixelArray::Gray8(self.assemble(&entries, &layout, |r, buf: &mut [u8]| {
                r.read_exact(buf)
            })?)),
            PIXEL_TYPE_GRAY16 => Ok(PixelArray::Gray16(self.assemble(&entries, &layout, |r, buf: &mut [u16]| {
                r.read_u16_into::<LittleEndian>(buf)
            })?)),
            other => Err(SamplingError::UnsupportedCzi(format!("pixel type {other}"))),
        }
    }

    fn assemble<T, F>(&mut self, entries: &[DirectoryEntry], layout: &Layout, mut read_plane: F) -> Result<ArrayD<T>>
    where
        T: Clone + Default,
        F: FnMut(&mut R, &mut [T]) -> std::io::Result<()>,
    {
        let (height, width) = layout.plane;
        let mut array = ArrayD::from_elem(IxDyn(&layout.shape()), T::default());
        let mut plane = vec![T::default(); height * width];

        for entry in entries {
            self.seek_subblock_data(entry, (height * width * std::mem::size_of::<T>()) as u64)?;
            read_plane(&mut self.reader, &mut plane)?;

            let mut target = array.view_mut();
            for index in layout.index_of(entry) {
                target = target.index_axis_move(Axis(0), index);
            }
            let source = ArrayViewD::from_shape(IxDyn(&[height, width]), &plane)?;
            target.assign(&source);
        }
        Ok(array)
    }

    fn seek_subblock_data(&mut self, entry: &DirectoryEntry, plane_bytes: u64) -> Result<()> {
        seek_segment(&mut self.reader, entry.file_position, SUBBLOCK_SEGMENT)?;
        let metadata_size = read_size(&mut self.reader)? as u64;
        let _attachment_size = self.reader.read_i32::<LittleEndian>()?;
        let data_size = read_position(&mut self.reader)?;
        if data_size < plane_bytes {
            return Err(SamplingError::UnsupportedCzi(format!(
                "subblock at {} holds {data_size} bytes, expected {plane_bytes}",
                entry.file_position
            )));
        }
        let header_size = SUBBLOCK_HEADER_MIN_SIZE.max(16 + entry.encoded_size());
        let data_start = entry.file_position + SEGMENT_HEADER_SIZE + header_size + metadata_size;
        self.reader.seek(SeekFrom::Start(data_start))?;
        Ok(())
    }
}

/// Extent of every non-planar axis plus the plane size.
struct Layout {
    axes: Vec<(String, i32, usize)>,
    plane: (usize, usize),
}

impl Layout {
    fn from_entries(entries: &[DirectoryEntry]) -> Result<Self> {
        let mut names: Vec<String> = entries
            .iter()
            .flat_map(|entry| entry.dimensions.iter().map(|dim| dim.name.clone()))
            .filter(|name| name != "X" && name != "Y")
            .collect();
        names.sort_by_key(|name| (AXIS_ORDER.find(name.as_str()).unwrap_or(usize::MAX), name.clone()));
        names.dedup();

        let mut axes = Vec::with_capacity(names.len());
        for name in names {
            let ranges = entries.iter().map(|entry| {
                entry
                    .dimension(&name)
                    .map_or((0, 1), |dim| (dim.start, dim.start + dim.size.max(1)))
            });
            let (min, max) = ranges.fold((i32::MAX, i32::MIN), |(lo, hi), (start, end)| {
                (lo.min(start), hi.max(end))
            });
            axes.push((name, min, (max - min) as usize));
        }

        Ok(Self {
            axes,
            plane: entries[0].plane_size()?,
        })
    }

    fn shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|(_, _, len)| *len)
            .chain([self.plane.0, self.plane.1])
            .collect()
    }

    fn index_of<'a>(&'a self, entry: &'a DirectoryEntry) -> impl Iterator<Item = usize> + 'a {
        self.axes.iter().map(move |(name, min, _)| {
            let start = entry.dimension(name).map_or(0, |dim| dim.start);
            (start - min) as usize
        })
    }
}

fn seek_segment<R: Read + Seek>(reader: &mut R, position: u64, expected: &str) -> Result<()> {
    reader.seek(SeekFrom::Start(position))?;
    let mut id = [0u8; 16];
    reader.read_exact(&mut id)?;
    let name = String::from_utf8_lossy(&id);
    let name = name.trim_end_matches('\0');
    if name != expected {
        return Err(SamplingError::UnsupportedCzi(format!(
            "expected {expected} segment at {position}, found {name:?}"
        )));
    }
    let _allocated_size = reader.read_i64::<LittleEndian>()?;
    let _used_size = reader.read_i64::<LittleEndian>()?;
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<DirectoryEntry> {
    let mut schema = [0u8; 2];
    reader.read_exact(&mut schema)?;
    if &schema != b"DV" {
        return Err(SamplingError::UnsupportedCzi(format!(
            "directory entry schema {:?}",
            String::from_utf8_lossy(&schema)
        )));
    }
    let pixel_type = reader.read_i32::<LittleEndian>()?;
    let file_position = read_position(reader)?;
    let _file_part = reader.read_i32::<LittleEndian>()?;
    let compression = reader.read_i32::<LittleEndian>()?;
    let pyramid_type = reader.read_u8()?;
    skip(reader, 5)?;
    let count = read_size(reader)?;

    let mut dimensions = Vec::with_capacity(count);
    for _ in 0..count {
        let mut name = [0u8; 4];
        reader.read_exact(&mut name)?;
        let start = reader.read_i32::<LittleEndian>()?;
        let size = reader.read_i32::<LittleEndian>()?;
        let _start_coordinate = reader.read_f32::<LittleEndian>()?;
        let stored_size = reader.read_i32::<LittleEndian>()?;
        dimensions.push(DimensionEntry {
            name: String::from_utf8_lossy(&name).trim_end_matches('\0').to_string(),
            start,
            size,
            stored_size,
        });
    }

    Ok(DirectoryEntry {
        pixel_type,
        file_position,
        compression,
        pyramid_type,
        dimensions,
    })
}

fn read_position<R: Read>(reader: &mut R) -> Result<u64> {
    let value = reader.read_i64::<LittleEndian>()?;
    u64::try_from(value).map_err(|_| SamplingError::UnsupportedCzi(format!("negative offset {value}")))
}

fn read_size<R: Read>(reader: &mut R) -> Result<usize> {
    let value = reader.read_i32::<LittleEndian>()?;
    usize::try_from(value).map_err(|_| SamplingError::UnsupportedCzi(format!("negative size {value}")))
}

fn skip<R: Read>(reader: &mut R, count: u64) -> Result<()> {
    let copied = std::io::copy(&mut reader.take(count), &mut std::io::sink())?;
    if copied != count {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

/// [`VolumeDecoder`] for CZI files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct CziDecoder;

impl VolumeDecoder for CziDecoder {
    fn decode(&self, path: &Path) -> Result<PixelArray> {
        CziReader::open(path)?.read_pixels()
    }

    fn metadata_xml(&self, path: &Path) -> Result<String> {
        CziReader::open(path)?.metadata_xml()
    }
}
