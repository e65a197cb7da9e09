//! Physical pixel spacing from the XML metadata embedded in a source file.
//!
//! The scaling lives under `ImageDocument/Metadata/Scaling/Items` as three
//! `Distance` entries in x, y, z order:
//!
//! ```xml
//! <ImageDocument>
//!   <Metadata>
//!     <Scaling>
//!       <Items>
//!         <Distance Id="X"><Value>1.0e-7</Value></Distance>
//!         <Distance Id="Y"><Value>1.0e-7</Value></Distance>
//!         <Distance Id="Z"><Value>5.0e-7</Value></Distance>
//!       </Items>
//!     </Scaling>
//!   </Metadata>
//! </ImageDocument>
//! ```
//!
//! Values are taken as-is; the unit label is always [`crate::volume::UNIT`].

use std::path::Path;

use roxmltree::{Document, Node};

use crate::error::{Result, SamplingError};
use crate::volume::Calibration;
use crate::volume_loader::VolumeDecoder;

const SCALING_PATH: [&str; 3] = ["Metadata", "Scaling", "Items"];
const AXES: [&str; 3] = ["X", "Y", "Z"];

pub struct CalibrationReader;

impl CalibrationReader {
    /// Read the calibration of one representative source file.
    pub fn read<D: VolumeDecoder + ?Sized>(decoder: &D, path: &Path) -> Result<Calibration> {
        let xml = decoder.metadata_xml(path)?;
        let calibration = Self::from_xml(&xml)?;
        log::info!(
            "Calibration from {path:?}: x={} y={} z={} {}",
            calibration.scale_x,
            calibration.scale_y,
            calibration.scale_z,
            calibration.unit()
        );
        Ok(calibration)
    }

    pub fn from_xml(xml: &str) -> Result<Calibration> {
        let document = Document::parse(xml)?;
        let mut node = document.root_element();
        let mut walked = node.tag_name().name().to_string();
        for name in SCALING_PATH {
            walked.push('/');
            walked.push_str(name);
            node = child_element(node, name)
                .ok_or_else(|| SamplingError::MetadataFormat(walked.clone()))?;
        }

        let items: Vec<Node> = node.children().filter(Node::is_element).collect();
        if items.len() != AXES.len() {
            return Err(SamplingError::MetadataFormat(format!(
                "{walked} (expected {} distances, found {})",
                AXES.len(),
                items.len()
            )));
        }

        let mut scales = [0.0; 3];
        for ((item, axis), scale) in items.iter().zip(AXES).zip(scales.iter_mut()) {
            let location = format!("{walked}/{}[{axis}]", item.tag_name().name());
            if let Some(id) = item.attribute("Id") {
                if !id.eq_ignore_ascii_case(axis) {
                    return Err(SamplingError::MetadataFormat(format!(
                        "{location} (found Id=\"{id}\")"
                    )));
                }
            }
            *scale = child_element(*item, "Value")
                .and_then(|value| value.text())
                .and_then(|text| text.trim().parse::<f64>().ok())
                .ok_or_else(|| SamplingError::MetadataFormat(format!("{location}/Value")))?;
        }

        Calibration::new(scales[0], scales[1], scales[2])
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}
