//! Static mapping from logical keys to container paths
//!
//! Every parameter write and delete goes through [`lookup`]. Keys missing from
//! both tables are rejected by the writer.

/// Target path and attribute set of one logical key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    pub key: &'static str,
    pub path: &'static str,
    pub attrs: &'static [(&'static str, &'static str)],
}

const fn param(
    key: &'static str,
    path: &'static str,
    attrs: &'static [(&'static str, &'static str)],
) -> NodeSpec {
    NodeSpec { key, path, attrs }
}

/// Structural groups of the master container and their class attributes
pub static NX_NODES: &[NodeSpec] = &[
    param("entry", "entry", &[("NX_class", "NXentry")]),
    param("data", "entry/data", &[("NX_class", "NXdata")]),
    param("instrument", "entry/instrument", &[("NX_class", "NXinstrument")]),
    param("beam", "entry/instrument/beam", &[("NX_class", "NXbeam")]),
    param("detector", "entry/instrument/detector", &[("NX_class", "NXdetector")]),
    param(
        "detectorSpecific",
        "entry/instrument/detector/detectorSpecific",
        &[("NX_class", "NXcollection")],
    ),
    param("sample", "entry/sample", &[("NX_class", "NXsample")]),
    param(
        "goniometer",
        "entry/sample/goniometer",
        &[("NX_class", "NXtransformations")],
    ),
    param(
        "geometry",
        "entry/instrument/detector/geometry",
        &[("NX_class", "NXgeometry")],
    ),
];

/// Detector, beam and goniometer parameters
pub static PARAMETERS: &[NodeSpec] = &[
    param("wavelength", "entry/instrument/beam/incident_wavelength", &[("units", "angstrom")]),
    param("beam_center_x", "entry/instrument/detector/beam_center_x", &[("units", "pixel")]),
    param("beam_center_y", "entry/instrument/detector/beam_center_y", &[("units", "pixel")]),
    param("bit_depth_image", "entry/instrument/detector/bit_depth_image", &[]),
    param("bit_depth_readout", "entry/instrument/detector/bit_depth_readout", &[]),
    param("count_time", "entry/instrument/detector/count_time", &[("units", "s")]),
    param("countrate_correction_applied", "entry/instrument/detector/countrate_correction_applied", &[]),
    param("description", "entry/instrument/detector/description", &[]),
    param("auto_summation", "entry/instrument/detector/detectorSpecific/auto_summation", &[]),
    param("calibration_type", "entry/instrument/detector/detectorSpecific/calibration_type", &[]),
    param("compression", "entry/instrument/detector/detectorSpecific/compression", &[]),
    param("countrate_correction_table", "entry/instrument/detector/detectorSpecific/countrate_correction_table", &[]),
    param("countrate_correction_bunch_mode", "entry/instrument/detector/detectorSpecific/countrate_correction_bunch_mode", &[]),
    param("countrate_correction_count_cutoff", "entry/instrument/detector/detectorSpecific/countrate_correction_count_cutoff", &[]),
    param("data_collection_date", "entry/instrument/detector/detectorSpecific/data_collection_date", &[]),
    param("detector_readout_period", "entry/instrument/detector/detectorSpecific/detector_readout_period", &[("units", "s")]),
    param("eiger_fw_version", "entry/instrument/detector/detectorSpecific/eiger_fw_version", &[]),
    param("element", "entry/instrument/detector/detectorSpecific/element", &[]),
    param("flatfield", "entry/instrument/detector/detectorSpecific/flatfield", &[]),
    param("frame_count_time", "entry/instrument/detector/detectorSpecific/frame_count_time", &[("units", "s")]),
    param("frame_period", "entry/instrument/detector/detectorSpecific/frame_period", &[("units", "s")]),
    param("module_bandwidth", "entry/instrument/detector/detectorSpecific/module_bandwidth", &[]),
    param("nframes_sum", "entry/instrument/detector/detectorSpecific/nframes_sum", &[]),
    param("nimages", "entry/instrument/detector/detectorSpecific/nimages", &[]),
    param("nsequences", "entry/instrument/detector/detectorSpecific/nsequences", &[]),
    param("ntrigger", "entry/instrument/detector/detectorSpecific/ntrigger", &[]),
    param("number_of_excluded_pixels", "entry/instrument/detector/detectorSpecific/number_of_excluded_pixels", &[]),
    param("photon_energy", "entry/instrument/detector/detectorSpecific/photon_energy", &[("units", "eV")]),
    param("pixel_mask", "entry/instrument/detector/detectorSpecific/pixel_mask", &[]),
    param("roi_mode", "entry/instrument/detector/detectorSpecific/roi_mode", &[]),
    param("software_version", "entry/instrument/detector/detectorSpecific/software_version", &[]),
    param("summation_nimages", "entry/instrument/detector/detectorSpecific/summation_nimages", &[]),
    param("test_mode", "entry/instrument/detector/detectorSpecific/test_mode", &[]),
    param("trigger_mode", "entry/instrument/detector/detectorSpecific/trigger_mode", &[]),
    param("x_pixels_in_detector", "entry/instrument/detector/detectorSpecific/x_pixels_in_detector", &[]),
    param("y_pixels_in_detector", "entry/instrument/detector/detectorSpecific/y_pixels_in_detector", &[]),
    param("detector_distance", "entry/instrument/detector/detector_distance", &[("units", "m")]),
    param("detector_number", "entry/instrument/detector/detector_number", &[]),
    param("detector_readout_time", "entry/instrument/detector/detector_readout_time", &[("units", "s")]),
    param("efficiency_correction_applied", "entry/instrument/detector/efficiency_correction_applied", &[]),
    param("flatfield_correction_applied", "entry/instrument/detector/flatfield_correction_applied", &[]),
    param("frame_time", "entry/instrument/detector/frame_time", &[("units", "s")]),
    param("detector_orientation", "entry/instrument/detector/geometry/orientation", &[("NX_class", "NXorientation")]),
    param("value", "entry/instrument/detector/geometry/orientation/value", &[]),
    param("detector_translation", "entry/instrument/detector/geometry/translation", &[("NX_class", "NXtranslation")]),
    param("distances", "entry/instrument/detector/geometry/translation/distances", &[]),
    param("two_theta", "entry/instrument/detector/goniometer/two_theta", &[("units", "degree")]),
    param("two_theta_end", "entry/instrument/detector/goniometer/two_theta_end", &[("units", "degree")]),
    param("two_theta_increment", "entry/instrument/detector/goniometer/two_theta_increment", &[("units", "degree")]),
    param("two_theta_range_average", "entry/instrument/detector/goniometer/two_theta_range_average", &[("units", "degree")]),
    param("two_theta_range_total", "entry/instrument/detector/goniometer/two_theta_range_total", &[("units", "degree")]),
    param("two_theta_start", "entry/instrument/detector/goniometer/two_theta_start", &[("units", "degree")]),
    param("pixel_mask_applied", "entry/instrument/detector/pixel_mask_applied", &[]),
    param("sensor_material", "entry/instrument/detector/sensor_material", &[]),
    param("sensor_thickness", "entry/instrument/detector/sensor_thickness", &[("units", "m")]),
    param("threshold_energy", "entry/instrument/detector/threshold_energy", &[("units", "eV")]),
    param("virtual_pixel_correction_applied", "entry/instrument/detector/virtual_pixel_correction_applied", &[]),
    param("x_pixel_size", "entry/instrument/detector/x_pixel_size", &[("units", "m")]),
    param("y_pixel_size", "entry/instrument/detector/y_pixel_size", &[("units", "m")]),
    param("chi", "entry/sample/goniometer/chi", &[("units", "degree")]),
    param("chi_end", "entry/sample/goniometer/chi_end", &[("units", "degree")]),
    param("chi_increment", "entry/sample/goniometer/chi_increment", &[("units", "degree")]),
    param("chi_range_average", "entry/sample/goniometer/chi_range_average", &[("units", "degree")]),
    param("chi_range_total", "entry/sample/goniometer/chi_range_total", &[("units", "degree")]),
    param("chi_start", "entry/sample/goniometer/chi_start", &[("units", "degree")]),
    param("kappa", "entry/sample/goniometer/kappa", &[("units", "degree")]),
    param("kappa_end", "entry/sample/goniometer/kappa_end", &[("units", "degree")]),
    param("kappa_increment", "entry/sample/goniometer/kappa_increment", &[("units", "degree")]),
    param("kappa_range_average", "entry/sample/goniometer/kappa_range_average", &[("units", "degree")]),
    param("kappa_range_total", "entry/sample/goniometer/kappa_range_total", &[("units", "degree")]),
    param("kappa_start", "entry/sample/goniometer/kappa_start", &[("units", "degree")]),
    param("omega", "entry/sample/goniometer/omega", &[("units", "degree")]),
    param("omega_end", "entry/sample/goniometer/omega_end", &[("units", "degree")]),
    param("omega_increment", "entry/sample/goniometer/omega_increment", &[("units", "degree")]),
    param("omega_range_average", "entry/sample/goniometer/omega_range_average", &[("units", "degree")]),
    param("omega_range_total", "entry/sample/goniometer/omega_range_total", &[("units", "degree")]),
    param("omega_start", "entry/sample/goniometer/omega_start", &[("units", "degree")]),
    param("phi", "entry/sample/goniometer/phi", &[("units", "degree")]),
    param("phi_end", "entry/sample/goniometer/phi_end", &[("units", "degree")]),
    param("phi_increment", "entry/sample/goniometer/phi_increment", &[("units", "degree")]),
    param("phi_range_average", "entry/sample/goniometer/phi_range_average", &[("units", "degree")]),
    param("phi_range_total", "entry/sample/goniometer/phi_range_total", &[("units", "degree")]),
    param("phi_start", "entry/sample/goniometer/phi_start", &[("units", "degree")]),
];

/// Find the mapping for `key`, parameters first, then structural nodes
pub fn lookup(key: &str) -> Option<&'static NodeSpec> {
    PARAMETERS
        .iter()
        .chain(NX_NODES.iter())
        .find(|spec| spec.key == key)
}

/// Path of the dataset holding the image stack in a data container
pub const DATA_PATH: &str = "entry/data/data";

/// Group in the master that receives the external links
pub const DATA_GROUP: &str = "entry/data";
