//! 🍊欢迎光临🍊
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{
    CtData3d, CtMask, CtScan, CtWindow, Geometry, ImgWriteVis, InvalidWindowError,
    NiftiHeaderAttr, ScanSlice,
};

pub use crate::crop::{Boundaries, DegenerateMaskError};

pub use crate::resample::{resample_to_reference, AffineTransform};

#[cfg(feature = "rayon")]
pub use crate::resample::par_resample_to_reference;

pub use crate::pipeline::{
    preprocess_ct, preprocess_moving, preprocess_reference, PrepConfig, PrepError,
};

pub use crate::consts::{
    DEFAULT_HU_LOWER, DEFAULT_HU_UPPER, DEFAULT_MARGIN_PERCENT, RESAMPLE_BACKGROUND,
};

pub use crate::dataset::{dataset_dir_from_env_or_home, home_dataset_dir_with};
