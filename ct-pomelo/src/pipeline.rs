//! 预处理流水线入口.
//!
//! 两条顶层工作流:
//!
//! 1. [`preprocess_reference`]: 裁剪 + 加窗一张参考 CT;
//! 2. [`preprocess_moving`]: 裁剪 + 加窗一张 moving CT,
//!   再将其重采样到已预处理的参考图像网格上.
//!
//! 所有输入以显式的 [`PrepConfig`] 传递, 不存在模块级可变配置;
//! 流水线各阶段均为确定性纯函数, 任一阶段失败即整体失败,
//! 不产生部分结果, 也不做重试.

use std::path::PathBuf;

use crate::consts::{DEFAULT_HU_LOWER, DEFAULT_HU_UPPER, DEFAULT_MARGIN_PERCENT};
use crate::crop::DegenerateMaskError;
use crate::data::window::InvalidWindowError;
use crate::{resample, CtData3d, CtScan, CtWindow, NiftiHeaderAttr};

/// 流水线运行时错误.
#[derive(Debug)]
pub enum PrepError {
    /// 打开或写出 nii 文件失败.
    Nifti(nifti::NiftiError),

    /// 掩膜在某轴向上无前景, 无法确定肝脏包围盒.
    DegenerateMask(DegenerateMaskError),

    /// 加窗上下界不合法.
    InvalidWindow(InvalidWindowError),

    /// moving 工作流缺少参考图像路径.
    MissingReference,
}

/// 单次流水线调用的完整配置.
///
/// `window_{lower, upper}` 以原始输入形式保存, 合法性检查推迟到
/// 流水线运行时, 不合法时以 [`PrepError::InvalidWindow`] 报告.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrepConfig {
    /// 待处理 CT 扫描的 nii 文件路径.
    pub ct_path: PathBuf,

    /// 对应肝脏分割掩膜的 nii 文件路径.
    pub mask_path: PathBuf,

    /// 参考图像 (已预处理) 的 nii 文件路径. 仅 moving 工作流需要.
    pub reference_path: Option<PathBuf>,

    /// 处理结果的写出路径. 为 `None` 时结果只保留在内存中.
    pub output_path: Option<PathBuf>,

    /// 裁剪外扩的 margin 百分比.
    pub margin_percent: f64,

    /// 加窗 HU 下限.
    pub window_lower: f32,

    /// 加窗 HU 上限.
    pub window_upper: f32,
}

impl PrepConfig {
    /// 以默认 margin (10%) 和默认 HU 窗口 ([-160, 240]) 构建配置.
    pub fn new(ct_path: impl Into<PathBuf>, mask_path: impl Into<PathBuf>) -> Self {
        Self {
            ct_path: ct_path.into(),
            mask_path: mask_path.into(),
            reference_path: None,
            output_path: None,
            margin_percent: DEFAULT_MARGIN_PERCENT,
            window_lower: DEFAULT_HU_LOWER,
            window_upper: DEFAULT_HU_UPPER,
        }
    }

    /// 由配置的上下界构建 CT 窗口.
    #[inline]
    pub fn window(&self) -> Result<CtWindow, InvalidWindowError> {
        CtWindow::from_bounds(self.window_lower, self.window_upper)
    }
}

/// 对内存中的 (扫描, 掩膜) 对做裁剪 + 加窗, 返回挂接源几何元信息的新扫描.
///
/// 这是两条工作流共用的内存内核心, 不涉及任何文件 I/O.
pub fn preprocess_ct(
    data: &CtData3d,
    margin_percent: f64,
    window: CtWindow,
) -> Result<CtScan, DegenerateMaskError> {
    let cropped = data.crop_liver_scan(margin_percent)?;
    log::debug!("cropped shape: {:?}", cropped.shape());
    Ok(cropped.normalized(window))
}

/// 预处理一张参考 CT: 裁剪肝脏区域并加窗.
///
/// 若 `cfg.output_path` 非空, 结果同时写回磁盘.
pub fn preprocess_reference(cfg: &PrepConfig) -> Result<CtScan, PrepError> {
    let window = cfg.window().map_err(PrepError::InvalidWindow)?;

    let data = CtData3d::open(&cfg.ct_path, &cfg.mask_path).map_err(PrepError::Nifti)?;
    log::info!(
        "opened scan {:?}, shape {:?}, foreground voxels {}",
        cfg.ct_path,
        data.scan.shape(),
        data.mask.foreground_count()
    );

    let prepped =
        preprocess_ct(&data, cfg.margin_percent, window).map_err(PrepError::DegenerateMask)?;

    if let Some(out) = &cfg.output_path {
        prepped.save(out).map_err(PrepError::Nifti)?;
        log::info!("preprocessed scan written to {out:?}");
    }
    Ok(prepped)
}

/// 预处理一张 moving CT 并将其对齐到参考图像网格.
///
/// 在裁剪 + 加窗之后, 结果被重采样到 `cfg.reference_path`
/// 所指参考图像的体素网格上 (物理中心重合的闭式居中对齐).
/// 若 `cfg.output_path` 非空, 重采样结果同时写回磁盘.
pub fn preprocess_moving(cfg: &PrepConfig) -> Result<CtScan, PrepError> {
    let window = cfg.window().map_err(PrepError::InvalidWindow)?;
    let refer_path = cfg.reference_path.as_ref().ok_or(PrepError::MissingReference)?;

    let data = CtData3d::open(&cfg.ct_path, &cfg.mask_path).map_err(PrepError::Nifti)?;
    log::info!(
        "opened scan {:?}, shape {:?}, foreground voxels {}",
        cfg.ct_path,
        data.scan.shape(),
        data.mask.foreground_count()
    );

    let prepped =
        preprocess_ct(&data, cfg.margin_percent, window).map_err(PrepError::DegenerateMask)?;

    let reference = CtScan::open(refer_path).map_err(PrepError::Nifti)?;
    log::info!(
        "reference grid {:?}, spacing {:?}",
        reference.size_xyz(),
        reference.pix_dim()
    );

    #[cfg(feature = "rayon")]
    let resampled = resample::par_resample_to_reference(&prepped, &reference);
    #[cfg(not(feature = "rayon"))]
    let resampled = resample::resample_to_reference(&prepped, &reference);

    if let Some(out) = &cfg.output_path {
        resampled.save(out).map_err(PrepError::Nifti)?;
        log::info!("resampled scan written to {out:?}");
    }
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CtMask;
    use ndarray::{s, Array3};

    /// 构造 40x100x100 的规格化场景:
    /// 掩膜 z [5, 35], h/w [20, 80], HU 值覆盖窗口两侧.
    fn scenario() -> CtData3d {
        let scan = Array3::from_shape_fn((40, 100, 100), |(z, h, w)| {
            ((z * 17 + h * 5 + w) % 1200) as f32 - 600.0
        });
        let mut mask = Array3::<u8>::zeros((40, 100, 100));
        mask.slice_mut(s![5..=35, 20..=80, 20..=80]).fill(1);

        CtData3d::with_parts(
            CtScan::fake(scan, [0.8, 0.8, 2.5]),
            CtMask::fake(mask, [0.8, 0.8, 2.5]),
        )
    }

    /// 端到端: margin 10, 窗口 (-160, 240), 期望形状 (36, 72, 72)
    /// 且所有强度落入窗口.
    #[test]
    fn test_preprocess_end_to_end() {
        let data = scenario();
        let window = CtWindow::from_bounds(-160.0, 240.0).unwrap();

        let prepped = preprocess_ct(&data, 10.0, window).unwrap();
        assert_eq!(prepped.shape(), (36, 72, 72));
        assert!(prepped
            .data()
            .iter()
            .all(|hu| (-160.0..=240.0).contains(hu)));

        // 几何元信息挂接自源扫描.
        assert_eq!(prepped.pix_dim(), data.scan.pix_dim());
    }

    /// 空掩膜沿流水线传播为 DegenerateMask 失败.
    #[test]
    fn test_preprocess_degenerate_mask() {
        let data = CtData3d::with_parts(
            CtScan::fake(Array3::zeros((8, 8, 8)), [1.0, 1.0, 1.0]),
            CtMask::fake(Array3::zeros((8, 8, 8)), [1.0, 1.0, 1.0]),
        );
        let window = CtWindow::from_liver_preprocess();
        assert!(preprocess_ct(&data, 10.0, window).is_err());
    }

    /// 配置默认值.
    #[test]
    fn test_config_defaults() {
        let cfg = PrepConfig::new("ct.nii.gz", "mask.nii.gz");
        assert_eq!(cfg.margin_percent, 10.0);
        assert_eq!(cfg.window_lower, -160.0);
        assert_eq!(cfg.window_upper, 240.0);
        assert!(cfg.reference_path.is_none());
        assert!(cfg.output_path.is_none());
        assert!(cfg.window().is_ok());
    }

    /// 不合法窗口在任何文件 I/O 之前即报错.
    #[test]
    fn test_invalid_window_reported_first() {
        let mut cfg = PrepConfig::new("no/such/ct.nii", "no/such/mask.nii");
        cfg.window_lower = 240.0;
        cfg.window_upper = -160.0;

        match preprocess_reference(&cfg) {
            Err(PrepError::InvalidWindow(e)) => {
                assert_eq!(e.lower, 240.0);
                assert_eq!(e.upper, -160.0);
            }
            other => panic!("意外结果: {other:?}"),
        }
    }

    /// moving 工作流缺少参考路径时直接报 MissingReference.
    #[test]
    fn test_missing_reference() {
        let cfg = PrepConfig::new("no/such/ct.nii", "no/such/mask.nii");
        assert!(matches!(
            preprocess_moving(&cfg),
            Err(PrepError::MissingReference)
        ));
    }
}
