//! 通用常量.

/// 掩膜体素值.
pub mod mask {
    /// 二值肝脏掩膜中, 背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 二值肝脏掩膜中, 肝脏的体素值.
    pub const MASK_LIVER: u8 = 1;

    /// 体素是否是前景 (肝脏)?
    ///
    /// 按照非零判断, 因此该谓词对非标准二值掩膜也能给出一致结果.
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p != MASK_BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, MASK_BACKGROUND)
    }
}

/// 预处理加窗的默认 HU 下限.
pub const DEFAULT_HU_LOWER: f32 = -160.0;

/// 预处理加窗的默认 HU 上限.
pub const DEFAULT_HU_UPPER: f32 = 240.0;

/// 裁剪时默认的 margin 百分比.
pub const DEFAULT_MARGIN_PERCENT: f64 = 10.0;

/// 重采样时, 落在 moving 图像物理范围之外的体素所取的背景 HU 值.
pub const RESAMPLE_BACKGROUND: f32 = 0.0;
