use ndarray::{Array3, ArrayView3};
use num::clamp;

use crate::consts::{DEFAULT_HU_LOWER, DEFAULT_HU_UPPER};

/// 构建 CT 窗口时窗界不合法 (下界不严格小于上界, 或含非有限值).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidWindowError {
    /// 请求的窗下界.
    pub lower: f32,

    /// 请求的窗上界.
    pub upper: f32,
}

/// CT 窗口, 以窗下限与窗上限存储.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
/// 窗位 (level) 与窗宽 (width) 可由两个界导出.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CtWindow {
    lower: f32,
    upper: f32,
}

impl CtWindow {
    /// 以窗位和窗宽构建 CT 窗.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<CtWindow> {
        if (-1e5..=1e5).contains(&level) && 0.0 < width && width <= 1e5 {
            Some(Self {
                lower: level - width / 2.0,
                upper: level + width / 2.0,
            })
        } else {
            None
        }
    }

    /// 以窗下限和窗上限构建 CT 窗.
    ///
    /// 要求 `lower < upper` 且两者均为有限值, 否则返回
    /// `Err(InvalidWindowError)`.
    pub fn from_bounds(lower: f32, upper: f32) -> Result<CtWindow, InvalidWindowError> {
        if lower.is_finite() && upper.is_finite() && lower < upper {
            Ok(Self { lower, upper })
        } else {
            Err(InvalidWindowError { lower, upper })
        }
    }

    /// 构建预处理裁剪所用的默认 HU 窗口 `[-160, 240]`.
    #[inline]
    pub const fn from_liver_preprocess() -> CtWindow {
        Self {
            lower: DEFAULT_HU_LOWER,
            upper: DEFAULT_HU_UPPER,
        }
    }

    /// 构建一个便于展示扫描图像肝脏结构的 CT 窗口. 该窗口的窗位为
    /// 60, 窗宽为 200.
    #[inline]
    pub const fn from_liver_visual() -> CtWindow {
        Self {
            lower: -40.0,
            upper: 160.0,
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        (self.lower + self.upper) / 2.0
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 将 `ct` HU 值收缩到窗内: 低于下限取下限, 高于上限取上限,
    /// 窗内值原样通过.
    #[inline]
    pub fn clip(&self, ct: f32) -> f32 {
        clamp(ct, self.lower, self.upper)
    }

    /// 对整个 3D HU 数组加窗, 返回新数组. 幂等.
    pub fn normalize(&self, hu: ArrayView3<'_, f32>) -> Array3<f32> {
        hu.mapv(|v| self.clip(v))
    }

    /// 求在当前 CT 窗设置下, `ct` HU 值对应的灰度图像素整数值 (0 <= value <= 255)
    ///
    /// 如果 `ct` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, ct: f32) -> Option<u8> {
        if !ct.is_finite() {
            return None;
        }
        if ct <= self.lower {
            Some(u8::MIN)
        } else if ct >= self.upper {
            Some(u8::MAX)
        } else {
            // 255, not 256.
            Some((((ct - self.lower) / self.width()) * 255.0) as u8)
        }
    }
}
