//! 肝脏区域的包围盒提取与裁剪.
//!
//! 裁剪策略分为三步: 先用掩膜将非肝脏组织体素全部置零,
//! 再求掩膜前景的轴对齐包围盒并按 margin 百分比对称外扩,
//! 最后对置零后的扫描做切片. 包围盒是体素级精确的,
//! 不做任何插值或平滑.

use itertools::{Itertools, MinMaxResult};
use ndarray::{s, Array3, ArrayView3, Axis, Zip};

use crate::consts::mask::is_foreground;
use crate::data::NiftiHeaderAttr;
use crate::{CtData3d, CtMask, CtScan, Idx3d};

/// 掩膜在某个轴向上不存在任何前景体素.
///
/// 这通常意味着分割掩膜为空或已损坏, 整条流水线应当就此终止.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegenerateMaskError {
    /// 出问题的轴: 0 = z, 1 = h, 2 = w.
    pub axis: usize,
}

/// 掩膜前景的轴对齐包围盒.
///
/// 每个轴是一个闭区间 `[lower, upper]`, 两端均为前景体素所在索引,
/// 保证 `upper >= lower`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundaries {
    /// z 轴前景索引最大值.
    pub upper_z: usize,

    /// z 轴前景索引最小值.
    pub lower_z: usize,

    /// h 轴前景索引最大值.
    pub upper_h: usize,

    /// h 轴前景索引最小值.
    pub lower_h: usize,

    /// w 轴前景索引最大值.
    pub upper_w: usize,

    /// w 轴前景索引最小值.
    pub lower_w: usize,
}

impl Boundaries {
    /// 求包围盒各轴向的外延, 定义为 `upper - lower`.
    #[inline]
    pub fn dimensions(&self) -> Idx3d {
        (
            self.upper_z - self.lower_z,
            self.upper_h - self.lower_h,
            self.upper_w - self.lower_w,
        )
    }
}

/// 沿 `axis` 扫描各层平面, 返回含前景体素的 (最大索引, 最小索引).
///
/// 若该轴不存在任何前景平面, 则返回 `Err`.
fn occupied_span(mask: &ArrayView3<'_, u8>, axis: usize) -> Result<(usize, usize), DegenerateMaskError> {
    let span = mask
        .axis_iter(Axis(axis))
        .enumerate()
        .filter(|(_, plane)| plane.iter().any(|p| is_foreground(*p)))
        .map(|(i, _)| i)
        .minmax();

    match span {
        MinMaxResult::NoElements => Err(DegenerateMaskError { axis }),
        MinMaxResult::OneElement(i) => Ok((i, i)),
        MinMaxResult::MinMax(lower, upper) => Ok((upper, lower)),
    }
}

impl CtMask {
    /// 提取掩膜前景的轴对齐包围盒.
    ///
    /// 对每个轴独立扫描: 某索引被占用, 当且仅当固定该轴、遍历其余两轴
    /// 得到的 2D 平面含非零体素. 任一轴的占用集为空时返回
    /// `Err(DegenerateMaskError)`, 其中记录了出问题的轴.
    pub fn boundaries(&self) -> Result<Boundaries, DegenerateMaskError> {
        let view = self.data();
        let (upper_z, lower_z) = occupied_span(&view, 0)?;
        let (upper_h, lower_h) = occupied_span(&view, 1)?;
        let (upper_w, lower_w) = occupied_span(&view, 2)?;

        Ok(Boundaries {
            upper_z,
            lower_z,
            upper_h,
            lower_h,
            upper_w,
            lower_w,
        })
    }
}

/// 单轴的 margin 外扩宽度.
///
/// 两次向下取整 (先取百分比绝对量, 再折半) 必须分开进行;
/// 浮点误差会使合并为单次除法在小外延时给出不同的边界.
#[inline]
fn margin_pad(dim: usize, margin_percent: f64) -> usize {
    ((dim as f64 * margin_percent * 0.02) as usize) / 2
}

/// 单轴裁剪范围 `[lower - pad, upper + pad)`, 收缩到合法区间 `[0, len)` 内.
#[inline]
fn padded_range(lower: usize, upper: usize, pad: usize, len: usize) -> (usize, usize) {
    (lower.saturating_sub(pad), (upper + pad).min(len))
}

impl CtData3d {
    /// 从腹部 CT 扫描中裁剪肝脏区域, 返回裁出的裸 HU 数组.
    ///
    /// `margin_percent` 为包围盒各轴向外扩的百分比, 默认场景下取 10.
    ///
    /// # 步骤
    ///
    /// 1. 扫描与掩膜逐体素相乘, 将非肝脏组织全部置零.
    ///   裁剪结果因此是 "零背景中嵌着肝脏 HU 值", 而不只是空间上的开窗;
    /// 2. 求掩膜前景包围盒及其外延;
    /// 3. 各轴按 margin 外扩宽度对称外扩, 切片取 `[lower - pad, upper + pad)`
    ///   左闭右开. 外扩越过数组边缘时收缩到合法区间内.
    ///
    /// # 失败
    ///
    /// 掩膜在某轴向上无前景时返回 `Err(DegenerateMaskError)`.
    /// 若 `margin_percent` 为负数则程序 panic.
    pub fn crop_liver(&self, margin_percent: f64) -> Result<Array3<f32>, DegenerateMaskError> {
        assert!(
            margin_percent >= 0.0 && margin_percent.is_finite(),
            "margin 百分比必须是非负有限值"
        );

        let b = self.mask.boundaries()?;
        let (dim_z, dim_h, dim_w) = b.dimensions();

        let mut zeroed = self.scan.data().to_owned();
        Zip::from(&mut zeroed)
            .and(self.mask.data())
            .for_each(|hu, &m| *hu *= m as f32);

        let (len_z, len_h, len_w) = zeroed.dim();
        let (z0, z1) = padded_range(b.lower_z, b.upper_z, margin_pad(dim_z, margin_percent), len_z);
        let (h0, h1) = padded_range(b.lower_h, b.upper_h, margin_pad(dim_h, margin_percent), len_h);
        let (w0, w1) = padded_range(b.lower_w, b.upper_w, margin_pad(dim_w, margin_percent), len_w);

        log::debug!(
            "crop: z [{z0}, {z1}), h [{h0}, {h1}), w [{w0}, {w1})"
        );
        Ok(zeroed.slice(s![z0..z1, h0..h1, w0..w1]).to_owned())
    }

    /// 与 [`Self::crop_liver`] 类似, 但将结果重新挂接源扫描的几何元信息,
    /// 组装成完整的 [`CtScan`].
    ///
    /// # 注意
    ///
    /// 源扫描的 origin 原样保留, 并未按裁剪偏移量平移,
    /// 因此裁剪结果的空间元信息只是近似.
    #[inline]
    pub fn crop_liver_scan(&self, margin_percent: f64) -> Result<CtScan, DegenerateMaskError> {
        let cropped = self.crop_liver(margin_percent)?;
        Ok(CtScan::with_header(self.scan.header(), cropped))
    }
}
