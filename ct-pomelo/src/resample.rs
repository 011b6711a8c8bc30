//! 参考网格重采样.
//!
//! 将 moving 扫描的 HU 强度场重采样到 fixed 扫描的体素网格上,
//! 输出与 fixed 的 size/origin/spacing/direction 完全一致.
//! 对齐方式是闭式的内容居中 (两图物理中心重合), 不做迭代配准:
//!
//! 1. frame 对齐仿射: 线性部分取 moving 的方向余弦矩阵,
//!   平移取两图 origin 之差, 用于调和方向约定与原点差异;
//! 2. 居中平移: 把 moving 物理中心经 frame 逆变换后与参考网格
//!   物理中心之差作为内层平移量;
//! 3. 两者复合后再拼接两端的索引/物理互换,
//!   得到 "fixed 体素索引 -> moving 连续索引" 的单一仿射;
//! 4. 逐体素三线性插值, 出界取背景 0.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3, ArrayViewMut2};

use crate::consts::RESAMPLE_BACKGROUND;
use crate::data::Geometry;
use crate::{CtScan, NiftiHeaderAttr};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::Axis;
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 仿射变换: 3x3 线性部分加平移向量.
///
/// `apply(p) = matrix * p + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl AffineTransform {
    /// 由线性部分和平移直接构建.
    #[inline]
    pub fn new(matrix: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            matrix,
            translation,
        }
    }

    /// 纯平移变换.
    #[inline]
    pub fn translation_of(translation: Vector3<f64>) -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation,
        }
    }

    /// 恒等变换.
    #[inline]
    pub fn identity() -> Self {
        Self::translation_of(Vector3::zeros())
    }

    /// 线性部分.
    #[inline]
    pub fn matrix(&self) -> Matrix3<f64> {
        self.matrix
    }

    /// 平移部分.
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// 将变换作用于物理点 `p`.
    #[inline]
    pub fn apply(&self, p: Vector3<f64>) -> Vector3<f64> {
        self.matrix * p + self.translation
    }

    /// 闭式逆变换.
    ///
    /// 线性部分不可逆 (违反方向矩阵正交归一不变量) 时程序 panic.
    pub fn inverse(&self) -> AffineTransform {
        let inv = self
            .matrix
            .try_inverse()
            .expect("仿射变换线性部分必须可逆");
        Self {
            matrix: inv,
            translation: -(inv * self.translation),
        }
    }

    /// 复合变换 `self ∘ inner`, 即先作用 `inner` 再作用 `self`.
    #[inline]
    pub fn compose(&self, inner: &AffineTransform) -> AffineTransform {
        Self {
            matrix: self.matrix * inner.matrix,
            translation: self.matrix * inner.translation + self.translation,
        }
    }
}

/// 连续索引到物理点的仿射形式: `p = direction * scale * index + origin`.
#[inline]
fn index_to_physical_transform(g: &Geometry) -> AffineTransform {
    AffineTransform::new(
        g.direction() * Matrix3::from_diagonal(&g.spacing()),
        g.origin(),
    )
}

/// 物理点到连续索引的仿射形式, 预先求逆以避免逐体素反解.
#[inline]
fn physical_to_index_transform(g: &Geometry) -> AffineTransform {
    index_to_physical_transform(g).inverse()
}

/// 求 "fixed 体素索引 -> moving 连续索引" 的整体仿射.
///
/// 中间经过: fixed 索引 -> fixed 物理点 -> (+ 居中平移) -> frame
/// 对齐 -> moving 物理点 -> moving 连续索引. 居中平移量满足
/// `frame(reference_center + offset) = moving_center`.
fn alignment_transform(moving: &CtScan, fixed: &CtScan) -> AffineTransform {
    let reference_center = fixed.physical_center();
    let moving_center = moving.physical_center();

    let frame = AffineTransform::new(
        moving.geometry().direction(),
        moving.geometry().origin() - fixed.geometry().origin(),
    );
    let offset = frame.inverse().apply(moving_center) - reference_center;
    debug_assert!(
        (frame.apply(reference_center + offset) - moving_center).norm() < 1e-6,
        "居中平移必须把参考中心映到 moving 中心"
    );

    physical_to_index_transform(moving.geometry())
        .compose(&frame)
        .compose(&AffineTransform::translation_of(offset))
        .compose(&index_to_physical_transform(fixed.geometry()))
}

/// 对 `[z, H, W]` HU 数组在连续索引 `(ix, iy, iz)` 处做三线性插值.
///
/// 插值合法域为各轴闭区间 `[0, n - 1]`; 出界返回 `None`.
fn sample_trilinear(data: &ArrayView3<'_, f32>, index: Vector3<f64>) -> Option<f32> {
    // 浮点容差: 恰在边界的索引经仿射复合后可能偏出一个 ulp 量级.
    const INDEX_EPS: f64 = 1e-9;

    let (nz, nh, nw) = data.dim();
    let inside = |v: f64, n: usize| (-INDEX_EPS..=(n - 1) as f64 + INDEX_EPS).contains(&v);
    if !inside(index.x, nw) || !inside(index.y, nh) || !inside(index.z, nz) {
        return None;
    }
    let ix = index.x.clamp(0.0, (nw - 1) as f64);
    let iy = index.y.clamp(0.0, (nh - 1) as f64);
    let iz = index.z.clamp(0.0, (nz - 1) as f64);

    // 每轴拆出左右格点与插值权重. 恰在上边界时权重为零, 不会越界.
    let split = |v: f64, n: usize| {
        let i0 = v.floor() as usize;
        (i0, (i0 + 1).min(n - 1), v - v.floor())
    };
    let (x0, x1, fx) = split(ix, nw);
    let (y0, y1, fy) = split(iy, nh);
    let (z0, z1, fz) = split(iz, nz);

    let at = |z: usize, y: usize, x: usize| data[(z, y, x)] as f64;
    let c00 = at(z0, y0, x0) * (1.0 - fx) + at(z0, y0, x1) * fx;
    let c01 = at(z0, y1, x0) * (1.0 - fx) + at(z0, y1, x1) * fx;
    let c10 = at(z1, y0, x0) * (1.0 - fx) + at(z1, y0, x1) * fx;
    let c11 = at(z1, y1, x0) * (1.0 - fx) + at(z1, y1, x1) * fx;
    let c0 = c00 * (1.0 - fy) + c01 * fy;
    let c1 = c10 * (1.0 - fy) + c11 * fy;
    Some((c0 * (1.0 - fz) + c1 * fz) as f32)
}

/// 填充输出网格的第 `z_index` 层水平切片.
fn fill_plane(
    mut plane: ArrayViewMut2<'_, f32>,
    z_index: usize,
    moving: &ArrayView3<'_, f32>,
    total: &AffineTransform,
) {
    for ((h, w), hu) in plane.indexed_iter_mut() {
        let index = total.apply(Vector3::new(w as f64, h as f64, z_index as f64));
        *hu = sample_trilinear(moving, index).unwrap_or(RESAMPLE_BACKGROUND);
    }
}

/// 将 `moving` 扫描重采样到 `fixed` 扫描的体素网格上.
///
/// 返回的扫描携带 `fixed` 的几何元信息 (size/origin/spacing/direction),
/// 强度来自 `moving` 的三线性插值; moving 物理范围之外的体素取背景 0.
/// 对齐为物理中心重合的闭式居中, 见模块级文档.
pub fn resample_to_reference(moving: &CtScan, fixed: &CtScan) -> CtScan {
    let total = alignment_transform(moving, fixed);
    log::debug!(
        "resample: total matrix {:?}, translation {:?}",
        total.matrix(),
        total.translation()
    );

    let view = moving.data();
    let mut out = Array3::from_elem(fixed.shape(), RESAMPLE_BACKGROUND);
    for (z_index, plane) in out.outer_iter_mut().enumerate() {
        fill_plane(plane, z_index, &view, &total);
    }

    CtScan::with_header(fixed.header(), out)
}

/// 借助 `rayon`, 按水平切片并行地运行 [`resample_to_reference`].
///
/// 结果与串行版本逐体素一致.
#[cfg(feature = "rayon")]
pub fn par_resample_to_reference(moving: &CtScan, fixed: &CtScan) -> CtScan {
    let total = alignment_transform(moving, fixed);

    let view = moving.data();
    let mut out = Array3::from_elem(fixed.shape(), RESAMPLE_BACKGROUND);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z_index, plane)| {
            fill_plane(plane, z_index, &view, &total);
        });

    CtScan::with_header(fixed.header(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nifti::NiftiHeader;

    fn vec3_eq(a: Vector3<f64>, b: Vector3<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    /// 仿射逆变换与复合的基本代数性质.
    #[test]
    fn test_affine_algebra() {
        let t = AffineTransform::new(
            Matrix3::from_diagonal(&Vector3::new(2.0, -1.0, 0.5)),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let p = Vector3::new(4.0, 5.0, 6.0);

        // 逆变换往返.
        assert!(vec3_eq(t.inverse().apply(t.apply(p)), p));

        // 复合 = 先内后外.
        let shift = AffineTransform::translation_of(Vector3::new(-1.0, 0.0, 1.0));
        let composed = t.compose(&shift);
        assert!(vec3_eq(composed.apply(p), t.apply(shift.apply(p))));

        // 与恒等复合不变.
        let id = AffineTransform::identity();
        assert_eq!(t.compose(&id), t);
    }

    /// 三线性插值: 格点处取格点值, 格点间线性.
    #[test]
    fn test_sample_trilinear() {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, y, x)| (z * 4 + y * 2 + x) as f32);
        let view = data.view();

        // 8 个格点.
        assert_eq!(sample_trilinear(&view, Vector3::new(0.0, 0.0, 0.0)), Some(0.0));
        assert_eq!(sample_trilinear(&view, Vector3::new(1.0, 1.0, 1.0)), Some(7.0));

        // 体中心 = 8 格点平均.
        let mid = sample_trilinear(&view, Vector3::new(0.5, 0.5, 0.5)).unwrap();
        assert!((mid - 3.5).abs() < 1e-6);

        // 出界.
        assert_eq!(sample_trilinear(&view, Vector3::new(-0.1, 0.0, 0.0)), None);
        assert_eq!(sample_trilinear(&view, Vector3::new(0.0, 1.1, 0.0)), None);
    }

    /// 输出网格必须与 fixed 的几何完全一致.
    #[test]
    fn test_grid_conformance() {
        let moving = CtScan::fake(Array3::from_elem((8, 8, 8), 50.0), [2.0, 2.0, 2.0]);
        let fixed = CtScan::fake(Array3::zeros((12, 10, 14)), [1.0, 1.5, 3.0]);

        let out = resample_to_reference(&moving, &fixed);
        assert_eq!(out.shape(), fixed.shape());
        assert_eq!(out.size_xyz(), fixed.size_xyz());
        assert_eq!(out.pix_dim(), fixed.pix_dim());
        assert_eq!(out.geometry(), fixed.geometry());
    }

    /// 以自身为参考网格重采样应复现原强度.
    #[test]
    fn test_self_alignment() {
        let data = Array3::from_shape_fn((6, 7, 8), |(z, y, x)| (z * 56 + y * 8 + x) as f32);
        let scan = CtScan::fake(data, [0.7, 0.8, 2.5]);

        let out = resample_to_reference(&scan, &scan);
        for (a, b) in out.data().iter().zip(scan.data().iter()) {
            assert!((a - b).abs() < 1e-3, "{a} != {b}");
        }
    }

    /// 小 moving 居中嵌入大 fixed 网格, 范围外为背景 0.
    #[test]
    fn test_centering_into_larger_grid() {
        let moving = CtScan::fake(Array3::from_elem((4, 4, 4), 500.0), [1.0, 1.0, 1.0]);
        let fixed = CtScan::fake(Array3::zeros((8, 8, 8)), [1.0, 1.0, 1.0]);

        let out = resample_to_reference(&moving, &fixed);

        // 两图中心分别为连续索引 (2, 2, 2) 和 (4, 4, 4), 居中后
        // moving 覆盖 fixed 索引 [2, 5] 立方.
        assert_eq!(out[(4, 4, 4)], 500.0);
        assert_eq!(out[(2, 2, 2)], 500.0);
        assert_eq!(out[(5, 5, 5)], 500.0);
        assert_eq!(out[(0, 0, 0)], 0.0);
        assert_eq!(out[(6, 6, 6)], 0.0);

        let hit = out.data().iter().filter(|v| **v == 500.0).count();
        assert_eq!(hit, 4 * 4 * 4);
    }

    /// origin 之差被 frame 对齐与居中抵消: 网格等大时复现原数据.
    #[test]
    fn test_origin_difference_cancels() {
        let data = Array3::from_shape_fn((5, 5, 5), |(z, y, x)| (z * 25 + y * 5 + x) as f32);

        let mut shifted = NiftiHeader::default();
        shifted.sform_code = 1;
        shifted.srow_x = [1.0, 0.0, 0.0, 30.0];
        shifted.srow_y = [0.0, 1.0, 0.0, -10.0];
        shifted.srow_z = [0.0, 0.0, 1.0, 7.0];
        let moving = CtScan::with_header(&shifted, data.clone());

        let fixed = CtScan::fake(Array3::zeros((5, 5, 5)), [1.0, 1.0, 1.0]);

        let out = resample_to_reference(&moving, &fixed);
        for (a, b) in out.data().iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} != {b}");
        }
    }

    /// 各向异性间距: moving 体素间距是 fixed 的两倍.
    #[test]
    fn test_anisotropic_spacing() {
        let moving = CtScan::fake(Array3::from_elem((4, 4, 4), 250.0), [2.0, 2.0, 2.0]);
        let fixed = CtScan::fake(Array3::zeros((8, 8, 8)), [1.0, 1.0, 1.0]);

        let out = resample_to_reference(&moving, &fixed);

        // 两图物理中心均为 (4, 4, 4); moving 连续索引合法域 [0, 3]
        // 对应 fixed 索引 [0, 6].
        assert_eq!(out[(0, 0, 0)], 250.0);
        assert_eq!(out[(6, 6, 6)], 250.0);
        assert_eq!(out[(7, 7, 7)], 0.0);
    }

    /// 并行版本与串行版本逐体素一致.
    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_matches_sequential() {
        let data = Array3::from_shape_fn((9, 10, 11), |(z, y, x)| {
            ((z * 31 + y * 17 + x * 7) % 523) as f32
        });
        let moving = CtScan::fake(data, [1.3, 0.9, 2.1]);
        let fixed = CtScan::fake(Array3::zeros((12, 12, 12)), [1.0, 1.0, 1.0]);

        let seq = resample_to_reference(&moving, &fixed);
        let par = par_resample_to_reference(&moving, &fixed);
        assert_eq!(seq.data(), par.data());
    }
}
