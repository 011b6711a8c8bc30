//! 体素网格的几何元信息.
//!
//! nifti header 中以 sform/qform 两种方式编码了体素索引到物理空间
//! (毫米) 的仿射映射. 本模块将其解码为 `origin` + `spacing` + `direction`
//! 三元组, 并提供连续索引与物理点的相互转换. 所有物理量均按照
//! `(x, y, z)` 物理轴顺序组织, 注意这与数据数组的 `[z, h, w]`
//! 索引顺序相反.

use nalgebra::{Matrix3, Vector3};
use nifti::NiftiHeader;

/// 体素网格几何: 原点, 体素间距与方向余弦矩阵.
///
/// `direction` 列向量为各体素轴在物理空间中的方向, 保证正交归一.
/// 体素个数不在此结构内, 由数据数组形状携带.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    origin: Vector3<f64>,
    spacing: Vector3<f64>,
    direction: Matrix3<f64>,
}

impl Geometry {
    /// 由给定三元组直接构建.
    ///
    /// `spacing` 各分量必须为正, `direction` 必须可逆, 否则程序后续操作 panic.
    #[inline]
    pub fn new(origin: Vector3<f64>, spacing: Vector3<f64>, direction: Matrix3<f64>) -> Self {
        assert!(spacing.iter().all(|s| *s > 0.0), "体素间距必须为正");
        Self {
            origin,
            spacing,
            direction,
        }
    }

    /// 单位几何: 原点为零, 间距为 1, 方向为单位阵.
    #[inline]
    pub fn identity() -> Self {
        Self {
            origin: Vector3::zeros(),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
        }
    }

    /// 从 nifti header 解码几何信息.
    ///
    /// 优先级与 NIfTI-1 标准一致:
    ///
    /// 1. `sform_code > 0` 时使用 `srow_{x, y, z}`;
    /// 2. 否则 `qform_code > 0` 时由四元数 (`quatern_{b, c, d}`) 重建旋转,
    ///   含 `pixdim[0]` 的 qfac 符号;
    /// 3. 否则退化为 `pixdim` 对角缩放, 原点为零.
    ///
    /// 间距取解码矩阵各列的模, 方向为列归一化后的余弦矩阵.
    pub fn from_header(header: &NiftiHeader) -> Self {
        let (m, t) = if header.sform_code > 0 {
            let [r0, r1, r2] = [header.srow_x, header.srow_y, header.srow_z];
            (
                Matrix3::new(
                    r0[0] as f64,
                    r0[1] as f64,
                    r0[2] as f64,
                    r1[0] as f64,
                    r1[1] as f64,
                    r1[2] as f64,
                    r2[0] as f64,
                    r2[1] as f64,
                    r2[2] as f64,
                ),
                Vector3::new(r0[3] as f64, r1[3] as f64, r2[3] as f64),
            )
        } else if header.qform_code > 0 {
            let b = header.quatern_b as f64;
            let c = header.quatern_c as f64;
            let d = header.quatern_d as f64;
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();

            let qfac = if header.pixdim[0] == 0.0 {
                1.0
            } else {
                header.pixdim[0] as f64
            };

            let rot = Matrix3::new(
                a * a + b * b - c * c - d * d,
                2.0 * b * c - 2.0 * a * d,
                2.0 * b * d + 2.0 * a * c,
                2.0 * b * c + 2.0 * a * d,
                a * a + c * c - b * b - d * d,
                2.0 * c * d - 2.0 * a * b,
                2.0 * b * d - 2.0 * a * c,
                2.0 * c * d + 2.0 * a * b,
                a * a + d * d - c * c - b * b,
            );
            let scale = Matrix3::from_diagonal(&Vector3::new(
                header.pixdim[1] as f64,
                header.pixdim[2] as f64,
                header.pixdim[3] as f64 * qfac,
            ));
            (
                rot * scale,
                Vector3::new(
                    header.quatern_x as f64,
                    header.quatern_y as f64,
                    header.quatern_z as f64,
                ),
            )
        } else {
            (
                Matrix3::from_diagonal(&Vector3::new(
                    header.pixdim[1] as f64,
                    header.pixdim[2] as f64,
                    header.pixdim[3] as f64,
                )),
                Vector3::zeros(),
            )
        };

        let cols = [m.column(0), m.column(1), m.column(2)];
        let norms = [cols[0].norm(), cols[1].norm(), cols[2].norm()];
        let spacing = Vector3::new(
            if norms[0] > 1e-9 { norms[0] } else { 1.0 },
            if norms[1] > 1e-9 { norms[1] } else { 1.0 },
            if norms[2] > 1e-9 { norms[2] } else { 1.0 },
        );
        let direction = Matrix3::from_columns(&[
            cols[0] / spacing.x,
            cols[1] / spacing.y,
            cols[2] / spacing.z,
        ]);

        Self {
            origin: t,
            spacing,
            direction,
        }
    }

    /// 物理原点, 即体素索引 `(0, 0, 0)` 的物理位置.
    #[inline]
    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    /// 体素间距, 以毫米为单位, `(x, y, z)` 顺序.
    #[inline]
    pub fn spacing(&self) -> Vector3<f64> {
        self.spacing
    }

    /// 方向余弦矩阵.
    #[inline]
    pub fn direction(&self) -> Matrix3<f64> {
        self.direction
    }

    /// 将连续体素索引 `(ix, iy, iz)` 映射到物理点.
    ///
    /// `point = origin + direction * (index .* spacing)`.
    #[inline]
    pub fn index_to_physical(&self, index: Vector3<f64>) -> Vector3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// 将物理点映射回连续体素索引.
    ///
    /// `index = (direction^-1 * (point - origin)) ./ spacing`.
    /// 若方向矩阵不可逆 (违反正交归一不变量), 则程序 panic.
    #[inline]
    pub fn physical_to_index(&self, point: Vector3<f64>) -> Vector3<f64> {
        let inv = self
            .direction
            .try_inverse()
            .expect("方向余弦矩阵必须可逆");
        (inv * (point - self.origin)).component_div(&self.spacing)
    }

    /// 求体素个数为 `size_xyz` 的网格的物理中心.
    ///
    /// 中心定义为连续索引 `size / 2` 的物理像, 完整经过
    /// origin/spacing/direction, 而不是原点与对角顶点的朴素中点.
    #[inline]
    pub fn physical_center(&self, size_xyz: [usize; 3]) -> Vector3<f64> {
        let half = Vector3::new(
            size_xyz[0] as f64 / 2.0,
            size_xyz[1] as f64 / 2.0,
            size_xyz[2] as f64 / 2.0,
        );
        self.index_to_physical(half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3_eq(a: Vector3<f64>, b: Vector3<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    /// 单位几何下索引与物理点应当重合.
    #[test]
    fn test_identity_mapping() {
        let g = Geometry::identity();
        let p = Vector3::new(5.0, 6.0, 7.0);
        assert!(vec3_eq(g.index_to_physical(p), p));
        assert!(vec3_eq(g.physical_to_index(p), p));
    }

    /// 非单位间距与非零原点的往返一致性.
    #[test]
    fn test_round_trip() {
        let g = Geometry::new(
            Vector3::new(10.0, -20.0, 30.0),
            Vector3::new(0.75, 0.75, 2.5),
            Matrix3::identity(),
        );
        let idx = Vector3::new(3.5, 4.5, 5.5);
        let p = g.index_to_physical(idx);
        assert!(vec3_eq(g.physical_to_index(p), idx));

        // 手动展开验证一个分量.
        assert!((p.z - (30.0 + 5.5 * 2.5)).abs() < 1e-9);
    }

    /// 轴翻转方向矩阵下的映射.
    #[test]
    fn test_flipped_direction() {
        let dir = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0));
        let g = Geometry::new(Vector3::zeros(), Vector3::new(2.0, 2.0, 2.0), dir);
        let p = g.index_to_physical(Vector3::new(1.0, 2.0, 3.0));
        assert!(vec3_eq(p, Vector3::new(-2.0, -4.0, 6.0)));
        assert!(vec3_eq(g.physical_to_index(p), Vector3::new(1.0, 2.0, 3.0)));
    }

    /// sform 路径的 header 解码.
    #[test]
    fn test_from_header_sform() {
        let mut h = NiftiHeader::default();
        h.sform_code = 1;
        h.srow_x = [2.0, 0.0, 0.0, 100.0];
        h.srow_y = [0.0, 2.0, 0.0, -50.0];
        h.srow_z = [0.0, 0.0, 3.0, 0.0];

        let g = Geometry::from_header(&h);
        assert!(vec3_eq(g.origin(), Vector3::new(100.0, -50.0, 0.0)));
        assert!(vec3_eq(g.spacing(), Vector3::new(2.0, 2.0, 3.0)));
        assert_eq!(g.direction(), Matrix3::identity());
    }

    /// 无 sform/qform 时退化到 pixdim 对角几何.
    #[test]
    fn test_from_header_fallback() {
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 0;
        h.pixdim = [1.0, 0.75, 0.75, 5.0, 0.0, 0.0, 0.0, 0.0];

        let g = Geometry::from_header(&h);
        assert!(vec3_eq(g.origin(), Vector3::zeros()));
        assert!(vec3_eq(g.spacing(), Vector3::new(0.75, 0.75, 5.0)));
    }

    /// 物理中心为连续索引 size/2 的像.
    #[test]
    fn test_physical_center() {
        let g = Geometry::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(1.0, 1.0, 2.0),
            Matrix3::identity(),
        );
        let c = g.physical_center([10, 20, 30]);
        assert!(vec3_eq(c, Vector3::new(1.0 + 5.0, 2.0 + 10.0, 3.0 + 30.0)));
    }
}
