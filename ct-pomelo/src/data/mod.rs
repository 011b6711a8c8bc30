use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::mask::*;
use crate::{Idx2d, Idx3d};

pub mod geometry;
pub mod slice;
pub mod window;

pub use geometry::Geometry;
pub use slice::{ImgWriteVis, ScanSlice};
pub use window::{CtWindow, InvalidWindowError};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 将 (z, H, W) 形状写回 header 的 dim 字段.
#[inline]
fn set_shape_in_header(h: &mut NiftiHeader, (z, height, w): Idx3d) {
    h.dim = [3, w as u16, height as u16, z as u16, 1, 1, 1, 1];
}

/// 3D CT nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取从 header 解码的体素网格几何.
    fn geometry(&self) -> &Geometry;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取体素个数数组, 按照 `(x, y, z)` 物理轴顺序.
    #[inline]
    fn size_xyz(&self) -> [usize; 3] {
        let (z, h, w) = self.shape();
        [w, h, z]
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let s = self.geometry().spacing();
        [s.z, s.y, s.x]
    }

    /// 获取体素网格的物理中心, 即连续索引 `size / 2` 的物理像.
    #[inline]
    fn physical_center(&self) -> nalgebra::Vector3<f64> {
        self.geometry().physical_center(self.size_xyz())
    }
}

/// nii 格式 3D CT 扫描, 包括 header, 解码几何和 CT 扫描 (HU). HU 值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct CtScan {
    header: BoxedHeader,
    geometry: Geometry,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for CtScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl Index<Idx3d> for CtScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for CtScan {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl CtScan {
    /// 打开 nii 文件格式的 3D CT 扫描. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        let geometry = Geometry::from_header(&header);
        Ok(Self {
            header,
            geometry,
            data,
        })
    }

    /// 以 `header` 的几何元信息和裸 HU 数组 `data` 直接拼装扫描实体.
    ///
    /// `data` 按照 `[z, H, W]` 组织. header 的 dim 字段会被改写为
    /// `data` 的形状, 其余字段 (包括 sform/qform 所编码的 origin)
    /// 原样保留.
    pub fn with_header(header: &NiftiHeader, data: Array3<f32>) -> Self {
        let mut header = Box::new(header.clone());
        set_shape_in_header(&mut header, data.dim());

        let geometry = Geometry::from_header(&header);
        Self {
            header,
            geometry,
            data,
        }
    }

    /// 根据裸 HU 数据和体素分辨率直接创建 `CtScan` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 `[z, H, W]` 组织.
    /// 2. `pix_dim` 按照 \[w, h, z\] 格式存储, 以毫米为单位.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        let mut header = BoxedHeader::default();
        set_shape_in_header(&mut header, data.dim());
        let [w, h, z] = pix_dim;
        header.pixdim = [1.0, w, h, z, 0.0, 0.0, 0.0, 0.0];
        header.intent_name[..4].copy_from_slice(b"fake");

        let geometry = Geometry::from_header(&header);
        Self {
            header,
            geometry,
            data,
        }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 将扫描以 nii 文件格式写入 `path`.
    ///
    /// 写出时以 `self.header` 为参考 header, 几何元信息
    /// (sform/qform) 原样落盘, 保证 origin/spacing/direction 无损往返.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [z, H, W] -> [W, H, z]. 置换视图恰为 Fortran 布局.
        let xyz = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&xyz)?;
        Ok(())
    }

    /// 对扫描加窗, 返回新的扫描实体. 几何元信息原样保留.
    pub fn normalized(&self, window: CtWindow) -> CtScan {
        Self {
            header: self.header.clone(),
            geometry: self.geometry,
            data: window.normalize(self.data.view()),
        }
    }

    /// 获取 3D 扫描 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ScanSlice<'_> {
        ScanSlice::new(self.data.index_axis(Axis(0), z_index))
    }

    /// 获取能按升序迭代 3D 扫描水平不可变切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ScanSlice> {
        self.data.axis_iter(Axis(0)).map(ScanSlice::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }
}

/// nii 格式 3D 肝脏分割掩膜, 包括 header, 解码几何和二值体素. 体素值以 `u8` 保存.
///
/// # 注意
///
/// 掩膜体素约定为 {0, 1} 二值; 掩膜不要求拓扑连通.
#[derive(Debug, Clone)]
pub struct CtMask {
    header: BoxedHeader,
    geometry: Geometry,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for CtMask {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl Index<Idx3d> for CtMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl CtMask {
    /// 打开 nii 文件格式的 3D 肝脏掩膜. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W]
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<u8>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        let geometry = Geometry::from_header(&header);
        Ok(Self {
            header,
            geometry,
            data,
        })
    }

    /// 根据裸掩膜数据和体素分辨率直接创建 `CtMask` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 `[z, H, W]` 组织, 体素值必须为 0 或 1.
    /// 2. `pix_dim` 按照 \[w, h, z\] 格式存储, 以毫米为单位.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<u8>, pix_dim: [f32; 3]) -> Self {
        let mut header = BoxedHeader::default();
        set_shape_in_header(&mut header, data.dim());
        let [w, h, z] = pix_dim;
        header.pixdim = [1.0, w, h, z, 0.0, 0.0, 0.0, 0.0];
        header.intent_name[..4].copy_from_slice(b"fake");

        let geometry = Geometry::from_header(&header);
        Self {
            header,
            geometry,
            data,
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取掩膜中前景 (肝脏) 体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 掩膜是否不含任何前景体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|p| is_background(*p))
    }
}

/// nii 格式的 3D CT 扫描与对应的肝脏分割掩膜.
///
/// 该结构完全透明, 仅包含两个公开的 `scan` 和 `mask` 子结构,
/// 用户可以直接使用它们来实现相关上层功能.
///
/// # 注意
///
/// 两个子结构的数据一致性由用户保证, 否则程序行为未定义.
#[derive(Debug, Clone)]
pub struct CtData3d {
    /// 3D CT 扫描.
    pub scan: CtScan,

    /// 3D 肝脏分割掩膜.
    pub mask: CtMask,
}

impl CtData3d {
    /// 分别打开 nii 文件格式的 3D CT 扫描和对应掩膜. 如果任一文件打开失败, 则返回 `Err`.
    /// 若两个文件的数据文件形状不一致, 则程序 `panic`.
    pub fn open(scan_path: impl AsRef<Path>, mask_path: impl AsRef<Path>) -> nifti::Result<Self> {
        let scan = CtScan::open(scan_path.as_ref())?;
        let mask = CtMask::open(mask_path.as_ref())?;
        assert_eq!(scan.shape(), mask.shape(), "CT 扫描和掩膜形状不一致");
        Ok(Self { scan, mask })
    }

    /// 由已有的扫描和掩膜直接组装. 若两者形状不一致, 则程序 `panic`.
    pub fn with_parts(scan: CtScan, mask: CtMask) -> Self {
        assert_eq!(scan.shape(), mask.shape(), "CT 扫描和掩膜形状不一致");
        Self { scan, mask }
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.mask.len_z()
    }

    /// 获取能按行优先序迭代 3D (扫描, 掩膜) 体素的迭代器.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&f32, &u8)> {
        self.scan.data.iter().zip(self.mask.data.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// fake 构造下 header dim 与数据形状保持一致.
    #[test]
    fn test_fake_shape_consistency() {
        let scan = CtScan::fake(Array3::zeros((4, 5, 6)), [1.0, 1.0, 1.0]);
        assert!(scan.is_faked());
        assert_eq!(scan.shape(), (4, 5, 6));
        assert_eq!(scan.slice_shape(), (5, 6));
        assert_eq!(scan.size_xyz(), [6, 5, 4]);
        assert_eq!(scan.size(), 120);
        assert_eq!(scan.len_z(), 4);
        assert!(scan.check(&(3, 4, 5)));
        assert!(!scan.check(&(4, 0, 0)));
    }

    /// fake 的 pix_dim 经由几何解码往返.
    #[test]
    fn test_fake_pix_dim() {
        let scan = CtScan::fake(Array3::zeros((2, 3, 4)), [0.7, 0.8, 5.0]);
        let [z, h, w] = scan.pix_dim();
        assert!((z - 5.0).abs() < 1e-6);
        assert!((h - 0.8).abs() < 1e-6);
        assert!((w - 0.7).abs() < 1e-6);
    }

    /// with_header 改写 dim 但保留其余几何字段.
    #[test]
    fn test_with_header_overwrites_dim() {
        let src = CtScan::fake(Array3::zeros((8, 8, 8)), [2.0, 2.0, 2.0]);
        let cropped = CtScan::with_header(src.header(), Array3::zeros((3, 4, 5)));
        assert_eq!(cropped.shape(), (3, 4, 5));
        assert_eq!(cropped.pix_dim(), src.pix_dim());
    }

    /// 扫描体素的读写索引.
    #[test]
    fn test_scan_index_mut() {
        let mut scan = CtScan::fake(Array3::zeros((2, 2, 2)), [1.0, 1.0, 1.0]);
        scan[(1, 0, 1)] = -700.0;
        assert_eq!(scan[(1, 0, 1)], -700.0);
        assert_eq!(scan.slice_at(1)[(0, 1)], -700.0);
    }

    /// 掩膜前景计数.
    #[test]
    fn test_mask_foreground_count() {
        let mut arr = Array3::<u8>::zeros((3, 3, 3));
        arr[(1, 1, 1)] = 1;
        arr[(2, 0, 1)] = 1;
        let mask = CtMask::fake(arr, [1.0, 1.0, 1.0]);
        assert_eq!(mask.foreground_count(), 2);
        assert!(!mask.is_empty());

        let empty = CtMask::fake(Array3::zeros((3, 3, 3)), [1.0, 1.0, 1.0]);
        assert!(empty.is_empty());
    }

    /// 扫描与掩膜形状不一致时组装 panic.
    #[test]
    #[should_panic]
    fn test_pair_shape_mismatch() {
        let scan = CtScan::fake(Array3::zeros((2, 2, 2)), [1.0, 1.0, 1.0]);
        let mask = CtMask::fake(Array3::zeros((2, 2, 3)), [1.0, 1.0, 1.0]);
        let _ = CtData3d::with_parts(scan, mask);
    }
}
