//! 2D 水平切片视图与持久化存储.

use image::ImageResult;
use ndarray::iter::Iter;
use ndarray::{ArrayView2, Ix2};
use std::ops::Index;
use std::path::Path;

use crate::{CtWindow, Idx2d};

/// 不可变、借用的二维水平 CT 扫描切片.
pub struct ScanSlice<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::CtScan`].
    data: ArrayView2<'a, f32>,
}

impl Index<Idx2d> for ScanSlice<'_> {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl<'a> ScanSlice<'a> {
    #[inline]
    pub(crate) fn new(data: ArrayView2<'a, f32>) -> Self {
        Self { data }
    }

    /// 获取切片形状, 格式为 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 获取给定位置 (高, 宽) 的 HU 值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<&f32> {
        self.data.get(pos)
    }

    /// 获取可以按行优先序迭代切片像素的迭代器.
    #[inline]
    pub fn iter(&self) -> Iter<'_, f32, Ix2> {
        self.data.iter()
    }

    /// 获取可以携带 (高, 宽) 索引迭代切片像素的迭代器.
    #[inline]
    pub fn indexed_iter(&self) -> ndarray::iter::IndexedIter<'_, f32, Ix2> {
        self.data.indexed_iter()
    }
}

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// 对于以 CT HU 值存储的扫描切片, 保存时会用给定的可视化窗口
/// 映射到 8-bit 灰度, 而不是 "as is" 地写出浮点值.
pub trait ImgWriteVis {
    /// 按照窗口 `window` 将图片保存到 `path` 路径.
    fn save_with<P: AsRef<Path>>(&self, path: P, window: CtWindow) -> ImageResult<()>;

    /// 按照默认肝脏可视化窗口 (窗位 60, 窗宽 200) 将图片保存到 `path` 路径.
    #[inline]
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.save_with(path, CtWindow::from_liver_visual())
    }
}

impl ImgWriteVis for ScanSlice<'_> {
    fn save_with<P: AsRef<Path>>(&self, path: P, window: CtWindow) -> ImageResult<()> {
        let (height, width) = self.shape();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &hu) in self.indexed_iter() {
            let gray = window.eval(hu).unwrap_or(u8::MIN);
            buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
        }
        buf.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// 切片视图的形状与索引访问.
    #[test]
    fn test_scan_slice_access() {
        let arr = Array2::from_shape_fn((3, 4), |(h, w)| (h * 4 + w) as f32);
        let sli = ScanSlice::new(arr.view());

        assert_eq!(sli.shape(), (3, 4));
        assert_eq!(sli[(2, 3)], 11.0);
        assert_eq!(sli.get((3, 0)), None);
        assert_eq!(sli.iter().count(), 12);
    }
}
