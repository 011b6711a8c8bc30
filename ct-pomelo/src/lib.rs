#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 为下游肝脏分析准备腹部 3D CT 体数据:
//! 按分割掩膜裁剪肝脏区域, 将 HU 强度收缩到临床相关窗口,
//! 并把一名患者的预处理结果重采样到参考图像的体素网格上,
//! 使后续操作 (对比, 相减, 模型输入) 在空间对齐的数据上进行.
//!
//! 该 crate 目前仅提供 `safe` 接口. 在非期望情况下, 程序会直接 panic,
//! 而不会导致内存错误. As what Rust promises.
//!
//! # 注意
//!
//! 1. 数据数组统一按照 `[z, H, W]` 索引; 物理几何量
//!   (origin/spacing/direction) 统一按照 `(x, y, z)` 物理轴顺序.
//! 2. 对齐采用物理中心重合的闭式居中公式, 不是迭代式图像配准.
//!
//! # 开发计划
//!
//! ### 掩膜包围盒提取与 margin 裁剪 ✅
//!
//! 体素级精确的前景包围盒, 双重向下取整的对称外扩.
//!
//! 实现位于 `ct-pomelo/src/crop.rs`.
//!
//! ### CT window 视图与 HU 加窗 ✅
//!
//! 提供一个独立的 CT 窗口对象, 既可将 HU 值收缩到预处理窗口,
//! 也可将 HU 值转换为 8-bit 灰度值用于可视化.
//!
//! 实现位于 `ct-pomelo/src/data/window.rs`.
//!
//! ### nifti 几何元信息解码 ✅
//!
//! 按 sform > qform > pixdim 的优先级将 header 解码为
//! origin + spacing + direction, 并提供索引与物理点互换.
//!
//! 实现位于 `ct-pomelo/src/data/geometry.rs`.
//!
//! ### 参考网格重采样 ✅
//!
//! frame 对齐仿射与内容居中平移复合为单一变换, 三线性插值采样,
//! 背景取 0. 提供 `rayon` 并行版本.
//!
//! 实现位于 `ct-pomelo/src/resample.rs`.
//!
//! ### 流水线入口与 CLI ✅
//!
//! 两条顶层工作流以显式配置结构参数化, CLI 位于
//! `pipelines/prep`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D CT nii 文件基础数据结构.
mod data;

pub use data::{
    CtData3d, CtMask, CtScan, CtWindow, Geometry, ImgWriteVis, InvalidWindowError,
    NiftiHeaderAttr, ScanSlice,
};

pub mod consts;

pub mod crop;

pub use crop::{Boundaries, DegenerateMaskError};

pub mod resample;

pub use resample::{resample_to_reference, AffineTransform};

#[cfg(feature = "rayon")]
pub use resample::par_resample_to_reference;

pub mod dataset;
pub mod pipeline;
pub mod prelude;
