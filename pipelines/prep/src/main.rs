//! 肝脏 CT 预处理流水线的命令行入口.
//!
//! 两个子命令分别对应两条顶层工作流:
//!
//! 1. `prep reference`: 裁剪 + 加窗一张参考 CT;
//! 2. `prep moving`: 裁剪 + 加窗一张 moving CT, 再重采样到参考图像网格.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use ct_pomelo::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "prep", about = "腹部 CT 肝脏区域预处理与参考网格对齐")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 预处理参考 CT: 裁剪肝脏区域并加窗.
    Reference(CommonArgs),

    /// 预处理 moving CT 并重采样到参考图像网格.
    Moving(MovingArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// CT 扫描 nii 文件路径.
    #[arg(long = "ct", short = 'c')]
    ct_path: PathBuf,

    /// 肝脏分割掩膜 nii 文件路径.
    #[arg(long = "mask", short = 'm')]
    mask_path: PathBuf,

    /// 处理结果的写出路径. 省略时结果不落盘.
    #[arg(long = "out", short = 'o')]
    output_path: Option<PathBuf>,

    /// 裁剪外扩的 margin 百分比.
    #[arg(long, default_value_t = DEFAULT_MARGIN_PERCENT, value_parser = margin_legal_range)]
    margin: f64,

    /// 加窗 HU 下限.
    #[arg(long, default_value_t = DEFAULT_HU_LOWER, value_parser = hu_legal_range, allow_hyphen_values = true)]
    low: f32,

    /// 加窗 HU 上限.
    #[arg(long, default_value_t = DEFAULT_HU_UPPER, value_parser = hu_legal_range, allow_hyphen_values = true)]
    high: f32,

    /// 将结果的第 `z` 层水平切片另存为灰度 png 以供目检.
    #[arg(long = "export-slice")]
    export_slice: Option<usize>,

    /// 切片 png 的写出路径. 与 `--export-slice` 搭配使用.
    #[arg(long = "slice-out")]
    slice_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MovingArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// 已预处理的参考图像 nii 文件路径.
    #[arg(long = "reference", short = 'r')]
    reference_path: PathBuf,
}

fn margin_legal_range(s: &str) -> Result<f64, String> {
    let margin: f64 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a legal margin value"))?;
    if !margin.is_finite() || !(0.0..=100.0).contains(&margin) {
        return Err(format!(
            "margin value should be in range [0, 100], but got `{margin}`"
        ));
    }
    Ok(margin)
}

fn hu_legal_range(s: &str) -> Result<f32, String> {
    let hu: f32 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a legal HU value"))?;
    if hu.is_nan() || hu.is_infinite() {
        return Err(format!("`{s}` is not a legal HU value"));
    }
    if hu.abs() >= 10000.0 {
        return Err(format!(
            "HU value should be in range (-10000, 10000), but got `{hu}`"
        ));
    }
    Ok(hu)
}

impl CommonArgs {
    fn to_config(&self, reference_path: Option<&PathBuf>) -> PrepConfig {
        let mut cfg = PrepConfig::new(&self.ct_path, &self.mask_path);
        cfg.reference_path = reference_path.cloned();
        cfg.output_path = self.output_path.clone();
        cfg.margin_percent = self.margin;
        cfg.window_lower = self.low;
        cfg.window_upper = self.high;
        cfg
    }

    /// 按参数要求导出一张水平切片灰度图.
    fn export_slice_png(&self, scan: &CtScan) {
        let Some(z_index) = self.export_slice else {
            return;
        };
        let Some(path) = &self.slice_out else {
            log::warn!("--export-slice 需要配合 --slice-out 使用, 已跳过导出");
            return;
        };
        assert!(z_index < scan.len_z(), "切片索引越界");
        match scan.slice_at(z_index).save(path) {
            Ok(()) => log::info!("slice {z_index} written to {path:?}"),
            Err(e) => log::error!("slice export failed: {e}"),
        }
    }
}

/// 按原顶层脚本的习惯打印结果图像的几何概要.
fn report_geometry(tag: &str, scan: &CtScan) {
    log::info!(
        "{tag}: size {:?}, origin {:?}, spacing {:?}, direction {:?}",
        scan.size_xyz(),
        scan.geometry().origin(),
        scan.pix_dim(),
        scan.geometry().direction(),
    );
}

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("Logger init error");

    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Reference(args) => {
            preprocess_reference(&args.to_config(None)).map(|scan| (args, scan, None))
        }
        Command::Moving(args) => preprocess_moving(
            &args.common.to_config(Some(&args.reference_path)),
        )
        .map(|scan| (&args.common, scan, Some(&args.reference_path))),
    };

    match outcome {
        Ok((args, scan, reference_path)) => {
            report_geometry("preprocessed", &scan);
            if let Some(p) = reference_path {
                match CtScan::open(p) {
                    Ok(reference) => report_geometry("reference", &reference),
                    Err(e) => log::warn!("reference reopen failed: {e}"),
                }
            }
            args.export_slice_png(&scan);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("pipeline failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}
