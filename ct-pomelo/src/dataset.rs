//! 数据集路径约定.

use std::env;
use std::path::{Path, PathBuf};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 获取预处理数据集的基本路径.
///
/// 1. 若环境变量 `$CT_DATASET_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset`.
pub fn dataset_dir_from_env_or_home() -> Option<PathBuf> {
    if let Ok(d) = env::var("CT_DATASET_DIR") {
        Some(PathBuf::from(d))
    } else {
        home_dataset_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 继续项按顺序拼接在 `$HOME/dataset` 之后.
    #[test]
    fn test_home_dataset_dir_with() {
        if let Some(base) = home_dataset_dir() {
            let full = home_dataset_dir_with(["train", "label"]).unwrap();
            assert_eq!(full, base.join("train").join("label"));
        }
    }
}
