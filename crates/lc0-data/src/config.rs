//! パイプライン設定ファイル（TOML）
//!
//! ```toml
//! [filter]
//! q_threshold = 0.9
//! min_pieces = 6
//!
//! [extract]
//! threads = 8
//! member_errors = "skip"   # or "abort"
//!
//! [merge]
//! file_limit = 200
//! ```
//!
//! すべての項目は省略可能。コマンドライン引数で上書きされる。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};
use crate::filter::FilterConfig;
use crate::merge::MergeConfig;
use crate::processor::ExtractConfig;

/// パイプライン全体の設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub extract: ExtractConfig,
    pub merge: MergeConfig,
}

impl PipelineConfig {
    /// TOML 文字列から読み込む
    pub fn from_toml_str(text: &str) -> DataResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| DataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// ファイルから読み込む
    pub fn load(path: &Path) -> DataResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| DataError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// 値の範囲を検証する
    pub fn validate(&self) -> DataResult<()> {
        let q = self.filter.q_threshold;
        if !q.is_finite() || q < 0.0 {
            return Err(DataError::Config(format!(
                "filter.q_threshold must be a finite non-negative number, got {q}"
            )));
        }
        if self.merge.file_limit == Some(0) {
            return Err(DataError::Config("merge.file_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}
