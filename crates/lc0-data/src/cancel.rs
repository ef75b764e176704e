//! 処理中断フラグ
//!
//! ファイル境界でのみ確認する。処理中のファイルは最後まで処理される。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DataError, DataResult};

/// 共有される中断フラグ
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 中断を要求する（Ctrl-C ハンドラから呼ばれる）
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 中断要求があれば `DataError::Cancelled` を返す
    pub fn check(&self, next_unit: impl std::fmt::Display) -> DataResult<()> {
        if self.is_cancelled() {
            return Err(DataError::Cancelled(next_unit.to_string()));
        }
        Ok(())
    }
}
