//! エラー型
//!
//! レコード単位・メンバー単位のエラーは呼び出し側で回復（スキップして集計）し、
//! ファイル単位の構造エラー（Format / Mismatch）はその処理単位を中断する。

use std::path::PathBuf;

/// ルールエンジン呼び出しのエラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesEngineError {
    /// best_idx / played_idx が指し手テーブルの範囲外
    #[error("move index {0} is out of range for the policy table")]
    UnknownMoveIndex(u16),

    /// 指し手文字列を解釈できない
    #[error("unparseable move notation: {0:?}")]
    InvalidMove(String),

    /// マス番号が 0..64 の範囲外
    #[error("square index {0} is out of range")]
    InvalidSquare(u8),

    /// ルールエンジンが局面の構築を拒否した（玉なし、段違いの歩など）
    #[error("rules engine rejected the reconstructed board: {0}")]
    IllegalBoard(String),
}

/// パイプライン全体のエラー
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// レコードサイズの不整合
    #[error("format error in {}: {detail} (expected multiple of {expected} bytes, got {actual} bytes)", .path.display())]
    Format {
        path: PathBuf,
        detail: String,
        expected: u64,
        actual: u64,
    },

    /// 圧縮メンバーの展開に失敗
    #[error("failed to decompress member {member:?} of {}: {source}", .path.display())]
    Decompression {
        path: PathBuf,
        member: String,
        #[source]
        source: std::io::Error,
    },

    /// 対になるファイル同士の件数不一致・未対応ファイル
    #[error("mismatch in {}: {detail} (expected {expected}, got {actual})", .path.display())]
    Mismatch {
        path: PathBuf,
        detail: String,
        expected: u64,
        actual: u64,
    },

    /// ルールエンジン由来のエラー
    #[error(transparent)]
    RulesEngine(#[from] RulesEngineError),

    /// 設定ファイルの読み込み・検証エラー
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 外部からの中断要求
    #[error("cancelled before {0}")]
    Cancelled(String),

    /// ファイルI/Oエラー
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }
}

/// パイプライン操作の Result 型
pub type DataResult<T> = Result<T, DataError>;
