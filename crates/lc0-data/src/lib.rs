//! Leela Chess Zero の self-play 学習データから、
//! 評価関数学習用の（12プレーン特徴量, 評価値）データセットを作るライブラリ。
//!
//! 処理の流れ:
//!
//! ```text
//! tar アーカイブ → gzip メンバー → 8356バイトのレコード → フィルタ
//!     → 特徴量抽出 → アーカイブ内重複除去 → データセットの組
//!     → 全体の統合と重複除去
//! ```

pub mod archive;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod filter;
pub mod merge;
pub mod move_index;
pub mod processor;
pub mod record;
pub mod rules;

pub use archive::{ArchiveMember, ArchiveReader, MemberErrorPolicy};
pub use cancel::CancelFlag;
pub use config::PipelineConfig;
pub use dataset::{DatasetPaths, Sample, read_dataset, write_dataset};
pub use error::{DataError, DataResult, RulesEngineError};
pub use features::{FeatureVector, extract_features, extract_target};
pub use filter::{DropReason, FilterConfig, FilterPolicy, Verdict};
pub use merge::{DedupAccumulator, MergeConfig, MergeEngine, MergeStats, discover_pairs};
pub use processor::{
    ArchiveProcessor, ArchiveReport, ArchiveStats, ExtractConfig, check_distinct_outputs, process_archives,
};
pub use record::{RECORD_SIZE, TrailingData, V6TrainingRecord};
pub use rules::{RulesEngine, ShakmatyRules};
