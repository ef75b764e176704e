//! レコードの採否判定
//!
//! 判定は固定順で評価し、最初に該当した理由で打ち切る。
//!
//! 1. version / input_format が非対応
//! 2. invariance_info の bit 6（リスコアラーの削除マーク）
//! 3. 手番/アンパッサンのバイトが 1 より大きい
//! 4. |best_q| が閾値を超える（NaN も超過扱い）
//! 5. 駒数が min_pieces 以下
//! 6. 王手がかかっている
//! 7. ステイルメイト
//! 8. 最善手が駒取り
//!
//! 6〜8 は盤面を再構築してルールエンジンに問い合わせる。

use serde::{Deserialize, Serialize};

use crate::error::RulesEngineError;
use crate::features::FeatureVector;
use crate::move_index::idx_to_move;
use crate::record::{SUPPORTED_INPUT_FORMAT, SUPPORTED_VERSION, V6TrainingRecord};
use crate::rules::RulesEngine;

/// invariance_info の削除マーク
const MARKED_FOR_DELETION: u8 = 1 << 6;

/// フィルタ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// |best_q| がこれを超えたら除外
    pub q_threshold: f32,
    /// 駒数がこれ以下なら除外
    pub min_pieces: u32,
    pub drop_in_check: bool,
    pub drop_stalemate: bool,
    pub drop_captures: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            q_threshold: 0.9,
            min_pieces: 6,
            drop_in_check: true,
            drop_stalemate: true,
            drop_captures: true,
        }
    }
}

impl FilterConfig {
    fn needs_board(&self) -> bool {
        self.drop_in_check || self.drop_stalemate || self.drop_captures
    }
}

/// 除外理由（判定順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnsupportedFormat,
    MarkedForDeletion,
    InvalidSideToMove,
    ExtremeEvaluation,
    TooFewPieces,
    InCheck,
    Stalemate,
    BestMoveCapture,
}

impl DropReason {
    pub const ALL: [DropReason; 8] = [
        DropReason::UnsupportedFormat,
        DropReason::MarkedForDeletion,
        DropReason::InvalidSideToMove,
        DropReason::ExtremeEvaluation,
        DropReason::TooFewPieces,
        DropReason::InCheck,
        DropReason::Stalemate,
        DropReason::BestMoveCapture,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DropReason::UnsupportedFormat => "unsupported_format",
            DropReason::MarkedForDeletion => "marked_for_deletion",
            DropReason::InvalidSideToMove => "invalid_side_to_move",
            DropReason::ExtremeEvaluation => "extreme_evaluation",
            DropReason::TooFewPieces => "too_few_pieces",
            DropReason::InCheck => "in_check",
            DropReason::Stalemate => "stalemate",
            DropReason::BestMoveCapture => "best_move_capture",
        }
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop(DropReason),
}

impl Verdict {
    pub fn is_keep(self) -> bool {
        self == Verdict::Keep
    }
}

/// 理由別の除外件数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub unsupported_format: u64,
    pub marked_for_deletion: u64,
    pub invalid_side_to_move: u64,
    pub extreme_evaluation: u64,
    pub too_few_pieces: u64,
    pub in_check: u64,
    pub stalemate: u64,
    pub best_move_capture: u64,
}

impl DropCounts {
    fn slot(&mut self, reason: DropReason) -> &mut u64 {
        match reason {
            DropReason::UnsupportedFormat => &mut self.unsupported_format,
            DropReason::MarkedForDeletion => &mut self.marked_for_deletion,
            DropReason::InvalidSideToMove => &mut self.invalid_side_to_move,
            DropReason::ExtremeEvaluation => &mut self.extreme_evaluation,
            DropReason::TooFewPieces => &mut self.too_few_pieces,
            DropReason::InCheck => &mut self.in_check,
            DropReason::Stalemate => &mut self.stalemate,
            DropReason::BestMoveCapture => &mut self.best_move_capture,
        }
    }

    pub fn record(&mut self, reason: DropReason) {
        *self.slot(reason) += 1;
    }

    pub fn get(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::UnsupportedFormat => self.unsupported_format,
            DropReason::MarkedForDeletion => self.marked_for_deletion,
            DropReason::InvalidSideToMove => self.invalid_side_to_move,
            DropReason::ExtremeEvaluation => self.extreme_evaluation,
            DropReason::TooFewPieces => self.too_few_pieces,
            DropReason::InCheck => self.in_check,
            DropReason::Stalemate => self.stalemate,
            DropReason::BestMoveCapture => self.best_move_capture,
        }
    }

    pub fn total(&self) -> u64 {
        DropReason::ALL.iter().map(|&r| self.get(r)).sum()
    }

    pub fn add(&mut self, other: &DropCounts) {
        for reason in DropReason::ALL {
            *self.slot(reason) += other.get(reason);
        }
    }
}

/// フィルタ本体
#[derive(Debug, Clone)]
pub struct FilterPolicy<R> {
    config: FilterConfig,
    rules: R,
}

impl<R: RulesEngine> FilterPolicy<R> {
    pub fn new(config: FilterConfig, rules: R) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    /// レコードの採否を判定する
    ///
    /// 副作用はなく、同じ入力には常に同じ結果を返す。
    pub fn evaluate(
        &self,
        record: &V6TrainingRecord,
        features: &FeatureVector,
    ) -> Result<Verdict, RulesEngineError> {
        if let Some(reason) = self.metadata_reason(record, features) {
            return Ok(Verdict::Drop(reason));
        }
        if !self.config.needs_board() {
            return Ok(Verdict::Keep);
        }

        let board = self.rules.build_board(features)?;
        if self.config.drop_in_check && self.rules.is_check(&board)? {
            return Ok(Verdict::Drop(DropReason::InCheck));
        }
        if self.config.drop_stalemate && self.rules.is_stalemate(&board)? {
            return Ok(Verdict::Drop(DropReason::Stalemate));
        }
        if self.config.drop_captures {
            let mv = self.rules.parse_move(idx_to_move(record.best_idx)?)?;
            if self.rules.is_capture(&board, &mv)? {
                return Ok(Verdict::Drop(DropReason::BestMoveCapture));
            }
        }
        Ok(Verdict::Keep)
    }

    fn metadata_reason(
        &self,
        record: &V6TrainingRecord,
        features: &FeatureVector,
    ) -> Option<DropReason> {
        if record.version != SUPPORTED_VERSION || record.input_format != SUPPORTED_INPUT_FORMAT {
            return Some(DropReason::UnsupportedFormat);
        }
        if record.invariance_info & MARKED_FOR_DELETION != 0 {
            return Some(DropReason::MarkedForDeletion);
        }
        if record.side_to_move_or_enpassant > 1 {
            return Some(DropReason::InvalidSideToMove);
        }
        let q = record.best_q.abs();
        if q.is_nan() || q > self.config.q_threshold {
            return Some(DropReason::ExtremeEvaluation);
        }
        if features.piece_count() <= self.config.min_pieces {
            return Some(DropReason::TooFewPieces);
        }
        None
    }
}
