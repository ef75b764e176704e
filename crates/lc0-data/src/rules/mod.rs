//! 外部ルールエンジンとの境界
//!
//! フィルタが必要とする能力（空盤面の生成・駒の配置・王手/ステイルメイト判定・
//! 指し手の解釈・駒取り判定）だけを trait として切り出す。
//! 盤面は常に「白（＝手番側）の手番」として扱う。

mod shakmaty_rules;

pub use shakmaty_rules::{ShakmatyBoard, ShakmatyRules};

use crate::error::RulesEngineError;
use crate::features::{FeatureVector, PieceKind, Side};

/// チェスのルールエンジン
pub trait RulesEngine {
    /// 盤面の表現
    type Board;
    /// 指し手の表現
    type Move;

    /// 空の盤面を作る
    fn empty_board(&self) -> Self::Board;

    /// 駒を置く
    fn place_piece(
        &self,
        board: &mut Self::Board,
        side: Side,
        kind: PieceKind,
        square: u8,
    ) -> Result<(), RulesEngineError>;

    /// 手番側が王手されているか
    fn is_check(&self, board: &Self::Board) -> Result<bool, RulesEngineError>;

    /// ステイルメイトか
    fn is_stalemate(&self, board: &Self::Board) -> Result<bool, RulesEngineError>;

    /// UCI 形式の指し手を解釈する
    fn parse_move(&self, notation: &str) -> Result<Self::Move, RulesEngineError>;

    /// 指し手が駒取りか（アンパッサン含む）
    fn is_capture(&self, board: &Self::Board, mv: &Self::Move) -> Result<bool, RulesEngineError>;

    /// 特徴量から盤面を再構築する（白 P..K, 黒 P..K のプレーン順に配置）
    fn build_board(&self, features: &FeatureVector) -> Result<Self::Board, RulesEngineError> {
        let mut board = self.empty_board();
        for (side, kind, square) in features.pieces() {
            self.place_piece(&mut board, side, kind, square)?;
        }
        Ok(board)
    }
}
