//! shakmaty によるルールエンジン実装

use std::cell::OnceCell;

use shakmaty::uci::UciMove;
use shakmaty::{
    Board, CastlingMode, Chess, Color, FromSetup, Piece, Position, PositionError, Role, Setup,
    Square,
};

use super::RulesEngine;
use crate::error::RulesEngineError;
use crate::features::{BOARD_SIZE, PieceKind, Side};

/// shakmaty を使うルールエンジン
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

/// 配置中の盤面と、初回の判定時に検証した局面のキャッシュ
#[derive(Debug, Clone)]
pub struct ShakmatyBoard {
    board: Board,
    position: OnceCell<Result<Chess, RulesEngineError>>,
}

impl ShakmatyBoard {
    /// 駒配置
    pub fn board(&self) -> &Board {
        &self.board
    }

    fn position(&self) -> Result<&Chess, RulesEngineError> {
        self.position.get_or_init(|| validate(&self.board)).as_ref().map_err(Clone::clone)
    }
}

fn validate(board: &Board) -> Result<Chess, RulesEngineError> {
    let mut setup = Setup::empty();
    setup.board = board.clone();
    setup.turn = Color::White;
    // lc0 の局面は実戦由来なので駒数・王手数の検査は緩める
    Chess::from_setup(setup, CastlingMode::Standard)
        .or_else(PositionError::ignore_too_much_material)
        .or_else(PositionError::ignore_impossible_check)
        .map_err(|e| RulesEngineError::IllegalBoard(e.to_string()))
}

const fn to_role(kind: PieceKind) -> Role {
    match kind {
        PieceKind::Pawn => Role::Pawn,
        PieceKind::Knight => Role::Knight,
        PieceKind::Bishop => Role::Bishop,
        PieceKind::Rook => Role::Rook,
        PieceKind::Queen => Role::Queen,
        PieceKind::King => Role::King,
    }
}

const fn to_color(side: Side) -> Color {
    match side {
        Side::White => Color::White,
        Side::Black => Color::Black,
    }
}

impl RulesEngine for ShakmatyRules {
    type Board = ShakmatyBoard;
    type Move = UciMove;

    fn empty_board(&self) -> ShakmatyBoard {
        ShakmatyBoard {
            board: Board::empty(),
            position: OnceCell::new(),
        }
    }

    fn place_piece(
        &self,
        board: &mut ShakmatyBoard,
        side: Side,
        kind: PieceKind,
        square: u8,
    ) -> Result<(), RulesEngineError> {
        if square as usize >= BOARD_SIZE {
            return Err(RulesEngineError::InvalidSquare(square));
        }
        board.board.set_piece_at(
            Square::new(u32::from(square)),
            Piece {
                color: to_color(side),
                role: to_role(kind),
            },
        );
        board.position = OnceCell::new();
        Ok(())
    }

    fn is_check(&self, board: &ShakmatyBoard) -> Result<bool, RulesEngineError> {
        Ok(board.position()?.is_check())
    }

    fn is_stalemate(&self, board: &ShakmatyBoard) -> Result<bool, RulesEngineError> {
        Ok(board.position()?.is_stalemate())
    }

    fn parse_move(&self, notation: &str) -> Result<UciMove, RulesEngineError> {
        notation.parse::<UciMove>().map_err(|_| RulesEngineError::InvalidMove(notation.to_string()))
    }

    /// 移動元・移動先のどちらかに相手の駒があれば駒取りとみなす。
    /// 再構築した盤面にはアンパッサンのマスが無いので、アンパッサンは現れない。
    fn is_capture(&self, board: &ShakmatyBoard, mv: &UciMove) -> Result<bool, RulesEngineError> {
        match mv {
            UciMove::Normal { from, to, .. } => {
                let them = board.board.by_color(Color::Black);
                Ok(them.contains(*from) || them.contains(*to))
            }
            UciMove::Put { .. } | UciMove::Null => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;

    fn board(fen: &str) -> ShakmatyBoard {
        let features = FeatureVector::from_board_fen(fen).unwrap();
        ShakmatyRules.build_board(&features).unwrap()
    }

    #[test]
    fn test_start_position_is_quiet() {
        let b = board("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR");
        assert!(!ShakmatyRules.is_check(&b).unwrap());
        assert!(!ShakmatyRules.is_stalemate(&b).unwrap());
        let mv = ShakmatyRules.parse_move("e2e4").unwrap();
        assert!(!ShakmatyRules.is_capture(&b, &mv).unwrap());
    }

    #[test]
    fn test_check_detected() {
        let b = board("7k/7p/8/4r3/8/8/PPP5/4K3");
        assert!(ShakmatyRules.is_check(&b).unwrap());
    }

    #[test]
    fn test_stalemate_detected() {
        let b = board("8/8/8/p1p5/P1P5/7k/5q2/7K");
        assert!(!ShakmatyRules.is_check(&b).unwrap());
        assert!(ShakmatyRules.is_stalemate(&b).unwrap());
    }

    #[test]
    fn test_capture_detected() {
        let b = board("4k3/7p/8/3p4/4P3/8/PP6/4K3");
        let capture = ShakmatyRules.parse_move("e4d5").unwrap();
        let push = ShakmatyRules.parse_move("e4e5").unwrap();
        assert!(ShakmatyRules.is_capture(&b, &capture).unwrap());
        assert!(!ShakmatyRules.is_capture(&b, &push).unwrap());
    }

    #[test]
    fn test_parse_move_rejects_garbage() {
        assert_eq!(
            ShakmatyRules.parse_move("zz99"),
            Err(RulesEngineError::InvalidMove("zz99".to_string()))
        );
    }

    #[test]
    fn test_place_piece_rejects_bad_square() {
        let mut b = ShakmatyRules.empty_board();
        assert_eq!(
            ShakmatyRules.place_piece(&mut b, Side::White, PieceKind::Pawn, 64),
            Err(RulesEngineError::InvalidSquare(64))
        );
    }

    #[test]
    fn test_missing_king_is_rules_error() {
        let b = board("8/8/8/8/8/8/PPPPPPPP/8");
        assert!(matches!(ShakmatyRules.is_check(&b), Err(RulesEngineError::IllegalBoard(_))));
    }

    #[test]
    fn test_place_piece_invalidates_cached_position() {
        let mut b = board("7k/8/8/8/8/8/8/4K3");
        assert!(!ShakmatyRules.is_check(&b).unwrap());
        ShakmatyRules.place_piece(&mut b, Side::Black, PieceKind::Rook, 60).unwrap();
        assert!(ShakmatyRules.is_check(&b).unwrap());
    }
}
