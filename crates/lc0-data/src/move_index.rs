//! lc0 方策インデックス → UCI 指し手テーブル
//!
//! 1858 要素。前半 1792 要素は各マス（a1, b1, ..., h8 の順）から
//! クイーンの利き・ナイトの利きで到達できるマスへの指し手を行き先のマス番号順に並べたもの。
//! 後半 66 要素は7段目からの昇格（q, r, b の順）。ナイトへの昇格は前半の通常手で表す。
//!
//! 指し手は手番側から見た向き（手番側が常に1段目側）で表現される。

use std::sync::LazyLock;

use crate::error::RulesEngineError;
use crate::record::POLICY_SIZE;

/// テーブルの要素数
pub const NUM_MOVES: usize = POLICY_SIZE;

const PROMOTION_PIECES: [char; 3] = ['q', 'r', 'b'];

static MOVES: LazyLock<Vec<String>> = LazyLock::new(build_table);

/// マス番号（a1 = 0）を "e4" 形式の文字列にする
pub fn square_name(square: u8) -> String {
    let file = char::from(b'a' + square % 8);
    let rank = char::from(b'1' + square / 8);
    format!("{file}{rank}")
}

fn is_reachable(from: u8, to: u8) -> bool {
    let df = (to % 8) as i8 - (from % 8) as i8;
    let dr = (to / 8) as i8 - (from / 8) as i8;
    let (adf, adr) = (df.abs(), dr.abs());
    let queen = df == 0 || dr == 0 || adf == adr;
    let knight = (adf == 1 && adr == 2) || (adf == 2 && adr == 1);
    (queen || knight) && from != to
}

fn build_table() -> Vec<String> {
    let mut moves = Vec::with_capacity(NUM_MOVES);

    for from in 0..64u8 {
        for to in 0..64u8 {
            if is_reachable(from, to) {
                moves.push(format!("{}{}", square_name(from), square_name(to)));
            }
        }
    }

    for file in 0..8i8 {
        for to_file in (file - 1)..=(file + 1) {
            if !(0..8).contains(&to_file) {
                continue;
            }
            let from = square_name(48 + file as u8);
            let to = square_name(56 + to_file as u8);
            for promo in PROMOTION_PIECES {
                moves.push(format!("{from}{to}{promo}"));
            }
        }
    }

    debug_assert_eq!(moves.len(), NUM_MOVES);
    moves
}

/// テーブル全体
pub fn table() -> &'static [String] {
    &MOVES
}

/// インデックスから UCI 指し手を引く
pub fn idx_to_move(idx: u16) -> Result<&'static str, RulesEngineError> {
    MOVES
        .get(idx as usize)
        .map(String::as_str)
        .ok_or(RulesEngineError::UnknownMoveIndex(idx))
}

/// UCI 指し手からインデックスを引く（線形探索）
pub fn move_to_idx(uci: &str) -> Option<u16> {
    MOVES.iter().position(|m| m == uci).map(|i| i as u16)
}
