//! 12プレーン bitboard 特徴量の抽出
//!
//! lc0 のレコードは各 bitboard をバイト内でビット反転した順序で格納している
//! （バイト順はそのまま）。最初の12プレーンをバイト内反転して正規化したものを
//! 特徴量とし、重複判定のキーにもする。

use std::fmt;

use crate::record::V6TrainingRecord;

/// 特徴量に使うプレーン数
pub const NUM_PLANES: usize = 12;

/// 盤面のマス数
pub const BOARD_SIZE: usize = 64;

/// 特徴量1件のバイト数
pub const FEATURE_BYTES: usize = NUM_PLANES * 8;

const K1: u64 = 0x5555_5555_5555_5555;
const K2: u64 = 0x3333_3333_3333_3333;
const K4: u64 = 0x0F0F_0F0F_0F0F_0F0F;

/// 各バイト内のビット順を反転する（バイト順は変えない）
///
/// 1ビット、2ビット、4ビット単位の入れ替えを順に行う SWAR 実装。
/// 各バイトを独立に反転するので、2回適用すると元に戻る。
#[inline]
pub const fn mirror_horizontally(x: u64) -> u64 {
    let x = ((x >> 1) & K1) | ((x & K1) << 1);
    let x = ((x >> 2) & K2) | ((x & K2) << 2);
    ((x >> 4) & K4) | ((x & K4) << 4)
}

/// 駒の種類（プレーン順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceKind {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

impl PieceKind {
    pub const ALL: [PieceKind; 6] = [
        PieceKind::Pawn,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
        PieceKind::King,
    ];

    /// FEN の文字（白＝大文字）
    pub const fn fen_char(self, side: Side) -> char {
        let c = match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        };
        match side {
            Side::White => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }

    /// FEN の文字から駒と手番を得る
    pub fn from_fen_char(c: char) -> Option<(PieceKind, Side)> {
        let side = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        let kind = match c.to_ascii_lowercase() {
            'p' => PieceKind::Pawn,
            'n' => PieceKind::Knight,
            'b' => PieceKind::Bishop,
            'r' => PieceKind::Rook,
            'q' => PieceKind::Queen,
            'k' => PieceKind::King,
            _ => return None,
        };
        Some((kind, side))
    }
}

/// 手番側（白）と相手側（黒）
///
/// lc0 のプレーンは手番側から見た向きで保存されているので、
/// 「白」は常に手番側を指す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    White = 0,
    Black = 1,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::White, Side::Black];
}

/// プレーン番号（白 P N B R Q K, 黒 P N B R Q K の順）
#[inline]
pub const fn plane_index(side: Side, kind: PieceKind) -> usize {
    side as usize * 6 + kind as usize
}

/// 正規化済みの12プレーン特徴量
///
/// 比較順序は12語の辞書式順序で、重複除去の並び順にもなる。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FeatureVector(pub [u64; NUM_PLANES]);

impl FeatureVector {
    /// プレーンを取得
    #[inline]
    pub fn plane(&self, side: Side, kind: PieceKind) -> u64 {
        self.0[plane_index(side, kind)]
    }

    /// 駒を置く（テスト・デバッグ用）
    pub fn set_piece(&mut self, side: Side, kind: PieceKind, square: u8) {
        debug_assert!((square as usize) < BOARD_SIZE);
        self.0[plane_index(side, kind)] |= 1u64 << square;
    }

    /// 12プレーン全体の占有マス数（プレーンが重なっていれば重複して数える）
    pub fn piece_count(&self) -> u32 {
        self.0.iter().map(|p| p.count_ones()).sum()
    }

    /// 駒の一覧（プレーン順、マス昇順）
    pub fn pieces(&self) -> impl Iterator<Item = (Side, PieceKind, u8)> + '_ {
        Side::ALL.into_iter().flat_map(move |side| {
            PieceKind::ALL.into_iter().flat_map(move |kind| {
                let mut bb = self.plane(side, kind);
                std::iter::from_fn(move || {
                    if bb == 0 {
                        return None;
                    }
                    let sq = bb.trailing_zeros() as u8;
                    bb &= bb - 1;
                    Some((side, kind, sq))
                })
            })
        })
    }

    /// 盤面部分の FEN（8段目から1段目へ）
    ///
    /// 複数プレーンが同じマスを占めている場合は先のプレーンを表示する。
    pub fn to_board_fen(&self) -> String {
        let mut fen = String::with_capacity(72);
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                let sq = rank * 8 + file;
                match self.piece_at(sq) {
                    Some((side, kind)) => {
                        if empty > 0 {
                            fen.push(char::from(b'0' + empty));
                            empty = 0;
                        }
                        fen.push(kind.fen_char(side));
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push(char::from(b'0' + empty));
            }
            if rank > 0 {
                fen.push('/');
            }
        }
        fen
    }

    /// 盤面部分の FEN から特徴量を作る
    pub fn from_board_fen(board_fen: &str) -> Option<Self> {
        let mut features = FeatureVector::default();
        let ranks: Vec<&str> = board_fen.split('/').collect();
        if ranks.len() != 8 {
            return None;
        }
        for (i, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - i as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(d) = c.to_digit(10) {
                    file = file.saturating_add(d as u8);
                } else {
                    let (kind, side) = PieceKind::from_fen_char(c)?;
                    if file >= 8 {
                        return None;
                    }
                    features.set_piece(side, kind, rank * 8 + file);
                    file += 1;
                }
            }
            if file != 8 {
                return None;
            }
        }
        Some(features)
    }

    fn piece_at(&self, square: u8) -> Option<(Side, PieceKind)> {
        let mask = 1u64 << square;
        Side::ALL.into_iter().find_map(|side| {
            PieceKind::ALL
                .into_iter()
                .find(|&kind| self.plane(side, kind) & mask != 0)
                .map(|kind| (side, kind))
        })
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureVector({})", self.to_board_fen())
    }
}

/// レコードから特徴量を抽出する
pub fn extract_features(record: &V6TrainingRecord) -> FeatureVector {
    FeatureVector(std::array::from_fn(|i| mirror_horizontally(record.planes[i])))
}

/// 学習ターゲット（best_q）
#[inline]
pub fn extract_target(record: &V6TrainingRecord) -> f32 {
    record.best_q
}

/// 特徴量をレコードの生プレーンとして書き戻す
pub fn store_features(record: &mut V6TrainingRecord, features: &FeatureVector) {
    for (plane, &bb) in record.planes.iter_mut().zip(features.0.iter()) {
        *plane = mirror_horizontally(bb);
    }
}

/// bitboard を 8x8 で表示する（1バイト＝1行、先頭が最下位バイト）
pub fn render_bitboard(bitboard: u64) -> String {
    let mut out = String::with_capacity(72);
    for row in bitboard.to_le_bytes() {
        for bit in 0..8 {
            out.push(if row & (1 << bit) != 0 { '1' } else { '.' });
        }
        out.push('\n');
    }
    out
}
