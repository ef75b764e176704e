//! lc0 V6 学習レコードの復号・符号化
//!
//! Leela Chess Zero の self-play が出力する固定長（8356バイト）のリトルエンディアン構造体を、
//! 明示的なオフセット表に従って読み書きする。構造体のメモリレイアウトには依存しない。
//!
//! # データ形式
//!
//! | フィールド                  | オフセット | サイズ | 型             |
//! |-----------------------------|-----------:|-------:|----------------|
//! | version                     |          0 |      4 | u32            |
//! | input_format                |          4 |      4 | u32            |
//! | probabilities               |          8 |   7432 | f32 × 1858     |
//! | planes                      |       7440 |    832 | u64 × 104      |
//! | castling / stm / rule50 ... |       8272 |      8 | u8 × 8         |
//! | root_q .. orig_m            |       8280 |     60 | f32 × 15       |
//! | visits                      |       8340 |      4 | u32            |
//! | played_idx / best_idx       |       8344 |      4 | u16 × 2        |
//! | policy_kld                  |       8348 |      4 | f32            |
//! | reserved                    |       8352 |      4 | u32            |

use std::path::Path;
use std::slice::ChunksExact;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DataError;

/// レコードサイズ（バイト）
pub const RECORD_SIZE: usize = 8356;

/// 方策ベクトルの要素数
pub const POLICY_SIZE: usize = 1858;

/// レコードに含まれる bitboard プレーン数
pub const NUM_INPUT_PLANES: usize = 104;

/// 対応するフォーマットバージョン
pub const SUPPORTED_VERSION: u32 = 6;

/// 対応する入力フォーマット（classical 112 planes）
pub const SUPPORTED_INPUT_FORMAT: u32 = 1;

/// フィールドのエンコーディング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    U8,
    U16Le,
    U32Le,
    U64Le,
    F32Le,
}

impl Encoding {
    /// 1要素あたりのバイト数
    pub const fn width(self) -> usize {
        match self {
            Encoding::U8 => 1,
            Encoding::U16Le => 2,
            Encoding::U32Le | Encoding::F32Le => 4,
            Encoding::U64Le => 8,
        }
    }
}

/// オフセット表の1行
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub count: usize,
    pub encoding: Encoding,
}

impl FieldSpec {
    const fn new(name: &'static str, offset: usize, count: usize, encoding: Encoding) -> Self {
        Self {
            name,
            offset,
            count,
            encoding,
        }
    }

    /// フィールド全体のバイト数
    pub const fn width(&self) -> usize {
        self.count * self.encoding.width()
    }

    /// フィールドの終端オフセット（排他的）
    pub const fn end(&self) -> usize {
        self.offset + self.width()
    }
}

const OFF_VERSION: usize = 0;
const OFF_INPUT_FORMAT: usize = 4;
const OFF_PROBABILITIES: usize = 8;
const OFF_PLANES: usize = OFF_PROBABILITIES + POLICY_SIZE * 4;
const OFF_FLAGS: usize = OFF_PLANES + NUM_INPUT_PLANES * 8;
const OFF_CASTLING_US_OOO: usize = OFF_FLAGS;
const OFF_CASTLING_US_OO: usize = OFF_FLAGS + 1;
const OFF_CASTLING_THEM_OOO: usize = OFF_FLAGS + 2;
const OFF_CASTLING_THEM_OO: usize = OFF_FLAGS + 3;
const OFF_SIDE_TO_MOVE: usize = OFF_FLAGS + 4;
const OFF_RULE50: usize = OFF_FLAGS + 5;
const OFF_INVARIANCE: usize = OFF_FLAGS + 6;
const OFF_DUMMY: usize = OFF_FLAGS + 7;
const OFF_EVALS: usize = OFF_FLAGS + 8;
const NUM_EVALS: usize = 15;
const OFF_VISITS: usize = OFF_EVALS + NUM_EVALS * 4;
const OFF_PLAYED_IDX: usize = OFF_VISITS + 4;
const OFF_BEST_IDX: usize = OFF_PLAYED_IDX + 2;
const OFF_POLICY_KLD: usize = OFF_BEST_IDX + 2;
const OFF_RESERVED: usize = OFF_POLICY_KLD + 4;

/// 評価値フィールド（f32）の並び順
const EVAL_FIELDS: [&str; NUM_EVALS] = [
    "root_q",
    "best_q",
    "root_d",
    "best_d",
    "root_m",
    "best_m",
    "plies_left",
    "result_q",
    "result_d",
    "played_q",
    "played_d",
    "played_m",
    "orig_q",
    "orig_d",
    "orig_m",
];

/// V6 レコードのオフセット表（オフセット昇順、隙間なし）
pub const LAYOUT: [FieldSpec; 32] = [
    FieldSpec::new("version", OFF_VERSION, 1, Encoding::U32Le),
    FieldSpec::new("input_format", OFF_INPUT_FORMAT, 1, Encoding::U32Le),
    FieldSpec::new("probabilities", OFF_PROBABILITIES, POLICY_SIZE, Encoding::F32Le),
    FieldSpec::new("planes", OFF_PLANES, NUM_INPUT_PLANES, Encoding::U64Le),
    FieldSpec::new("castling_us_ooo", OFF_CASTLING_US_OOO, 1, Encoding::U8),
    FieldSpec::new("castling_us_oo", OFF_CASTLING_US_OO, 1, Encoding::U8),
    FieldSpec::new("castling_them_ooo", OFF_CASTLING_THEM_OOO, 1, Encoding::U8),
    FieldSpec::new("castling_them_oo", OFF_CASTLING_THEM_OO, 1, Encoding::U8),
    FieldSpec::new("side_to_move_or_enpassant", OFF_SIDE_TO_MOVE, 1, Encoding::U8),
    FieldSpec::new("rule50_count", OFF_RULE50, 1, Encoding::U8),
    FieldSpec::new("invariance_info", OFF_INVARIANCE, 1, Encoding::U8),
    FieldSpec::new("dummy", OFF_DUMMY, 1, Encoding::U8),
    FieldSpec::new(EVAL_FIELDS[0], OFF_EVALS, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[1], OFF_EVALS + 4, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[2], OFF_EVALS + 8, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[3], OFF_EVALS + 12, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[4], OFF_EVALS + 16, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[5], OFF_EVALS + 20, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[6], OFF_EVALS + 24, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[7], OFF_EVALS + 28, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[8], OFF_EVALS + 32, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[9], OFF_EVALS + 36, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[10], OFF_EVALS + 40, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[11], OFF_EVALS + 44, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[12], OFF_EVALS + 48, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[13], OFF_EVALS + 52, 1, Encoding::F32Le),
    FieldSpec::new(EVAL_FIELDS[14], OFF_EVALS + 56, 1, Encoding::F32Le),
    FieldSpec::new("visits", OFF_VISITS, 1, Encoding::U32Le),
    FieldSpec::new("played_idx", OFF_PLAYED_IDX, 1, Encoding::U16Le),
    FieldSpec::new("best_idx", OFF_BEST_IDX, 1, Encoding::U16Le),
    FieldSpec::new("policy_kld", OFF_POLICY_KLD, 1, Encoding::F32Le),
    FieldSpec::new("reserved", OFF_RESERVED, 1, Encoding::U32Le),
];

const _: () = assert!(OFF_RESERVED + 4 == RECORD_SIZE, "V6 layout must be 8356 bytes");

/// レコード単体の復号エラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// 1レコード分のバッファ長が不正
    #[error("record buffer must be exactly 8356 bytes, got {0}")]
    WrongSize(usize),

    /// ストリーム長がレコードサイズの倍数でない
    #[error("stream of {len} bytes is not a multiple of 8356 ({remainder} trailing bytes)")]
    Truncated { len: usize, remainder: usize },
}

impl RecordError {
    /// ファイル・メンバー情報を付けてパイプラインのエラーに変換
    pub fn at(self, path: &Path, member: &str) -> DataError {
        let actual = match self {
            RecordError::WrongSize(n) => n,
            RecordError::Truncated { len, .. } => len,
        };
        DataError::Format {
            path: path.to_path_buf(),
            detail: format!("member {member:?}: {self}"),
            expected: RECORD_SIZE as u64,
            actual: actual as u64,
        }
    }
}

/// 末尾の端数バイトの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingData {
    /// 端数があれば FormatError
    #[default]
    Reject,
    /// 端数は復号せずに捨てる
    Discard,
}

/// lc0 V6 学習レコード
#[derive(Debug, Clone, PartialEq)]
pub struct V6TrainingRecord {
    pub version: u32,
    pub input_format: u32,
    pub probabilities: Box<[f32; POLICY_SIZE]>,
    pub planes: [u64; NUM_INPUT_PLANES],
    pub castling_us_ooo: u8,
    pub castling_us_oo: u8,
    pub castling_them_ooo: u8,
    pub castling_them_oo: u8,
    pub side_to_move_or_enpassant: u8,
    pub rule50_count: u8,
    pub invariance_info: u8,
    pub dummy: u8,
    pub root_q: f32,
    pub best_q: f32,
    pub root_d: f32,
    pub best_d: f32,
    pub root_m: f32,
    pub best_m: f32,
    pub plies_left: f32,
    pub result_q: f32,
    pub result_d: f32,
    pub played_q: f32,
    pub played_d: f32,
    pub played_m: f32,
    pub orig_q: f32,
    pub orig_d: f32,
    pub orig_m: f32,
    pub visits: u32,
    pub played_idx: u16,
    pub best_idx: u16,
    pub policy_kld: f32,
    pub reserved: u32,
}

impl Default for V6TrainingRecord {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            input_format: SUPPORTED_INPUT_FORMAT,
            probabilities: Box::new([0.0; POLICY_SIZE]),
            planes: [0; NUM_INPUT_PLANES],
            castling_us_ooo: 0,
            castling_us_oo: 0,
            castling_them_ooo: 0,
            castling_them_oo: 0,
            side_to_move_or_enpassant: 0,
            rule50_count: 0,
            invariance_info: 0,
            dummy: 0,
            root_q: 0.0,
            best_q: 0.0,
            root_d: 0.0,
            best_d: 0.0,
            root_m: 0.0,
            best_m: 0.0,
            plies_left: 0.0,
            result_q: 0.0,
            result_d: 0.0,
            played_q: 0.0,
            played_d: 0.0,
            played_m: 0.0,
            orig_q: 0.0,
            orig_d: 0.0,
            orig_m: 0.0,
            visits: 0,
            played_idx: 0,
            best_idx: 0,
            policy_kld: 0.0,
            reserved: 0,
        }
    }
}

impl V6TrainingRecord {
    /// サイズ (バイト)
    pub const SIZE: usize = RECORD_SIZE;

    /// バイト列から1レコードを復号する（長さは厳密に [`RECORD_SIZE`]）
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != Self::SIZE {
            return Err(RecordError::WrongSize(bytes.len()));
        }

        let mut probabilities = Box::new([0.0f32; POLICY_SIZE]);
        LittleEndian::read_f32_into(&bytes[OFF_PROBABILITIES..OFF_PLANES], &mut probabilities[..]);

        let mut planes = [0u64; NUM_INPUT_PLANES];
        LittleEndian::read_u64_into(&bytes[OFF_PLANES..OFF_FLAGS], &mut planes);

        let mut evals = [0.0f32; NUM_EVALS];
        LittleEndian::read_f32_into(&bytes[OFF_EVALS..OFF_VISITS], &mut evals);
        let [
            root_q,
            best_q,
            root_d,
            best_d,
            root_m,
            best_m,
            plies_left,
            result_q,
            result_d,
            played_q,
            played_d,
            played_m,
            orig_q,
            orig_d,
            orig_m,
        ] = evals;

        Ok(Self {
            version: LittleEndian::read_u32(&bytes[OFF_VERSION..]),
            input_format: LittleEndian::read_u32(&bytes[OFF_INPUT_FORMAT..]),
            probabilities,
            planes,
            castling_us_ooo: bytes[OFF_CASTLING_US_OOO],
            castling_us_oo: bytes[OFF_CASTLING_US_OO],
            castling_them_ooo: bytes[OFF_CASTLING_THEM_OOO],
            castling_them_oo: bytes[OFF_CASTLING_THEM_OO],
            side_to_move_or_enpassant: bytes[OFF_SIDE_TO_MOVE],
            rule50_count: bytes[OFF_RULE50],
            invariance_info: bytes[OFF_INVARIANCE],
            dummy: bytes[OFF_DUMMY],
            root_q,
            best_q,
            root_d,
            best_d,
            root_m,
            best_m,
            plies_left,
            result_q,
            result_d,
            played_q,
            played_d,
            played_m,
            orig_q,
            orig_d,
            orig_m,
            visits: LittleEndian::read_u32(&bytes[OFF_VISITS..]),
            played_idx: LittleEndian::read_u16(&bytes[OFF_PLAYED_IDX..]),
            best_idx: LittleEndian::read_u16(&bytes[OFF_BEST_IDX..]),
            policy_kld: LittleEndian::read_f32(&bytes[OFF_POLICY_KLD..]),
            reserved: LittleEndian::read_u32(&bytes[OFF_RESERVED..]),
        })
    }

    /// レコードをバイト列に書き出す（出力先は厳密に [`RECORD_SIZE`]）
    pub fn write_to(&self, out: &mut [u8]) -> Result<(), RecordError> {
        if out.len() != Self::SIZE {
            return Err(RecordError::WrongSize(out.len()));
        }

        LittleEndian::write_u32(&mut out[OFF_VERSION..], self.version);
        LittleEndian::write_u32(&mut out[OFF_INPUT_FORMAT..], self.input_format);
        LittleEndian::write_f32_into(&self.probabilities[..], &mut out[OFF_PROBABILITIES..OFF_PLANES]);
        LittleEndian::write_u64_into(&self.planes, &mut out[OFF_PLANES..OFF_FLAGS]);
        out[OFF_CASTLING_US_OOO] = self.castling_us_ooo;
        out[OFF_CASTLING_US_OO] = self.castling_us_oo;
        out[OFF_CASTLING_THEM_OOO] = self.castling_them_ooo;
        out[OFF_CASTLING_THEM_OO] = self.castling_them_oo;
        out[OFF_SIDE_TO_MOVE] = self.side_to_move_or_enpassant;
        out[OFF_RULE50] = self.rule50_count;
        out[OFF_INVARIANCE] = self.invariance_info;
        out[OFF_DUMMY] = self.dummy;

        let evals = [
            self.root_q,
            self.best_q,
            self.root_d,
            self.best_d,
            self.root_m,
            self.best_m,
            self.plies_left,
            self.result_q,
            self.result_d,
            self.played_q,
            self.played_d,
            self.played_m,
            self.orig_q,
            self.orig_d,
            self.orig_m,
        ];
        LittleEndian::write_f32_into(&evals, &mut out[OFF_EVALS..OFF_VISITS]);

        LittleEndian::write_u32(&mut out[OFF_VISITS..], self.visits);
        LittleEndian::write_u16(&mut out[OFF_PLAYED_IDX..], self.played_idx);
        LittleEndian::write_u16(&mut out[OFF_BEST_IDX..], self.best_idx);
        LittleEndian::write_f32(&mut out[OFF_POLICY_KLD..], self.policy_kld);
        LittleEndian::write_u32(&mut out[OFF_RESERVED..], self.reserved);
        Ok(())
    }

    /// レコードをシリアライズ
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        // 長さは SIZE 固定なので失敗しない
        let _ = self.write_to(&mut bytes);
        bytes
    }

    /// 名前で評価値フィールドを引く（inspect 用）
    pub fn eval_fields(&self) -> [(&'static str, f32); NUM_EVALS] {
        let values = [
            self.root_q,
            self.best_q,
            self.root_d,
            self.best_d,
            self.root_m,
            self.best_m,
            self.plies_left,
            self.result_q,
            self.result_d,
            self.played_q,
            self.played_d,
            self.played_m,
            self.orig_q,
            self.orig_d,
            self.orig_m,
        ];
        std::array::from_fn(|i| (EVAL_FIELDS[i], values[i]))
    }
}

/// 展開済みストリームをレコード単位に分割するイテレータ
#[derive(Debug, Clone)]
pub struct RecordChunks<'a> {
    chunks: ChunksExact<'a, u8>,
    discarded: usize,
}

impl<'a> RecordChunks<'a> {
    /// 捨てた端数バイト数
    pub fn discarded_bytes(&self) -> usize {
        self.discarded
    }

    /// 残りレコード数
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl<'a> Iterator for RecordChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for RecordChunks<'_> {}

/// バイト列を固定長レコードのバッファ列に分割する
pub fn split_records(data: &[u8], trailing: TrailingData) -> Result<RecordChunks<'_>, RecordError> {
    let remainder = data.len() % RECORD_SIZE;
    if remainder != 0 && trailing == TrailingData::Reject {
        return Err(RecordError::Truncated {
            len: data.len(),
            remainder,
        });
    }
    Ok(RecordChunks {
        chunks: data.chunks_exact(RECORD_SIZE),
        discarded: remainder,
    })
}

/// ストリーム全体を復号する（長さはレコードサイズの倍数でなければならない）
pub fn decode_all(data: &[u8]) -> Result<Vec<V6TrainingRecord>, RecordError> {
    split_records(data, TrailingData::Reject)?.map(V6TrainingRecord::from_bytes).collect()
}

/// レコード列を連結したバイト列に符号化する
pub fn encode_all(records: &[V6TrainingRecord]) -> Vec<u8> {
    let mut out = vec![0u8; records.len() * RECORD_SIZE];
    for (record, chunk) in records.iter().zip(out.chunks_exact_mut(RECORD_SIZE)) {
        let _ = record.write_to(chunk);
    }
    out
}
