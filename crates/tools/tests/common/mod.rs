//! Common fixtures for CLI tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use lc0_data::V6TrainingRecord;
use lc0_data::features::{FeatureVector, store_features};
use lc0_data::move_index::move_to_idx;
use lc0_data::record::encode_all;

pub const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
pub const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";

pub fn record_for(board_fen: &str, best_move: &str, best_q: f32) -> V6TrainingRecord {
    let mut record = V6TrainingRecord::default();
    store_features(&mut record, &FeatureVector::from_board_fen(board_fen).expect("valid fen"));
    record.best_idx = move_to_idx(best_move).expect("move in policy table");
    record.played_idx = record.best_idx;
    record.best_q = best_q;
    record
}

/// Write a tar archive holding one gzip member per record group
pub fn write_archive(path: &Path, members: &[(&str, Vec<V6TrainingRecord>)]) {
    let mut builder = tar::Builder::new(File::create(path).expect("create tar"));
    for (name, records) in members {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&encode_all(records)).expect("gzip write");
        let data = enc.finish().expect("gzip finish");

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).expect("append member");
    }
    builder.finish().expect("finish tar");
}
