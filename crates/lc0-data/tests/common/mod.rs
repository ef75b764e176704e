//! Shared fixtures for lc0-data integration tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use lc0_data::V6TrainingRecord;
use lc0_data::features::{FeatureVector, store_features};
use lc0_data::move_index::move_to_idx;

pub const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
pub const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";
pub const AFTER_D4: &str = "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR";

/// Build a record whose first 12 planes encode `board_fen`
pub fn record_for(board_fen: &str, best_move: &str, best_q: f32) -> V6TrainingRecord {
    let mut record = V6TrainingRecord::default();
    let features = FeatureVector::from_board_fen(board_fen).expect("valid board fen");
    store_features(&mut record, &features);
    record.best_idx = move_to_idx(best_move).expect("move in policy table");
    record.played_idx = record.best_idx;
    record.best_q = best_q;
    record
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("gzip write");
    enc.finish().expect("gzip finish")
}

/// Write a tar archive with the given (name, bytes) members
pub fn write_archive(path: &Path, members: &[(&str, Vec<u8>)]) {
    let mut builder = tar::Builder::new(File::create(path).expect("create tar"));
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).expect("append member");
    }
    builder.finish().expect("finish tar");
}
