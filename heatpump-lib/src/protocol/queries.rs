//! Canned request frames, without checksum.

use super::{HeaderTag, SELECTOR_OFFSET};

pub const DATA_QUERY_SIZE: usize = 110;

const DATA_QUERY_HEAD: [u8; 4] = [HeaderTag::Data as u8, 0x6C, 0x01, 0x10];

pub const OPTIONAL_PCB_QUERY: [u8; 19] = [
    0xF1, 0x11, 0x01, 0x50, 0x00, 0x00, 0x40, 0xFF, 0xFF, 0xE5, 0xFF, 0xFF, 0x00, 0xFF, 0xEB, 0xFF,
    0xFF, 0x00, 0x00,
];

pub const INITIAL_QUERY: [u8; 7] = [0x31, 0x05, 0x10, 0x01, 0x00, 0x00, 0x00];

/// Data block request; `selector` picks the normal or the extended block.
pub fn data_query(selector: u8) -> Vec<u8> {
    let mut query = vec![0u8; DATA_QUERY_SIZE];
    query[..DATA_QUERY_HEAD.len()].copy_from_slice(&DATA_QUERY_HEAD);
    query[SELECTOR_OFFSET] = selector;
    query
}
