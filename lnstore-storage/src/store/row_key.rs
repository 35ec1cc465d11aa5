//! Table-scoped row keys for the LMDB store.
//!
//! # Binary Format
//!
//! `[table name bytes][0xFF][component]*`, where each component is
//!
//! - int: `0x01` then the value with its sign bit flipped, 8 bytes big-endian
//! - str: `0x02` then the UTF-8 bytes with `0x00` escaped as `0x00 0xFF`,
//!   terminated by `0x00 0x01`
//!
//! Components are self-delimiting and the encoding preserves order, so
//! byte order equals walk order and the encoding of a walk prefix is a byte
//! prefix of every walk beneath it. LMDB prefix scans therefore return a
//! subtree's rows in walk order.

use lnstore_core::{Key, Walk};

/// Separator between the table name and the walk. Table names are plain
/// ASCII identifiers and never contain it.
const SEPARATOR: u8 = 0xFF;

const TAG_INT: u8 = 0x01;
const TAG_STR: u8 = 0x02;

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Prefix shared by every row of `table`.
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(table.len() + 1);
    bytes.extend_from_slice(table.as_bytes());
    bytes.push(SEPARATOR);
    bytes
}

/// Encode a (possibly partial) walk of `table`.
pub fn encode(table: &str, walk: &[Key]) -> Vec<u8> {
    let mut bytes = table_prefix(table);
    for key in walk {
        encode_key(key, &mut bytes);
    }
    bytes
}

fn encode_key(key: &Key, out: &mut Vec<u8>) {
    match key {
        Key::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes());
        }
        Key::Str(s) => {
            out.push(TAG_STR);
            for &b in s.as_bytes() {
                out.push(b);
                if b == ESCAPE {
                    out.push(ESCAPED_NUL);
                }
            }
            out.push(ESCAPE);
            out.push(TERMINATOR);
        }
    }
}

/// Decode the walk part of a row key of `table`.
///
/// Returns `None` if the bytes do not belong to `table` or are truncated.
pub fn decode(table: &str, bytes: &[u8]) -> Option<Walk> {
    let prefix = table_prefix(table);
    let mut rest = bytes.strip_prefix(prefix.as_slice())?;
    let mut walk = Walk::new();
    while let Some((&tag, tail)) = rest.split_first() {
        match tag {
            TAG_INT => {
                let raw: [u8; 8] = tail.get(..8)?.try_into().ok()?;
                walk.push(Key::Int((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64));
                rest = &tail[8..];
            }
            TAG_STR => {
                let mut text = Vec::new();
                let mut i = 0;
                loop {
                    let b = *tail.get(i)?;
                    if b == ESCAPE {
                        match *tail.get(i + 1)? {
                            ESCAPED_NUL => text.push(ESCAPE),
                            TERMINATOR => break,
                            _ => return None,
                        }
                        i += 2;
                    } else {
                        text.push(b);
                        i += 1;
                    }
                }
                walk.push(Key::Str(String::from_utf8(text).ok()?));
                rest = &tail[i + 2..];
            }
            _ => return None,
        }
    }
    Some(walk)
}
