//! NumPy `.npy` v1.0 codec for `[rows, dim]` little-endian float32 matrices.
//!
//! Layout: magic `\x93NUMPY`, version `1.0`, u16 LE header length, a Python
//! dict literal padded with spaces so the data starts on a 64-byte boundary,
//! then the raw row-major floats.

use std::io::{self, Read, Write};
use std::sync::OnceLock;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use regex::Regex;
use thiserror::Error;

use super::VectorMatrix;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("not an npy file")]
    BadMagic,
    #[error("unsupported npy version {0}.{1}")]
    Version(u8, u8),
    #[error("unsupported header: {0}")]
    Header(String),
    #[error("data holds {found} bytes, shape ({rows}, {dim}) needs {expected:?}")]
    DataLength {
        rows: usize,
        dim: usize,
        expected: Option<usize>,
        found: usize,
    },
    #[error("truncated data: {0}")]
    Io(#[from] io::Error),
}

fn header_text(rows: usize, dim: usize) -> Vec<u8> {
    let dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {dim}), }}");
    // magic + version + length prefix + dict + trailing newline
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    let mut header = dict.into_bytes();
    header.extend(std::iter::repeat(b' ').take(padding));
    header.push(b'\n');
    header
}

pub fn write_npy<W: Write>(mut writer: W, matrix: &VectorMatrix) -> io::Result<()> {
    let header = header_text(matrix.len(), matrix.dim());
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_u16::<LittleEndian>(header.len() as u16)?;
    writer.write_all(&header)?;
    for &value in matrix.as_flat() {
        writer.write_f32::<LittleEndian>(value)?;
    }
    writer.flush()
}

fn shape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"'shape':\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)").expect("valid shape regex")
    })
}

pub fn read_npy<R: Read>(mut reader: R) -> Result<VectorMatrix, NpyError> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let major = reader.read_u8()?;
    let minor = reader.read_u8()?;
    if major != 1 {
        return Err(NpyError::Version(major, minor));
    }

    let header_len = reader.read_u16::<LittleEndian>()? as usize;
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    if !header.contains("'descr': '<f4'") {
        return Err(NpyError::Header(format!("expected '<f4' in {}", header.trim())));
    }
    if header.contains("'fortran_order': True") {
        return Err(NpyError::Header("fortran order".to_string()));
    }
    let caps = shape_regex()
        .captures(&header)
        .ok_or_else(|| NpyError::Header(format!("expected 2-d shape in {}", header.trim())))?;
    let rows: usize = caps[1]
        .parse()
        .map_err(|_| NpyError::Header(format!("bad row count {}", &caps[1])))?;
    let dim: usize = caps[2]
        .parse()
        .map_err(|_| NpyError::Header(format!("bad dimension {}", &caps[2])))?;

    // the header is untrusted; size the buffer from the bytes actually present
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let expected = rows
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()));
    if expected != Some(raw.len()) {
        return Err(NpyError::DataLength {
            rows,
            dim,
            expected,
            found: raw.len(),
        });
    }
    let mut data = vec![0f32; raw.len() / std::mem::size_of::<f32>()];
    LittleEndian::read_f32_into(&raw, &mut data);

    VectorMatrix::from_flat(dim, data).map_err(|e| NpyError::Header(e.to_string()))
}
