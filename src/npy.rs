//! Minimal `.npy` codec for little-endian float arrays.
//!
//! Only C-ordered `<f4`/`<f8` arrays are understood; everything is handed
//! back as `f32`. Writes always use format version 1.0 and `<f4`.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid npy data in {path}: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("Expected a {expected}-D array in {path}, found shape {shape:?}")]
    Rank {
        path: PathBuf,
        expected: usize,
        shape: Vec<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn width(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

/// Encode `values` laid out in C order with the given `shape`.
pub fn encode_f32(shape: &[usize], values: &[f32]) -> Vec<u8> {
    let shape_text = match shape {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(|dim| dim.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape_text}, }}");
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + values.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode an npy byte buffer into its shape and flat C-ordered values.
pub fn decode_f32(bytes: &[u8], origin: &Path) -> Result<(Vec<usize>, Vec<f32>), NpyError> {
    let format_err = |reason: String| NpyError::Format {
        path: origin.to_path_buf(),
        reason,
    };
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(format_err("missing NUMPY magic".to_string()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(format_err("truncated header length".to_string()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        other => return Err(format_err(format!("unsupported version {other}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| format_err("truncated header".to_string()))?;
    let header = std::str::from_utf8(header).map_err(|err| format_err(err.to_string()))?;
    let (dtype, fortran_order, shape) = parse_header(header).map_err(format_err)?;
    if fortran_order {
        return Err(format_err("fortran_order arrays are not supported".to_string()));
    }

    let count: usize = shape.iter().product();
    let payload = &bytes[data_start..];
    if payload.len() != count * dtype.width() {
        return Err(format_err(format!(
            "payload has {} bytes, shape {:?} needs {}",
            payload.len(),
            shape,
            count * dtype.width()
        )));
    }
    let values = match dtype {
        Dtype::F32 => payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        Dtype::F64 => payload
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw) as f32
            })
            .collect(),
    };
    Ok((shape, values))
}

fn parse_header(header: &str) -> Result<(Dtype, bool, Vec<usize>), String> {
    let descr = dict_value(header, "descr")?;
    let dtype = match descr.trim_matches(|c| c == '\'' || c == '"') {
        "<f4" => Dtype::F32,
        "<f8" => Dtype::F64,
        other => return Err(format!("unsupported dtype {other}")),
    };
    let fortran_order = match dict_value(header, "fortran_order")?.trim() {
        "False" => false,
        "True" => true,
        other => return Err(format!("bad fortran_order {other}")),
    };
    let shape_text = dict_value(header, "shape")?;
    let inner = shape_text
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("bad shape {shape_text}"))?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().map_err(|err| format!("bad shape {part}: {err}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((dtype, fortran_order, shape))
}

fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, String> {
    let quoted = format!("'{key}':");
    let start = header
        .find(&quoted)
        .map(|idx| idx + quoted.len())
        .ok_or_else(|| format!("header missing {key}"))?;
    let rest = &header[start..];
    let end = if rest.trim_start().starts_with('(') {
        rest.find(')').map(|idx| idx + 1)
    } else {
        rest.find(',')
    }
    .ok_or_else(|| format!("unterminated {key}"))?;
    Ok(rest[..end].trim())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, NpyError> {
    std::fs::read(path).map_err(|source| NpyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a 1-D array.
pub fn read_vector(path: &Path) -> Result<Vec<f32>, NpyError> {
    let (shape, values) = decode_f32(&read_bytes(path)?, path)?;
    if shape.len() != 1 {
        return Err(NpyError::Rank {
            path: path.to_path_buf(),
            expected: 1,
            shape,
        });
    }
    Ok(values)
}

/// Load a 2-D array.
pub fn read_matrix(path: &Path) -> Result<Array2<f32>, NpyError> {
    let (shape, values) = decode_f32(&read_bytes(path)?, path)?;
    if shape.len() != 2 {
        return Err(NpyError::Rank {
            path: path.to_path_buf(),
            expected: 2,
            shape,
        });
    }
    Array2::from_shape_vec((shape[0], shape[1]), values).map_err(|err| NpyError::Format {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Write a 1-D array.
pub fn write_vector(path: &Path, values: &[f32]) -> Result<(), NpyError> {
    write_bytes(path, &encode_f32(&[values.len()], values))
}

/// Write a 2-D array in C order.
pub fn write_matrix(path: &Path, matrix: ArrayView2<'_, f32>) -> Result<(), NpyError> {
    let flat: Vec<f32> = matrix.iter().copied().collect();
    write_bytes(path, &encode_f32(&[matrix.nrows(), matrix.ncols()], &flat))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), NpyError> {
    std::fs::write(path, bytes).map_err(|source| NpyError::Write {
        path: path.to_path_buf(),
        source,
    })
}
