//! # Numeric Array Archives
//!
//! Binary responses carry several named arrays packed as a NumPy `.npz`
//! archive: a zip file whose entries are `.npy` arrays.
//!
//! ## `.npy` Layout
//!
//! ```text
//! [6 bytes: "\x93NUMPY"] [1: major] [1: minor]
//! [2 or 4 bytes LE: header length] [header: Python dict literal, space padded]
//! [data: shape.product() * itemsize bytes]
//! ```
//!
//! The header looks like
//! `{'descr': '<f8', 'fortran_order': False, 'shape': (12, 3), }`.
//! Every supported dtype is widened to `f64`; Fortran-ordered data is
//! reordered to row-major on load.

use glam::{DMat3, DVec3};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use crate::error::{Result, VixivError};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// A dense n-dimensional array widened to `f64`, stored row-major.
///
/// `data.len()` always equals the product of `shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Number of elements of `shape`, or a decode error if it overflows `usize`.
fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| VixivError::Decode(format!("shape {:?} is too large", shape)))
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(VixivError::Decode(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// An `n x 3` array from a list of points.
    pub fn from_points(points: &[DVec3]) -> Self {
        Self {
            shape: vec![points.len(), 3],
            data: points.iter().flat_map(|p| p.to_array()).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Build from nested JSON lists, e.g. `[[1, 2, 3], [4, 5, 6]]`.
    ///
    /// Ragged nesting and non-numeric leaves are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut shape = Vec::new();
        let mut cursor = value;
        while let Value::Array(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }

        // The shape only follows first elements; flattening checks the rest.
        element_count(&shape)?;
        let mut data = Vec::new();
        flatten_json(value, &shape, &mut data)?;
        Self::new(shape, data)
    }

    /// Interpret as a list of 3-vectors. Accepts `(n, 3)`, `(3,)` and an empty array.
    pub fn to_points(&self) -> Result<Vec<DVec3>> {
        match self.shape.as_slice() {
            [_, 3] | [3] => Ok(self
                .data
                .chunks_exact(3)
                .map(|c| DVec3::new(c[0], c[1], c[2]))
                .collect()),
            [0] | [0, _] => Ok(Vec::new()),
            other => Err(VixivError::Decode(format!(
                "expected an (n, 3) array, got shape {:?}",
                other
            ))),
        }
    }

    /// Interpret as a single 3-vector.
    pub fn to_vec3(&self) -> Result<DVec3> {
        match self.shape.as_slice() {
            [3] | [1, 3] | [3, 1] => Ok(DVec3::new(self.data[0], self.data[1], self.data[2])),
            other => Err(VixivError::Decode(format!(
                "expected a 3-vector, got shape {:?}",
                other
            ))),
        }
    }

    /// Interpret a row-major `(3, 3)` array as a matrix.
    pub fn to_mat3(&self) -> Result<DMat3> {
        if self.shape != [3, 3] {
            return Err(VixivError::Decode(format!(
                "expected a 3x3 matrix, got shape {:?}",
                self.shape
            )));
        }
        let d = &self.data;
        Ok(DMat3::from_cols_array_2d(&[[d[0], d[1], d[2]], [d[3], d[4], d[5]], [d[6], d[7], d[8]]]).transpose())
    }

    /// Interpret as `(n, 3)` non-negative integer indices.
    pub fn to_triangles(&self) -> Result<Vec<[u32; 3]>> {
        if !matches!(self.shape.as_slice(), [_, 3] | [0]) {
            return Err(VixivError::Decode(format!(
                "expected (n, 3) triangle indices, got shape {:?}",
                self.shape
            )));
        }
        self.data
            .chunks_exact(3)
            .map(|c| {
                let mut tri = [0u32; 3];
                for (slot, value) in tri.iter_mut().zip(c) {
                    if value.fract() != 0.0 || *value < 0.0 || *value > u32::MAX as f64 {
                        return Err(VixivError::Decode(format!(
                            "invalid triangle index {}",
                            value
                        )));
                    }
                    *slot = *value as u32;
                }
                Ok(tri)
            })
            .collect()
    }
}

fn flatten_json(value: &Value, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
    match (value, shape.split_first()) {
        (Value::Array(items), Some((&len, rest))) => {
            if items.len() != len {
                return Err(VixivError::Decode("ragged nested list".to_string()));
            }
            items.iter().try_for_each(|item| flatten_json(item, rest, out))
        }
        (Value::Number(n), None) => {
            let v = n
                .as_f64()
                .ok_or_else(|| VixivError::Decode(format!("number {} out of range", n)))?;
            out.push(v);
            Ok(())
        }
        (Value::Bool(b), None) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(())
        }
        _ => Err(VixivError::Decode(format!(
            "unexpected JSON value in numeric array: {}",
            value
        ))),
    }
}

// ============================================================================
// .npy DECODING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Signed,
    Unsigned,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    size: usize,
    big_endian: bool,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self> {
        let unsupported = || VixivError::Decode(format!("unsupported dtype `{}`", descr));
        let mut chars = descr.chars();
        let (big_endian, rest) = match chars.next() {
            Some('<') | Some('|') | Some('=') => (false, chars.as_str()),
            Some('>') => (true, chars.as_str()),
            _ => (false, descr),
        };
        let mut rest_chars = rest.chars();
        let kind = match rest_chars.next() {
            Some('f') => Kind::Float,
            Some('i') => Kind::Signed,
            Some('u') => Kind::Unsigned,
            Some('b') => Kind::Bool,
            _ => return Err(unsupported()),
        };
        let size: usize = rest_chars.as_str().parse().map_err(|_| unsupported())?;
        let valid = match kind {
            Kind::Float => matches!(size, 4 | 8),
            Kind::Signed | Kind::Unsigned => matches!(size, 1 | 2 | 4 | 8),
            Kind::Bool => size == 1,
        };
        if !valid {
            return Err(unsupported());
        }
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn read(&self, bytes: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        if self.big_endian {
            buf[8 - self.size..].copy_from_slice(bytes);
        } else {
            buf[..self.size].copy_from_slice(bytes);
        }
        let raw = |buf: [u8; 8]| {
            if self.big_endian {
                u64::from_be_bytes(buf)
            } else {
                u64::from_le_bytes(buf)
            }
        };
        match (self.kind, self.size) {
            (Kind::Float, 8) => f64::from_bits(raw(buf)),
            (Kind::Float, _) => {
                let bits = if self.big_endian {
                    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                } else {
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                };
                f32::from_bits(bits) as f64
            }
            (Kind::Unsigned, _) | (Kind::Bool, _) => raw(buf) as f64,
            (Kind::Signed, size) => {
                // sign-extend from `size` bytes
                let shift = 64 - 8 * size as u32;
                ((raw(buf) << shift) as i64 >> shift) as f64
            }
        }
    }
}

struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Extract the quoted or bare value following `'key':` in a header dict.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{}'", key);
    let start = header
        .find(&needle)
        .ok_or_else(|| VixivError::Decode(format!("npy header missing `{}`", key)))?;
    let after = header[start + needle.len()..].trim_start();
    let after = after
        .strip_prefix(':')
        .ok_or_else(|| VixivError::Decode("malformed npy header".to_string()))?
        .trim_start();
    let end = if let Some(stripped) = after.strip_prefix('\'') {
        return stripped
            .find('\'')
            .map(|i| &stripped[..i])
            .ok_or_else(|| VixivError::Decode("unterminated string in npy header".to_string()));
    } else if after.starts_with('(') {
        after
            .find(')')
            .map(|i| i + 1)
            .ok_or_else(|| VixivError::Decode("unterminated shape in npy header".to_string()))?
    } else {
        after.find([',', '}']).unwrap_or(after.len())
    };
    Ok(after[..end].trim())
}

fn parse_header(header: &str) -> Result<Header> {
    let dtype = Dtype::parse(header_value(header, "descr")?)?;
    let fortran_order = match header_value(header, "fortran_order")? {
        "True" => true,
        "False" => false,
        other => {
            return Err(VixivError::Decode(format!(
                "invalid fortran_order `{}`",
                other
            )))
        }
    };
    let shape = header_value(header, "shape")?
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| VixivError::Decode(format!("invalid dimension `{}`", s)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Decode a single `.npy` buffer.
pub fn read_npy(bytes: &[u8]) -> Result<NdArray> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(VixivError::Decode("not an npy array (bad magic)".to_string()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(VixivError::Decode("truncated npy header".to_string()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(VixivError::Decode(format!("unsupported npy version {}", v))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| VixivError::Decode("truncated npy header".to_string()))?;
    let header = std::str::from_utf8(header)
        .map_err(|_| VixivError::Decode("npy header is not text".to_string()))?;
    let Header {
        dtype,
        fortran_order,
        shape,
    } = parse_header(header)?;

    let count = element_count(&shape)?;
    let expected = count
        .checked_mul(dtype.size)
        .ok_or_else(|| VixivError::Decode(format!("shape {:?} is too large", shape)))?;
    let body = &bytes[data_start..];
    if body.len() < expected {
        return Err(VixivError::Decode(format!(
            "npy body has {} bytes, expected {}",
            body.len(),
            expected
        )));
    }
    let values: Vec<f64> = body
        .chunks_exact(dtype.size)
        .take(count)
        .map(|chunk| dtype.read(chunk))
        .collect();

    let data = if fortran_order && shape.len() > 1 {
        fortran_to_row_major(&values, &shape)
    } else {
        values
    };
    NdArray::new(shape, data)
}

fn fortran_to_row_major(values: &[f64], shape: &[usize]) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    let mut index = vec![0usize; shape.len()];
    for (row_major, slot) in out.iter_mut().enumerate() {
        let mut rem = row_major;
        for axis in (0..shape.len()).rev() {
            index[axis] = rem % shape[axis];
            rem /= shape[axis];
        }
        let mut col_major = 0;
        let mut stride = 1;
        for axis in 0..shape.len() {
            col_major += index[axis] * stride;
            stride *= shape[axis];
        }
        *slot = values[col_major];
    }
    out
}

/// Decode every entry of an `.npz` archive, keyed by name without the `.npy` suffix.
pub fn read_npz(bytes: &[u8]) -> Result<BTreeMap<String, NdArray>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut arrays = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().trim_end_matches(".npy").to_string();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        let array = read_npy(&buf)
            .map_err(|e| VixivError::Decode(format!("array `{}`: {}", name, e)))?;
        arrays.insert(name, array);
    }
    Ok(arrays)
}

/// Remove `name` from a decoded archive or fail with a decode error.
pub fn take_array(arrays: &mut BTreeMap<String, NdArray>, name: &str) -> Result<NdArray> {
    arrays
        .remove(name)
        .ok_or_else(|| VixivError::Decode(format!("archive has no `{}` array", name)))
}

// ============================================================================
// ENCODING
// ============================================================================

/// Encode an array as a little-endian `f8` `.npy` buffer (format 1.0).
pub fn write_npy(array: &NdArray) -> Vec<u8> {
    let shape = match array.shape.as_slice() {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        shape
    );
    // magic + version + length + header + newline is padded to a multiple of 64
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + array.data.len() * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in &array.data {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Pack named arrays into an uncompressed `.npz` archive.
pub fn write_npz<'a>(arrays: impl IntoIterator<Item = (&'a str, &'a NdArray)>) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, array) in arrays {
        writer.start_file(format!("{}.npy", name), options)?;
        writer.write_all(&write_npy(array))?;
    }
    Ok(writer.finish()?.into_inner())
}
