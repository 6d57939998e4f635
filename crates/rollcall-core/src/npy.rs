//! Minimal NumPy `.npy` codec for 1-D float vectors.
//!
//! Embeddings are stored as `.npy` so an existing `faces/` directory written
//! with `numpy.save` can be served without conversion. Only what embeddings
//! need is supported: C-order float32/float64 arrays of any byte order whose
//! shape has a single non-unit dimension. Writing always produces
//! little-endian float32 (`<f4`), which round-trips exactly.

use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
/// Magic + version + header length field for format 1.0.
const PREAMBLE_V1: usize = 10;
/// Total header size (preamble + dict + padding) is a multiple of this.
const HEADER_ALIGN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NpyError {
    #[error("not a .npy file (bad magic)")]
    BadMagic,
    #[error("unsupported .npy format version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("truncated .npy data")]
    Truncated,
    #[error("malformed .npy header: {0}")]
    MalformedHeader(String),
    #[error("unsupported dtype {0:?}, expected float32 or float64")]
    UnsupportedDtype(String),
    #[error("array shape {0:?} is not a vector")]
    NotAVector(Vec<usize>),
    #[error("data length mismatch: header declares {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32Le,
    F32Be,
    F64Le,
    F64Be,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        match descr {
            "<f4" | "=f4" => Ok(Self::F32Le),
            ">f4" => Ok(Self::F32Be),
            "<f8" | "=f8" => Ok(Self::F64Le),
            ">f8" => Ok(Self::F64Be),
            other => Err(NpyError::UnsupportedDtype(other.to_string())),
        }
    }

    fn size(self) -> usize {
        match self {
            Self::F32Le | Self::F32Be => 4,
            Self::F64Le | Self::F64Be => 8,
        }
    }

    fn read(self, chunk: &[u8]) -> f32 {
        match self {
            Self::F32Le => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            Self::F32Be => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            Self::F64Le => f64::from_le_bytes(eight(chunk)) as f32,
            Self::F64Be => f64::from_be_bytes(eight(chunk)) as f32,
        }
    }
}

fn eight(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&chunk[..8]);
    out
}

/// Encode a vector as a format 1.0 `.npy` file with dtype `<f4`.
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // Pad with spaces so the data starts on an aligned offset; the header
    // is terminated by a newline.
    let unpadded = PREAMBLE_V1 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(PREAMBLE_V1 + header.len() + values.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a `.npy` vector into `f32` values. Float64 input is narrowed.
pub fn decode_f32(bytes: &[u8]) -> Result<Vec<f32>, NpyError> {
    if bytes.len() < PREAMBLE_V1 {
        return Err(NpyError::Truncated);
    }
    if &bytes[..6] != MAGIC {
        return Err(NpyError::BadMagic);
    }

    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, PREAMBLE_V1),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::Truncated);
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
            (len, 12)
        }
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };

    let data_start = header_start.checked_add(header_len).ok_or(NpyError::Truncated)?;
    let header_bytes = bytes.get(header_start..data_start).ok_or(NpyError::Truncated)?;
    let header = std::str::from_utf8(header_bytes)
        .map_err(|e| NpyError::MalformedHeader(format!("header is not text: {e}")))?;

    let descr = header_field(header, "descr")?;
    let dtype = Dtype::parse(descr.trim_matches(|c| c == '\'' || c == '"'))?;

    let fortran = header_field(header, "fortran_order")?;
    let shape = parse_shape(header_field(header, "shape")?)?;
    // Fortran order only changes layout for arrays with more than one
    // non-unit dimension, which are rejected below anyway.
    if fortran != "False" && fortran != "True" {
        return Err(NpyError::MalformedHeader(format!("fortran_order = {fortran}")));
    }
    if shape.iter().filter(|&&d| d != 1).count() > 1 {
        return Err(NpyError::NotAVector(shape));
    }

    let expected = shape
        .iter()
        .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| NpyError::MalformedHeader(format!("shape {shape:?} overflows")))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(NpyError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }

    Ok(data.chunks_exact(dtype.size()).map(|c| dtype.read(c)).collect())
}

/// Extract the raw value text for `key` from the header's Python dict literal.
fn header_field<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let missing = || NpyError::MalformedHeader(format!("missing '{key}'"));

    let needle = format!("'{key}'");
    let after_key = header
        .find(&needle)
        .map(|pos| &header[pos + needle.len()..])
        .ok_or_else(missing)?;
    let rest = after_key
        .trim_start()
        .strip_prefix(':')
        .ok_or_else(missing)?
        .trim_start();

    let end = match rest.chars().next() {
        Some('(') => rest.find(')').map(|i| i + 1),
        Some(q @ ('\'' | '"')) => rest[1..].find(q).map(|i| i + 2),
        Some(_) => rest.find([',', '}']),
        None => None,
    }
    .ok_or_else(|| NpyError::MalformedHeader(format!("unterminated value for '{key}'")))?;

    Ok(rest[..end].trim())
}

fn parse_shape(text: &str) -> Result<Vec<usize>, NpyError> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| NpyError::MalformedHeader(format!("shape {text:?}")))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| NpyError::MalformedHeader(format!("shape {text:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a file the way numpy would, with an arbitrary header dict.
    fn npy_with_header(dict: &str, data: &[u8]) -> Vec<u8> {
        let mut header = dict.to_string();
        header.push('\n');
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let values = vec![0.1f32, -0.25, 1.0e-7, f32::MIN_POSITIVE, 0.333_333_34];
        let decoded = decode_f32(&encode_f32(&values)).unwrap();
        assert_eq!(
            decoded.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            values.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_header_is_aligned() {
        let bytes = encode_f32(&[0.0; 512]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((PREAMBLE_V1 + header_len) % HEADER_ALIGN, 0);
        assert_eq!(bytes[PREAMBLE_V1 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), PREAMBLE_V1 + header_len + 512 * 4);
    }

    #[test]
    fn test_decode_float64_little_endian() {
        let data: Vec<u8> = [0.5f64, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let bytes = npy_with_header(
            "{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }",
            &data,
        );
        assert_eq!(decode_f32(&bytes).unwrap(), vec![0.5, -2.0]);
    }

    #[test]
    fn test_decode_row_vector_shape() {
        let data: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = npy_with_header(
            "{'descr': '>f4', 'fortran_order': False, 'shape': (1, 3), }",
            &data,
        );
        assert_eq!(decode_f32(&bytes).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_decode_rejects_matrix() {
        let bytes = npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 2), }",
            &[0u8; 16],
        );
        assert_eq!(decode_f32(&bytes), Err(NpyError::NotAVector(vec![2, 2])));
    }

    #[test]
    fn test_decode_rejects_integer_dtype() {
        let bytes = npy_with_header(
            "{'descr': '<i4', 'fortran_order': False, 'shape': (1,), }",
            &[0u8; 4],
        );
        assert_eq!(decode_f32(&bytes), Err(NpyError::UnsupportedDtype("<i4".into())));
    }

    #[test]
    fn test_decode_bad_magic() {
        assert_eq!(decode_f32(b"NOTNUMPY\x00\x00"), Err(NpyError::BadMagic));
    }

    #[test]
    fn test_decode_truncated_data() {
        let mut bytes = encode_f32(&[1.0, 2.0, 3.0]);
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(decode_f32(&bytes), Err(NpyError::LengthMismatch { expected: 12, .. })));
    }

    #[test]
    fn test_decode_rejects_overflowing_shape() {
        let bytes = npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4611686018427387904,), }",
            &[0u8; 8],
        );
        assert!(matches!(decode_f32(&bytes), Err(NpyError::MalformedHeader(_))));

        let bytes = npy_with_header(
            "{'descr': '<f8', 'fortran_order': False, 'shape': (18446744073709551615, 1), }",
            &[],
        );
        assert!(matches!(decode_f32(&bytes), Err(NpyError::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_truncated_header() {
        let bytes = encode_f32(&[1.0]);
        assert_eq!(decode_f32(&bytes[..20]), Err(NpyError::Truncated));
    }
}
