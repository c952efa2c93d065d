//! Binary persistence of a [`ModelCollection`].
//!
//! # Layout
//!
//! All integers and floats are little-endian, with no padding:
//!
//! ```text
//! magic        4 bytes   b"GMMS"
//! version      u32       currently 1
//! group_count  u64
//! components   u64       K
//! dimension    u64       D
//! then for each group, for each of its K components:
//!   weight     f64
//!   mean       D x f64
//!   covariance D*D x f64 (row-major)
//! ```
//!
//! Readers state the `K` and `D` they expect; a file trained with other values is
//! rejected instead of being reinterpreted.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::cluster::{GaussianComponent, GaussianMixtureModel, ModelCollection};
use crate::error::{Error, Result};

/// File signature.
pub const MAGIC: [u8; 4] = *b"GMMS";

/// Current layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Write `models` to `path`.
///
/// The bytes go to a temporary file next to `path`, which replaces `path` only once
/// everything has been flushed; a failed write leaves any existing file untouched.
pub fn write_models(path: impl AsRef<Path>, models: &ModelCollection) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write_to(&mut writer, models)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Load a collection from `path`, expecting `n_components` components of dimension `dim`.
pub fn load_models(
    path: impl AsRef<Path>,
    n_components: usize,
    dim: usize,
) -> Result<ModelCollection> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let models = read_from(&mut reader, n_components, dim)?;

    let mut trailing = [0u8; 1];
    if reader.read(&mut trailing)? != 0 {
        return Err(Error::Format("trailing bytes after the last model".to_string()));
    }
    Ok(models)
}

/// Serialize `models` into `writer`.
pub fn write_to<W: Write>(writer: &mut W, models: &ModelCollection) -> Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(models.len() as u64).to_le_bytes())?;
    writer.write_all(&(models.n_components() as u64).to_le_bytes())?;
    writer.write_all(&(models.dim() as u64).to_le_bytes())?;

    for model in models {
        for comp in model.components() {
            writer.write_all(&comp.weight.to_le_bytes())?;
            for v in comp.mean.iter().chain(&comp.covariance) {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

/// Deserialize a collection from `reader`, expecting `n_components` and `dim`.
///
/// A short read surfaces as [`Error::Io`] with kind `UnexpectedEof`; header
/// problems surface as [`Error::Format`].
pub fn read_from<R: Read>(
    reader: &mut R,
    n_components: usize,
    dim: usize,
) -> Result<ModelCollection> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(Error::Format(format!("bad magic {magic:?}")));
    }
    let version = read_u32(reader)?;
    if version != FORMAT_VERSION {
        return Err(Error::Format(format!(
            "unsupported version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let group_count = read_len(reader, "group count")?;
    let file_k = read_len(reader, "component count")?;
    let file_d = read_len(reader, "dimension")?;
    if file_k != n_components || file_d != dim {
        return Err(Error::Format(format!(
            "file holds k={file_k}, d={file_d}; expected k={n_components}, d={dim}"
        )));
    }

    // The group count is untrusted until the records are actually there.
    let mut models = Vec::with_capacity(group_count.min(1 << 16));
    for _ in 0..group_count {
        let mut components = Vec::with_capacity(n_components);
        for _ in 0..n_components {
            let weight = read_f64(reader)?;
            let mean = read_f64s(reader, dim)?;
            let covariance = read_f64s(reader, dim * dim)?;
            components.push(GaussianComponent {
                weight,
                mean,
                covariance,
            });
        }
        models.push(GaussianMixtureModel::new(components)?);
    }
    ModelCollection::new(n_components, dim, models)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    usize::try_from(u64::from_le_bytes(buf))
        .map_err(|_| Error::Format(format!("{what} does not fit in memory")))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_f64s<R: Read>(reader: &mut R, count: usize) -> Result<Vec<f64>> {
    (0..count).map(|_| read_f64(reader)).collect()
}

/// True when `err` reports a file that ended before its last record.
pub fn is_truncated(err: &Error) -> bool {
    matches!(err, Error::Io(io) if io.kind() == ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_collection() -> ModelCollection {
        let a = GaussianMixtureModel::new(vec![
            GaussianComponent::new(0.25, vec![1.0, -2.0], vec![1.5, 0.2, 0.2, 0.7]).unwrap(),
            GaussianComponent::new(0.75, vec![3.5, 4.0], vec![0.3, 0.0, 0.0, 0.9]).unwrap(),
        ])
        .unwrap();
        let empty = GaussianMixtureModel::empty(2, 2, 1e-6);
        ModelCollection::new(2, 2, vec![a, empty]).unwrap()
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmm.bin");
        let models = sample_collection();

        write_models(&path, &models).unwrap();
        let loaded = load_models(&path, 2, 2).unwrap();
        assert_eq!(loaded, models);
    }

    #[test]
    fn byte_length_matches_layout() {
        let mut buf = Vec::new();
        write_to(&mut buf, &sample_collection()).unwrap();
        let header = 4 + 4 + 3 * 8;
        let record = 8 * (1 + 2 + 4);
        assert_eq!(buf.len(), header + 2 * 2 * record);
        assert_eq!(&buf[..4], b"GMMS");
    }

    #[test]
    fn mismatched_shape_is_a_format_error() {
        let mut buf = Vec::new();
        write_to(&mut buf, &sample_collection()).unwrap();
        assert!(matches!(read_from(&mut buf.as_slice(), 3, 2), Err(Error::Format(_))));
        assert!(matches!(read_from(&mut buf.as_slice(), 2, 1), Err(Error::Format(_))));
    }

    #[test]
    fn bad_magic_and_version_are_format_errors() {
        let mut buf = Vec::new();
        write_to(&mut buf, &sample_collection()).unwrap();

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(read_from(&mut bad_magic.as_slice(), 2, 2), Err(Error::Format(_))));

        let mut bad_version = buf;
        bad_version[4] = 9;
        assert!(matches!(read_from(&mut bad_version.as_slice(), 2, 2), Err(Error::Format(_))));
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmm.bin");
        let mut buf = Vec::new();
        write_to(&mut buf, &sample_collection()).unwrap();
        std::fs::write(&path, &buf[..buf.len() - 5]).unwrap();

        let err = load_models(&path, 2, 2).unwrap_err();
        assert!(is_truncated(&err));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmm.bin");
        let mut buf = Vec::new();
        write_to(&mut buf, &sample_collection()).unwrap();
        buf.push(0);
        std::fs::write(&path, &buf).unwrap();
        assert!(matches!(load_models(&path, 2, 2), Err(Error::Format(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_models(dir.path().join("absent.bin"), 2, 2).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn failed_write_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmm.bin");
        let models = sample_collection();
        write_models(&path, &models).unwrap();

        // Writing into a directory that does not exist fails before touching `path`.
        let bad = dir.path().join("missing").join("gmm.bin");
        assert!(write_models(&bad, &models).is_err());
        assert_eq!(load_models(&path, 2, 2).unwrap(), models);
    }
}
