//! Encoding and decoding of artifact archives.

use std::collections::HashMap;
use std::io::Read;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use drydock_manifest::{Manifest, Migration};
use drydock_manifest::migration::compute_checksum;

use crate::error::{ArtifactError, ArtifactResult};

/// In-archive path of the serialized manifest.
pub const MANIFEST_PATH: &str = "manifest.json";

/// File extension identifying migration files inside an archive.
pub const MIGRATION_EXTENSION: &str = ".sql";

/// A named file to be written into an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Relative in-archive path.
    pub path: String,
    /// Raw file content.
    pub content: Vec<u8>,
}

impl ArchiveFile {
    /// Create a new archive file.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Encode a file set plus its manifest into a single gzip'd tar blob.
///
/// Each file is written at its declared relative path; the manifest is
/// serialized as JSON at [`MANIFEST_PATH`].
pub fn encode(files: &[ArchiveFile], manifest: &Manifest) -> ArtifactResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for file in files {
        append_entry(&mut builder, &file.path, &file.content)?;
    }

    let manifest_json = serde_json::to_vec_pretty(manifest)?;
    append_entry(&mut builder, MANIFEST_PATH, &manifest_json)?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    content: &[u8],
) -> ArtifactResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    // A fixed mtime keeps encoding deterministic for identical inputs.
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, path, content)?;
    Ok(())
}

/// Decode an artifact back into its migrations, validating every file
/// against the manifest's declared checksums.
///
/// Entries present in the archive but not referenced by the manifest
/// are ignored. Manifest-listed migration files missing from the
/// archive are a fatal extraction error; a checksum mismatch is a fatal
/// error naming both checksums. The manifest is never mutated.
pub fn decode(bytes: &[u8], manifest: &Manifest) -> ArtifactResult<Vec<Migration>> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let mut contents: HashMap<String, Vec<u8>> = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if !path.ends_with(MIGRATION_EXTENSION) {
            continue;
        }
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        contents.insert(path, content);
    }

    let mut migrations = Vec::new();
    for file in &manifest.files {
        if !file.path.ends_with(MIGRATION_EXTENSION) {
            continue;
        }

        let content = contents.remove(&file.path).ok_or_else(|| {
            ArtifactError::Extraction(format!("'{}' missing from archive", file.path))
        })?;

        let actual = compute_checksum(&content);
        if actual != file.checksum {
            return Err(ArtifactError::Checksum {
                path: file.path.clone(),
                expected: file.checksum.clone(),
                actual,
            });
        }

        let sql = String::from_utf8(content).map_err(|_| ArtifactError::Utf8 {
            path: file.path.clone(),
        })?;

        migrations.push(Migration {
            path: file.path.clone(),
            sql,
            kind: file.kind,
            checksum: actual,
        });
    }

    Ok(migrations)
}
