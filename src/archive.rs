//! Streaming extraction of release archives
//!
//! A staged release ships its worker images as one large tar-gzip bundle. [`ArchiveExtractor`]
//! downloads it and unpacks entry by entry, so the whole archive is never held in memory.
//!
//! Extraction is not resumable. A failure part-way through leaves whatever was already
//! written; re-running starts from the first entry again and overwrites existing files.

use crate::error::ExtractError;
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tar::{Archive, EntryType};
use tracing::{debug, info};

/// Kind of an archive entry we know how to materialise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
}

/// One entry as read from the tar header; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub size_bytes: u64,
}

/// What an extraction produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Anything able to materialise an archive URL into a local directory
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source_url: &str, dest_dir: &Path) -> Result<ExtractSummary, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    connect_timeout: Duration,
    download_timeout: Duration,
    clean_destination: bool,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(2 * 60 * 60),
            clean_destination: false,
        }
    }
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Upper bound for the whole download, body included
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Remove the destination directory before unpacking
    pub fn with_clean_destination(mut self, clean: bool) -> Self {
        self.clean_destination = clean;
        self
    }

    fn extract_blocking(&self, source_url: &str, dest_dir: &Path) -> Result<ExtractSummary, ExtractError> {
        if self.clean_destination && dest_dir.exists() {
            debug!(path = %dest_dir.display(), "removing previous extraction");
            fs::remove_dir_all(dest_dir).map_err(|e| ExtractError::io(dest_dir, e))?;
        }
        fs::create_dir_all(dest_dir).map_err(|e| ExtractError::io(dest_dir, e))?;

        let fetch_failed = |message: String| ExtractError::FetchFailed {
            url: source_url.to_string(),
            message,
        };

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.download_timeout)
            .build()
            .map_err(|e| fetch_failed(format!("failed to create HTTP client: {}", e)))?;

        let response = client
            .get(source_url)
            .send()
            .map_err(|e| fetch_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failed(format!("server responded with status {}", status)));
        }

        info!(
            url = source_url,
            content_length = ?response.content_length(),
            "streaming archive"
        );
        unpack_stream(response, dest_dir)
    }
}

#[async_trait]
impl Extractor for ArchiveExtractor {
    async fn extract(&self, source_url: &str, dest_dir: &Path) -> Result<ExtractSummary, ExtractError> {
        let this = self.clone();
        let url = source_url.to_string();
        let dest = dest_dir.to_path_buf();

        tokio::task::spawn_blocking(move || this.extract_blocking(&url, &dest))
            .await
            .map_err(|e| ExtractError::Io {
                path: dest_dir.to_path_buf(),
                message: format!("extraction task failed: {}", e),
            })?
    }
}

/// Check for the gzip magic number (0x1f 0x8b)
pub fn is_gzipped(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Unpack a tar-gzip byte stream into `dest_dir`.
///
/// Every gzip member of the stream is decoded, so concatenated bundles unpack in full.
/// Only directories and regular files are accepted; any other entry kind aborts the
/// extraction with [`ExtractError::UnsupportedEntry`].
pub fn unpack_stream<R: Read>(mut reader: R, dest_dir: &Path) -> Result<ExtractSummary, ExtractError> {
    // A single read may return fewer bytes than the magic number
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        match reader.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(read_error(e)),
        }
    }
    if !is_gzipped(&magic[..filled]) {
        return Err(ExtractError::BadCompression(
            "stream does not start with the gzip magic number".to_string(),
        ));
    }

    let mut archive = Archive::new(MultiGzDecoder::new((&magic[..filled]).chain(reader)));
    let mut summary = ExtractSummary::default();
    // Directory modes are applied last so read-only directories can still be filled
    let mut directory_modes: Vec<(PathBuf, u32)> = Vec::new();

    for entry in archive.entries().map_err(read_error)? {
        let mut entry = entry.map_err(read_error)?;
        let info = describe_entry(&entry)?;
        let target = resolve_target(dest_dir, &info.relative_path)?;

        match info.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                apply_mode(&target, info.mode | 0o700)?;
                directory_modes.push((target, info.mode));
                summary.directories += 1;
            }
            EntryKind::RegularFile => {
                let written = write_file(&mut entry, &target, &info)?;
                summary.files += 1;
                summary.bytes += written;
            }
        }
        debug!(path = %info.relative_path.display(), kind = ?info.kind, size = info.size_bytes, "extracted entry");
    }

    for (path, mode) in directory_modes.iter().rev() {
        apply_mode(path, *mode)?;
    }

    Ok(summary)
}

fn describe_entry<R: Read>(entry: &tar::Entry<'_, R>) -> Result<ArchiveEntry, ExtractError> {
    let header = entry.header();
    let relative_path = entry
        .path()
        .map_err(|e| ExtractError::Archive(format!("failed to read entry path: {}", e)))?
        .into_owned();

    let kind = match header.entry_type() {
        EntryType::Directory => EntryKind::Directory,
        EntryType::Regular => EntryKind::RegularFile,
        other => {
            return Err(ExtractError::UnsupportedEntry {
                kind: format!("{:?}", other),
                path: relative_path.display().to_string(),
            });
        }
    };

    let mode = header
        .mode()
        .map_err(|e| ExtractError::Archive(format!("failed to read entry mode: {}", e)))?
        & 0o7777;
    let size_bytes = header
        .size()
        .map_err(|e| ExtractError::Archive(format!("failed to read entry size: {}", e)))?;

    Ok(ArchiveEntry {
        relative_path,
        kind,
        mode,
        size_bytes,
    })
}

/// Join an entry path onto the destination, refusing anything that would escape it
fn resolve_target(dest_dir: &Path, relative: &Path) -> Result<PathBuf, ExtractError> {
    let mut target = dest_dir.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::UnsafePath(relative.display().to_string()));
            }
        }
    }
    Ok(target)
}

fn write_file<R: Read>(entry: &mut R, target: &Path, info: &ArchiveEntry) -> Result<u64, ExtractError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
    }

    // A read-only file from an earlier run cannot be opened for writing
    if let Ok(existing) = fs::symlink_metadata(target) {
        if existing.is_file() && existing.permissions().readonly() {
            fs::remove_file(target).map_err(|e| ExtractError::io(target, e))?;
        }
    }

    let mut file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)
        .map_err(|e| ExtractError::io(target, e))?;

    let written = io::copy(entry, &mut file).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidInput => ExtractError::BadCompression(e.to_string()),
        _ => ExtractError::io(target, e),
    })?;
    drop(file);

    if written != info.size_bytes {
        return Err(ExtractError::Archive(format!(
            "entry {} is truncated: expected {} bytes, got {}",
            info.relative_path.display(),
            info.size_bytes,
            written
        )));
    }

    apply_mode(target, info.mode)?;
    Ok(written)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| ExtractError::io(path, e))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<(), ExtractError> {
    Ok(())
}

/// flate2 reports corrupt deflate data as `InvalidInput`; everything else is the tar layer
/// or the underlying stream.
fn read_error(err: io::Error) -> ExtractError {
    match err.kind() {
        io::ErrorKind::InvalidInput => ExtractError::BadCompression(err.to_string()),
        _ => ExtractError::Archive(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};

    fn gzip_tar(build: impl FnOnce(&mut Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        build(&mut builder);
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        io::Write::write_all(&mut encoder, &tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn file_header(size: u64, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(mode);
        header
    }

    #[test]
    fn test_is_gzipped() {
        assert!(is_gzipped(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzipped(b"ustar"));
        assert!(!is_gzipped(&[0x1f]));
    }

    #[test]
    fn test_resolve_target_rejects_escape() {
        let dest = Path::new("/tmp/extract");
        assert_eq!(
            resolve_target(dest, Path::new("./images/app.tar")).unwrap(),
            PathBuf::from("/tmp/extract/images/app.tar")
        );
        assert!(matches!(
            resolve_target(dest, Path::new("../etc/passwd")),
            Err(ExtractError::UnsafePath(_))
        ));
        assert!(matches!(
            resolve_target(dest, Path::new("/etc/passwd")),
            Err(ExtractError::UnsafePath(_))
        ));
    }

    #[test]
    fn test_plain_tar_is_bad_compression() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Builder::new(Vec::new());
        let data = b"hello";
        builder
            .append_data(&mut file_header(data.len() as u64, 0o644), "hello.txt", &data[..])
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let err = unpack_stream(&tar_bytes[..], dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::BadCompression(_)));
    }

    #[test]
    fn test_empty_stream_is_bad_compression() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack_stream(io::empty(), dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::BadCompression(_)));
    }

    #[test]
    fn test_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("image.tar"), b"stale content from a previous run").unwrap();

        let archive = gzip_tar(|builder| {
            let data = b"fresh";
            builder
                .append_data(&mut file_header(data.len() as u64, 0o644), "image.tar", &data[..])
                .unwrap();
        });

        let summary = unpack_stream(&archive[..], dir.path()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(fs::read(dir.path().join("image.tar")).unwrap(), b"fresh");
    }

    #[test]
    fn test_symlink_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = gzip_tar(|builder| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "images/latest", "app.tar")
                .unwrap();
        });

        let err = unpack_stream(&archive[..], dir.path()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::UnsupportedEntry {
                kind: "Symlink".to_string(),
                path: "images/latest".to_string(),
            }
        );
    }

    /// Hands out at most one byte per read, like a slow chunked response
    struct Trickle<'a>(&'a [u8]);

    impl<'a> Read for Trickle<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data: &'a [u8] = self.0;
            match (data.split_first(), buf.first_mut()) {
                (Some((byte, rest)), Some(slot)) => {
                    *slot = *byte;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    fn single_file_archive(path: &str, data: &[u8], mode: u32) -> Vec<u8> {
        gzip_tar(|builder| {
            builder
                .append_data(&mut file_header(data.len() as u64, mode), path, data)
                .unwrap();
        })
    }

    #[test]
    fn test_one_byte_reads_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = single_file_archive("images/app.tar", b"layers", 0o644);

        let summary = unpack_stream(Trickle(&archive), dir.path()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(fs::read(dir.path().join("images/app.tar")).unwrap(), b"layers");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directory_is_filled_before_mode_applies() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = gzip_tar(|builder| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o555);
            builder.append_data(&mut header, "images", io::empty()).unwrap();

            let data = b"worker layers";
            builder
                .append_data(&mut file_header(data.len() as u64, 0o444), "images/img.tar", &data[..])
                .unwrap();
        });

        let summary = unpack_stream(&archive[..], dir.path()).unwrap();
        assert_eq!(summary.files, 1);
        let images = dir.path().join("images");
        assert_eq!(fs::read(images.join("img.tar")).unwrap(), b"worker layers");
        assert_eq!(fs::metadata(&images).unwrap().permissions().mode() & 0o7777, 0o555);

        // Same bundle again over the read-only tree
        unpack_stream(&archive[..], dir.path()).unwrap();
        assert_eq!(fs::metadata(&images).unwrap().permissions().mode() & 0o7777, 0o555);

        fs::set_permissions(&images, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_overwrites_read_only_file_from_previous_run() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("image.tar");
        fs::write(&target, b"previous release").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o444)).unwrap();

        unpack_stream(&single_file_archive("image.tar", b"current", 0o444)[..], dir.path()).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"current");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o7777, 0o444);
    }
}
