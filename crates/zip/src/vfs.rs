use std::io::Write;
use std::path::Path;

use ahash::AHashMap;
use crc::{CRC_32_ISO_HDLC, Crc};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use glob::{MatchOptions, Pattern};
use log::{debug, warn};

use crate::errors::ZipError;
use crate::structs::central_directory::{CentralDirectory, CentralDirectoryEntry};
use crate::structs::eocd::EndOfCentralDirectory;
use crate::structs::local_file_header::LocalFileHeader;

/// The CRC-32 algorithm used by the ZIP file format
pub const ZIP_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calculates the ZIP CRC-32 hash of a slice
pub fn crc_bytes(bytes: &[u8]) -> u32 {
    let mut digest = ZIP_CRC.digest();
    digest.update(bytes);
    digest.finalize()
}

/// General-purpose bit 3: sizes live in a trailing data descriptor.
/// Cleared on save because sizes are always written inline.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const MAX_PATH_LEN: usize = 4096;
const MAX_SEGMENT_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    fn from_code(code: u16) -> Option<CompressionMethod> {
        match code {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflated),
            _ => None,
        }
    }
}

/// One archive entry held in memory with the metadata needed to emit it
/// back the way it came in.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub data: Vec<u8>,
    pub original_size: u64,
    pub modified: bool,
    pub method: CompressionMethod,
    pub original_crc: u32,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub mtime: (u16, u16),

    version_made_by: u16,
    version_needed: u16,
    general_purpose: u16,
    internal_attrs: u16,
    external_attrs: u32,
}

impl VirtualFile {
    fn new(data: Vec<u8>, method: CompressionMethod) -> VirtualFile {
        let original_size = data.len() as u64;
        VirtualFile {
            data,
            original_size,
            modified: true,
            method,
            original_crc: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            mtime: (0, 0),
            version_made_by: 0,
            version_needed: 20,
            general_purpose: 0,
            internal_attrs: 0,
            external_attrs: 0,
        }
    }
}

/// Per-load size caps; entries above them are skipped with a warning.
#[derive(Debug, Clone, Copy)]
pub struct LoadLimits {
    pub max_entry_size: u64,
    pub max_total_size: u64,
}

impl Default for LoadLimits {
    fn default() -> Self {
        LoadLimits {
            max_entry_size: 100 * 1024 * 1024,
            max_total_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// In-memory view of a ZIP archive keyed by normalized entry path.
/// Saving enumerates entries in sorted path order so output is
/// deterministic for identical content.
#[derive(Debug, Default)]
pub struct VirtualFileSystem {
    files: AHashMap<String, VirtualFile>,
}

impl VirtualFileSystem {
    pub fn new() -> VirtualFileSystem {
        VirtualFileSystem::default()
    }

    pub fn from_path(path: &Path) -> Result<VirtualFileSystem, ZipError> {
        Self::from_path_with_limits(path, LoadLimits::default())
    }

    pub fn from_path_with_limits(
        path: &Path,
        limits: LoadLimits,
    ) -> Result<VirtualFileSystem, ZipError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data, limits)
    }

    pub fn from_bytes(input: &[u8], limits: LoadLimits) -> Result<VirtualFileSystem, ZipError> {
        // basic sanity check
        if !input.starts_with(b"PK\x03\x04") {
            return Err(ZipError::InvalidHeader);
        }

        let eocd_offset =
            EndOfCentralDirectory::find_eocd(input, 65536).ok_or(ZipError::NotFoundEOCD)?;
        let eocd = EndOfCentralDirectory::parse(&mut &input[eocd_offset..])
            .map_err(|_| ZipError::ParseError)?;
        let central_directory =
            CentralDirectory::parse(input, &eocd).map_err(|_| ZipError::ParseError)?;

        let mut files = AHashMap::with_capacity(central_directory.entries.len());
        let mut total: u64 = 0;

        for entry in &central_directory.entries {
            if entry.file_name.ends_with('/') {
                continue;
            }

            let name = match normalize_path(&entry.file_name) {
                Ok(name) => name,
                Err(err) => {
                    warn!("skipping entry with invalid path: {err}");
                    continue;
                }
            };

            if entry.uncompressed_size as u64 > limits.max_entry_size {
                warn!(
                    "skipping oversize entry {name:?} ({} bytes)",
                    entry.uncompressed_size
                );
                continue;
            }
            if total + entry.uncompressed_size as u64 > limits.max_total_size {
                warn!("skipping entry {name:?}, aggregate size limit reached");
                continue;
            }

            let method = match CompressionMethod::from_code(entry.compression_method) {
                Some(method) => method,
                None => {
                    warn!(
                        "skipping entry {name:?} with unsupported method {}",
                        entry.compression_method
                    );
                    continue;
                }
            };

            let data = match read_entry_data(input, entry, method) {
                Ok(data) => data,
                Err(err) => {
                    warn!("skipping unreadable entry {name:?}: {err}");
                    continue;
                }
            };

            total += data.len() as u64;

            files.insert(
                name,
                VirtualFile {
                    original_size: data.len() as u64,
                    data,
                    modified: false,
                    method,
                    original_crc: entry.crc32,
                    extra: entry.extra_field.clone(),
                    comment: entry.file_comment.clone(),
                    mtime: (entry.last_mod_time, entry.last_mod_date),
                    version_made_by: entry.version_made_by,
                    version_needed: entry.version_needed,
                    general_purpose: entry.general_purpose & !FLAG_DATA_DESCRIPTOR,
                    internal_attrs: entry.internal_attrs,
                    external_attrs: entry.external_attrs,
                },
            );
        }

        Ok(VirtualFileSystem { files })
    }

    #[inline]
    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|f| f.data.as_slice())
    }

    #[inline]
    pub fn file(&self, path: &str) -> Option<&VirtualFile> {
        self.files.get(path)
    }

    /// Replaces (or creates) an entry. New entries default to DEFLATE;
    /// existing entries keep their method and metadata.
    pub fn write(&mut self, path: &str, data: Vec<u8>) -> Result<(), ZipError> {
        let name = normalize_path(path)?;

        match self.files.get_mut(&name) {
            Some(file) => {
                file.data = data;
                file.modified = true;
            }
            None => {
                self.files
                    .insert(name, VirtualFile::new(data, CompressionMethod::Deflated));
            }
        }

        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    #[inline]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All entry paths in sorted order.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Paths of entries written since load, sorted.
    pub fn modified_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .files
            .iter()
            .filter(|(_, f)| f.modified)
            .map(|(name, _)| name.as_str())
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Sorted entry paths matching a glob pattern; `*` does not cross
    /// `/`, `**` does.
    pub fn list_by_pattern(&self, pattern: &str) -> Result<Vec<String>, ZipError> {
        let pattern =
            Pattern::new(pattern).map_err(|_| ZipError::InvalidPath(pattern.to_owned()))?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };

        let mut matches: Vec<String> = self
            .files
            .keys()
            .filter(|name| pattern.matches_with(name, options))
            .cloned()
            .collect();
        matches.sort_unstable();
        Ok(matches)
    }

    /// Serializes the archive. Every entry is re-emitted with its
    /// original method and metadata; CRCs and sizes are always written
    /// inline from the current data.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ZipError> {
        let mut out = Vec::new();
        let mut records: Vec<CentralDirectoryEntry> = Vec::with_capacity(self.files.len());

        for name in self.paths() {
            let file = &self.files[name];
            let local_header_offset = out.len() as u32;
            let crc32 = crc_bytes(&file.data);

            let payload = match file.method {
                CompressionMethod::Stored => std::borrow::Cow::from(&file.data),
                CompressionMethod::Deflated => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder
                        .write_all(&file.data)
                        .and_then(|_| encoder.finish())
                        .map(std::borrow::Cow::from)
                        .map_err(|_| ZipError::CompressionError(name.to_owned()))?
                }
            };

            LocalFileHeader {
                version_needed: file.version_needed,
                general_purpose_bit_flag: file.general_purpose,
                compression_method: file.method.code(),
                last_modification_time: file.mtime.0,
                last_modification_date: file.mtime.1,
                crc32,
                compressed_size: payload.len() as u32,
                uncompressed_size: file.data.len() as u32,
                file_name: name.as_bytes().to_vec(),
                extra_field: file.extra.clone(),
            }
            .write(&mut out);
            out.extend_from_slice(&payload);

            records.push(CentralDirectoryEntry {
                version_made_by: file.version_made_by,
                version_needed: file.version_needed,
                general_purpose: file.general_purpose,
                compression_method: file.method.code(),
                last_mod_time: file.mtime.0,
                last_mod_date: file.mtime.1,
                crc32,
                compressed_size: payload.len() as u32,
                uncompressed_size: file.data.len() as u32,
                disk_number_start: 0,
                internal_attrs: file.internal_attrs,
                external_attrs: file.external_attrs,
                local_header_offset,
                file_name: name.to_owned(),
                extra_field: file.extra.clone(),
                file_comment: file.comment.clone(),
            });
        }

        let central_dir_offset = out.len() as u32;
        for record in &records {
            record.write(&mut out);
        }
        let central_dir_size = out.len() as u32 - central_dir_offset;

        EndOfCentralDirectory {
            disk_number: 0,
            central_dir_start_disk: 0,
            entries_on_this_disk: records.len() as u16,
            total_entries: records.len() as u16,
            central_dir_size,
            central_dir_offset,
            comment: Vec::new(),
        }
        .write(&mut out);

        debug!("serialized {} entries, {} bytes", records.len(), out.len());
        Ok(out)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ZipError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn read_entry_data(
    input: &[u8],
    entry: &CentralDirectoryEntry,
    method: CompressionMethod,
) -> Result<Vec<u8>, ZipError> {
    let lfh = LocalFileHeader::parse(input, entry.local_header_offset as usize)
        .map_err(|_| ZipError::ParseError)?;

    // local sizes may be zeroed when data descriptors are in use, the
    // central directory values win in that case
    let (compressed_size, uncompressed_size) =
        if lfh.compressed_size == 0 || lfh.uncompressed_size == 0 {
            (
                entry.compressed_size as usize,
                entry.uncompressed_size as usize,
            )
        } else {
            (lfh.compressed_size as usize, lfh.uncompressed_size as usize)
        };

    let offset = entry.local_header_offset as usize + lfh.size();
    let get_slice =
        |start: usize, end: usize| input.get(start..end).ok_or(ZipError::EOF);

    match method {
        CompressionMethod::Stored => {
            Ok(get_slice(offset, offset + uncompressed_size)?.to_vec())
        }
        CompressionMethod::Deflated => {
            let compressed = get_slice(offset, offset + compressed_size)?;
            let mut uncompressed = Vec::with_capacity(uncompressed_size);
            let mut decompressor = Decompress::new(false);

            let status = decompressor
                .decompress_vec(compressed, &mut uncompressed, FlushDecompress::Finish)
                .map_err(|_| ZipError::DecompressionError(entry.file_name.clone()))?;

            match status {
                Status::Ok | Status::StreamEnd
                    if decompressor.total_in() == compressed.len() as u64 =>
                {
                    Ok(uncompressed)
                }
                _ => Err(ZipError::DecompressionError(entry.file_name.clone())),
            }
        }
    }
}

/// Normalizes an archive entry name into a canonical forward-slash path
/// that cannot escape the extraction root.
pub fn normalize_path(raw: &str) -> Result<String, ZipError> {
    if raw.len() > MAX_PATH_LEN {
        let head: String = raw.chars().take(64).collect();
        return Err(ZipError::InvalidPath(format!("{head}...")));
    }

    let translated = raw.replace('\\', "/");

    if translated
        .chars()
        .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
    {
        return Err(ZipError::InvalidPath(raw.to_owned()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in translated.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                // collapsing may never escape the root
                if segments.pop().is_none() {
                    return Err(ZipError::InvalidPath(raw.to_owned()));
                }
            }
            _ => {
                if segment.len() > MAX_SEGMENT_LEN {
                    return Err(ZipError::InvalidPath(raw.to_owned()));
                }
                segments.push(segment);
            }
        }
    }

    if segments.is_empty() {
        return Err(ZipError::InvalidPath(raw.to_owned()));
    }

    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vfs() -> VirtualFileSystem {
        let mut vfs = VirtualFileSystem::new();
        vfs.write("res/layout/activity_main.xml", b"<layout a>".to_vec())
            .unwrap();
        vfs.write("res/layout-v21/activity_main.xml", b"<layout b>".to_vec())
            .unwrap();
        vfs.write("AndroidManifest.xml", b"<manifest>".to_vec())
            .unwrap();
        vfs.write("kotlin/metadata.kotlin_builtins", b"\x00\x01".to_vec())
            .unwrap();
        vfs.write("resources.arsc", vec![0u8; 64]).unwrap();
        vfs
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_path("a\\b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_path("/lead/slash").unwrap(), "lead/slash");
        assert_eq!(normalize_path("./a//b/./c").unwrap(), "a/b/c");
        assert_eq!(normalize_path("a/x/../b").unwrap(), "a/b");

        assert!(normalize_path("../evil.txt").is_err());
        assert!(normalize_path("a/../../evil").is_err());
        assert!(normalize_path("nul\u{0}byte").is_err());
        assert!(normalize_path("pipe|char").is_err());
        assert!(normalize_path("q?mark").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path(&"x".repeat(MAX_PATH_LEN + 1)).is_err());
        assert!(normalize_path(&format!("{}/y", "s".repeat(MAX_SEGMENT_LEN + 1))).is_err());
    }

    #[test]
    fn save_and_reload_round_trips_contents_and_methods() {
        let vfs = sample_vfs();
        let bytes = vfs.to_bytes().unwrap();

        let reloaded = VirtualFileSystem::from_bytes(&bytes, LoadLimits::default()).unwrap();
        assert_eq!(reloaded.len(), vfs.len());
        assert_eq!(
            reloaded.read("res/layout/activity_main.xml").unwrap(),
            b"<layout a>"
        );
        assert_eq!(
            reloaded.file("resources.arsc").unwrap().method,
            CompressionMethod::Deflated
        );
        assert!(!reloaded.file("resources.arsc").unwrap().modified);
    }

    #[test]
    fn save_is_deterministic() {
        let vfs = sample_vfs();
        assert_eq!(vfs.to_bytes().unwrap(), vfs.to_bytes().unwrap());

        // insertion order must not leak into the output
        let mut other = VirtualFileSystem::new();
        for path in vfs.paths().iter().rev() {
            other.write(path, vfs.read(path).unwrap().to_vec()).unwrap();
        }
        assert_eq!(vfs.to_bytes().unwrap(), other.to_bytes().unwrap());
    }

    #[test]
    fn stored_entries_round_trip_with_recomputed_crc() {
        let vfs = sample_vfs();
        let bytes = vfs.to_bytes().unwrap();
        let mut reloaded = VirtualFileSystem::from_bytes(&bytes, LoadLimits::default()).unwrap();

        // flip one entry to stored and rewrite its contents
        {
            let file = reloaded.files.get_mut("resources.arsc").unwrap();
            file.method = CompressionMethod::Stored;
        }
        reloaded.write("resources.arsc", vec![7u8; 32]).unwrap();

        let bytes2 = reloaded.to_bytes().unwrap();
        let again = VirtualFileSystem::from_bytes(&bytes2, LoadLimits::default()).unwrap();
        let file = again.file("resources.arsc").unwrap();

        assert_eq!(file.method, CompressionMethod::Stored);
        assert_eq!(file.data, vec![7u8; 32]);
        assert_eq!(file.original_crc, crc_bytes(&file.data));
    }

    #[test]
    fn list_by_pattern_matches_resource_xml_only() {
        let vfs = sample_vfs();
        let matches = vfs.list_by_pattern("res/**/*.xml").unwrap();

        assert_eq!(
            matches,
            vec![
                "res/layout-v21/activity_main.xml".to_owned(),
                "res/layout/activity_main.xml".to_owned(),
            ]
        );
        assert!(!matches.contains(&"AndroidManifest.xml".to_owned()));
        assert!(!matches.contains(&"kotlin/metadata.kotlin_builtins".to_owned()));
    }

    #[test]
    fn hostile_entry_names_are_skipped_on_load() {
        // hand-assemble an archive with one good and one escaping entry
        let mut out = Vec::new();
        let mut records = Vec::new();

        for (name, data) in [("ok.txt", b"fine".as_slice()), ("../evil.txt", b"bad")] {
            let offset = out.len() as u32;
            let crc32 = crc_bytes(data);
            LocalFileHeader {
                version_needed: 20,
                general_purpose_bit_flag: 0,
                compression_method: 0,
                last_modification_time: 0,
                last_modification_date: 0,
                crc32,
                compressed_size: data.len() as u32,
                uncompressed_size: data.len() as u32,
                file_name: name.as_bytes().to_vec(),
                extra_field: Vec::new(),
            }
            .write(&mut out);
            out.extend_from_slice(data);

            records.push(CentralDirectoryEntry {
                version_made_by: 0,
                version_needed: 20,
                general_purpose: 0,
                compression_method: 0,
                last_mod_time: 0,
                last_mod_date: 0,
                crc32,
                compressed_size: data.len() as u32,
                uncompressed_size: data.len() as u32,
                disk_number_start: 0,
                internal_attrs: 0,
                external_attrs: 0,
                local_header_offset: offset,
                file_name: name.to_owned(),
                extra_field: Vec::new(),
                file_comment: Vec::new(),
            });
        }

        let cd_offset = out.len() as u32;
        for record in &records {
            record.write(&mut out);
        }
        let cd_size = out.len() as u32 - cd_offset;
        EndOfCentralDirectory {
            disk_number: 0,
            central_dir_start_disk: 0,
            entries_on_this_disk: 2,
            total_entries: 2,
            central_dir_size: cd_size,
            central_dir_offset: cd_offset,
            comment: Vec::new(),
        }
        .write(&mut out);

        let vfs = VirtualFileSystem::from_bytes(&out, LoadLimits::default()).unwrap();
        assert_eq!(vfs.len(), 1);
        assert!(vfs.contains("ok.txt"));
    }

    #[test]
    fn oversize_entries_are_skipped() {
        let vfs = sample_vfs();
        let bytes = vfs.to_bytes().unwrap();

        let limited = VirtualFileSystem::from_bytes(
            &bytes,
            LoadLimits {
                max_entry_size: 16,
                max_total_size: 1024,
            },
        )
        .unwrap();

        // the 64-byte resources.arsc is over the per-entry cap
        assert!(!limited.contains("resources.arsc"));
        assert!(limited.contains("AndroidManifest.xml"));
    }

    #[test]
    fn extra_and_comment_fields_survive_save() {
        let vfs = sample_vfs();
        let bytes = vfs.to_bytes().unwrap();
        let mut reloaded = VirtualFileSystem::from_bytes(&bytes, LoadLimits::default()).unwrap();

        {
            let file = reloaded.files.get_mut("AndroidManifest.xml").unwrap();
            file.comment = b"original comment".to_vec();
            file.mtime = (0x6b2d, 0x5a21);
        }

        let bytes2 = reloaded.to_bytes().unwrap();
        let again = VirtualFileSystem::from_bytes(&bytes2, LoadLimits::default()).unwrap();
        let file = again.file("AndroidManifest.xml").unwrap();

        assert_eq!(file.comment, b"original comment");
        assert_eq!(file.mtime, (0x6b2d, 0x5a21));
    }
}
