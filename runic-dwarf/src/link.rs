//! Opening sessions from files, following debug links when the object
//! itself was stripped.
//!
//! If the opened object has no `.debug_info`, the resolver looks for a
//! companion debug file: by GNU build id under the `.build-id` directory
//! layout, by `.gnu_debuglink` filename (CRC-checked) in the conventional
//! search directories, or in the sibling dSYM bundle for Mach-O. A
//! companion that fails its identity check is treated as absent, never as
//! an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runic_common::{AsSelf, ByteView, FileFormat};

use crate::error::{Error, ErrorKind, Result};
use crate::object::Object;
use crate::registry::GroupChoice;
use crate::session::DwarfSession;

/// How the opened path was arrived at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathSource {
    /// The path the caller passed in.
    Original,
    /// Found via the `.gnu_debuglink` filename and CRC.
    DebugLink,
    /// Found via the GNU build id directory layout.
    BuildId,
    /// Found in the sibling `.dSYM` bundle.
    Dsym,
}

/// The path that was actually opened, and how it was found.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    /// The filesystem path of the opened object.
    pub path: PathBuf,
    /// How the path was found.
    pub source: PathSource,
}

/// Options for [`FileSession::open`].
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Which section group to expose.
    pub group: GroupChoice,
    /// Extra directories to search for companion debug files, tried after
    /// the conventional ones (the object's directory, its `.debug`
    /// subdirectory, and `/usr/lib/debug`).
    pub debug_search_paths: Vec<PathBuf>,
    /// Whether to require the debuglink CRC to match. On by default;
    /// disable only for intentionally edited debug files.
    pub verify_crc: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            group: GroupChoice::Any,
            debug_search_paths: Vec::new(),
            verify_crc: true,
        }
    }
}

/// A parsed `.gnu_debuglink` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugLink<'data> {
    /// The companion file name, without directory components.
    pub filename: &'data [u8],
    /// CRC32 of the companion file's contents.
    pub crc: u32,
}

impl<'data> DebugLink<'data> {
    /// Parses the section contents: a NUL-terminated filename, padding to
    /// a four-byte boundary, and a four-byte CRC in the object's byte
    /// order.
    pub fn parse(data: &'data [u8], endian: runic_common::Endian) -> Result<Self> {
        let nul = data
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| Error::new(ErrorKind::Truncated, "debuglink filename unterminated"))?;
        let filename = &data[..nul];

        let crc = data
            .get(data.len().saturating_sub(4)..)
            .filter(|crc| crc.len() == 4 && nul + 1 + 4 <= data.len())
            .ok_or_else(|| Error::new(ErrorKind::Truncated, "debuglink CRC missing"))?;
        let crc: [u8; 4] = crc.try_into().unwrap();

        let crc = match endian {
            runic_common::Endian::Little => u32::from_le_bytes(crc),
            runic_common::Endian::Big => u32::from_be_bytes(crc),
        };

        Ok(DebugLink { filename, crc })
    }
}

/// CRC32 (IEEE) of a byte buffer, as used by `.gnu_debuglink`.
pub(crate) fn debuglink_crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// The conventional search directories for a companion of `object_path`.
fn search_directories(object_path: &Path, options: &OpenOptions) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let object_dir = object_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    dirs.push(object_dir.clone());
    dirs.push(object_dir.join(".debug"));
    let global = Path::new("/usr/lib/debug");
    match object_dir.strip_prefix("/") {
        Ok(relative) => dirs.push(global.join(relative)),
        Err(_) => dirs.push(global.to_path_buf()),
    }
    dirs.extend(options.debug_search_paths.iter().cloned());
    dirs
}

/// Finds a companion debug file for an object without debug info.
///
/// Returns `None` when nothing suitable (and verifiable) exists.
pub fn find_debug_file(
    object: &Object<'_>,
    object_path: &Path,
    options: &OpenOptions,
) -> Option<ResolvedPath> {
    // Build id first: it is the strongest identity.
    if let Some(code_id) = object.code_id() {
        let hex = code_id.to_string();
        if hex.len() > 2 {
            let (prefix, rest) = hex.split_at(2);
            let tail = PathBuf::from(".build-id")
                .join(prefix)
                .join(format!("{rest}.debug"));

            let mut roots = vec![PathBuf::from("/usr/lib/debug")];
            roots.extend(options.debug_search_paths.iter().cloned());

            for root in roots {
                let candidate = root.join(&tail);
                if verify_companion_id(&candidate, object) {
                    return Some(ResolvedPath {
                        path: candidate,
                        source: PathSource::BuildId,
                    });
                }
            }
        }
    }

    // Mach-O: the dSYM bundle next to the binary.
    if object.file_format() == FileFormat::MachO {
        if let Some(filename) = object_path.file_name() {
            let mut bundle = object_path.as_os_str().to_owned();
            bundle.push(".dSYM");
            let candidate = PathBuf::from(bundle)
                .join("Contents/Resources/DWARF")
                .join(filename);
            if verify_companion_id(&candidate, object) {
                return Some(ResolvedPath {
                    path: candidate,
                    source: PathSource::Dsym,
                });
            }
        }
    }

    // GNU debuglink with CRC verification.
    if let Some(link_data) = object.debug_link_data() {
        if let Ok(link) = DebugLink::parse(link_data, object.endian()) {
            let filename = PathBuf::from(String::from_utf8_lossy(link.filename).into_owned());
            for dir in search_directories(object_path, options) {
                let candidate = dir.join(&filename);
                let Ok(view) = ByteView::open(&candidate) else {
                    continue;
                };
                if options.verify_crc && debuglink_crc32(&view) != link.crc {
                    continue;
                }
                return Some(ResolvedPath {
                    path: candidate,
                    source: PathSource::DebugLink,
                });
            }
        }
    }

    None
}

/// Opens a candidate and checks that its identity matches the original.
fn verify_companion_id(candidate: &Path, original: &Object<'_>) -> bool {
    let Ok(view) = ByteView::open(candidate) else {
        return false;
    };
    let Ok(companion) = Object::parse(&view) else {
        return false;
    };
    match (original.code_id(), companion.code_id()) {
        (Some(original_id), Some(companion_id)) => original_id == companion_id,
        // Without an identity on either side there is nothing to verify;
        // reject rather than guess.
        _ => false,
    }
}

struct FileInner<'data> {
    object: Object<'data>,
    dwarf: DwarfSession<'data>,
}

impl<'slf> AsSelf<'slf> for FileInner<'_> {
    type Ref = FileInner<'slf>;

    fn as_self(&'slf self) -> &Self::Ref {
        // The session uses interior mutability only for caches keyed by
        // plain offsets; nothing of the narrowed lifetime is ever stored
        // back, so the coercion is sound.
        unsafe { std::mem::transmute(self) }
    }
}

/// A session opened from a path, owning its backing buffer.
///
/// This is the path form of session construction: the file is mapped, the
/// container detected, debug links followed, and the session built over
/// the winning file, all bundled into one movable, droppable value.
pub struct FileSession {
    cell: runic_common::SelfCell<ByteView<'static>, FileInner<'static>>,
    resolved: ResolvedPath,
}

impl FileSession {
    /// Opens the object at `path`.
    ///
    /// Returns `Ok(None)` when the file (and any companion found through
    /// its debug links) contains no DWARF sections; that is the valid
    /// absence, not an error.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Option<FileSession>> {
        let path = path.as_ref();
        let view = ByteView::open(path)?;
        let object = Object::parse(&view)?;

        let resolved = if object.has_debug_info() {
            ResolvedPath {
                path: path.to_path_buf(),
                source: PathSource::Original,
            }
        } else {
            match find_debug_file(&object, path, options) {
                Some(resolved) => resolved,
                None => ResolvedPath {
                    path: path.to_path_buf(),
                    source: PathSource::Original,
                },
            }
        };

        let group = options.group;

        // When the session is built over a companion file, the original
        // executable stays attached as the tied object: split units in
        // the companion resolve their `.debug_addr` contributions out of
        // the executable. Its DWARF-bearing sections (if any) are copied
        // so the first mapping can be dropped.
        let (view, tied) = if resolved.source == PathSource::Original {
            (view, None)
        } else {
            let loaded = object.load_sections(group)?;
            let original = DwarfSession::from_sections(
                loaded.registry.into_owned(),
                object.endian(),
                object.kind(),
                object.arch(),
                object.pointer_size(),
            )?;
            (ByteView::open(&resolved.path)?, Some(Arc::new(original)))
        };

        let cell = runic_common::SelfCell::try_new(view, |data| {
            let data: &'static [u8] = unsafe { &*data };
            let object = Object::parse(data)?;
            let mut dwarf = DwarfSession::from_object(&object, group)?;
            if let Some(tied) = tied {
                dwarf.attach_tied(tied);
            }
            Ok::<_, Error>(FileInner { object, dwarf })
        })?;

        if cell.get().dwarf.registry().is_empty() {
            return Ok(None);
        }

        Ok(Some(FileSession { cell, resolved }))
    }

    /// The DWARF session over the opened file.
    pub fn session(&self) -> &DwarfSession<'_> {
        &self.cell.get().dwarf
    }

    /// The parsed object the session was built from.
    pub fn object(&self) -> &Object<'_> {
        &self.cell.get().object
    }

    /// The path that was actually opened, and how it was found.
    pub fn resolved_path(&self) -> &ResolvedPath {
        &self.resolved
    }
}

impl fmt::Debug for FileSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSession")
            .field("path", &self.resolved.path)
            .field("source", &self.resolved.source)
            .field("session", self.session())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_debuglink_parse() {
        // "crash.debug\0" + 4-byte CRC, already 4-aligned.
        let mut data = b"crash.debug\0".to_vec();
        data.extend_from_slice(&0xdead_beefu32.to_le_bytes());

        let link = DebugLink::parse(&data, runic_common::Endian::Little).unwrap();
        assert_eq!(link.filename, b"crash.debug");
        assert_eq!(link.crc, 0xdead_beef);

        let link = DebugLink::parse(&data, runic_common::Endian::Big).unwrap();
        assert_eq!(link.crc, 0xefbe_adde);
    }

    #[test]
    fn test_debuglink_malformed() {
        assert_eq!(
            DebugLink::parse(b"unterminated", runic_common::Endian::Little)
                .unwrap_err()
                .kind(),
            ErrorKind::Truncated
        );
        assert_eq!(
            DebugLink::parse(b"x\0", runic_common::Endian::Little)
                .unwrap_err()
                .kind(),
            ErrorKind::Truncated
        );
    }

    #[test]
    fn test_crc32_known_value() {
        // The standard IEEE check value.
        assert_eq!(debuglink_crc32(b"123456789"), 0xcbf4_3926);
        assert_eq!(debuglink_crc32(b""), 0);
    }

    #[test]
    fn test_search_directories() {
        let options = OpenOptions {
            debug_search_paths: vec![PathBuf::from("/extra")],
            ..OpenOptions::default()
        };
        let dirs = search_directories(Path::new("/opt/app/bin/tool"), &options);

        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/opt/app/bin"),
                PathBuf::from("/opt/app/bin/.debug"),
                PathBuf::from("/usr/lib/debug/opt/app/bin"),
                PathBuf::from("/extra"),
            ]
        );
    }

    #[test]
    fn test_open_missing_file() {
        let err = FileSession::open("/nonexistent/definitely/not/here", &OpenOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
