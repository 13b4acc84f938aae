//! Content layer codec
//!
//! The content layer is a plain tar of the package's code and auxiliary
//! files. Headers carry only name, size and mode (timestamps and owners are
//! zeroed) so identical inputs always produce identical bytes.

use modelpack_core::{PackError, PackResult};
use std::io::Read;
use std::path::{Component, Path};

/// Mode used when an archive member carries no permission bits
pub const DEFAULT_MODE: u32 = 0o644;

/// One file of the content layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// Member name inside the archive
    pub name: String,
    /// Permission bits
    pub mode: u32,
    /// File contents
    pub data: Vec<u8>,
}

impl ContentEntry {
    pub fn new(name: impl Into<String>, mode: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mode: mode & 0o777,
            data,
        }
    }
}

/// Pack entries into a tar, in the order given
pub fn pack(entries: &[ContentEntry]) -> PackResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        check_member_name(&entry.name)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(entry.data.len() as u64);
        header.set_mode(entry.mode);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, &entry.name, entry.data.as_slice())
            .map_err(|e| PackError::Archive(format!("writing {}: {}", entry.name, e)))?;
    }
    builder
        .into_inner()
        .map_err(|e| PackError::Archive(format!("finishing content layer: {}", e)))
}

/// Unpack every regular file of a content tar
pub fn unpack(bytes: &[u8]) -> PackResult<Vec<ContentEntry>> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = Vec::new();
    let members = archive
        .entries()
        .map_err(|e| PackError::Archive(format!("reading content layer: {}", e)))?;
    for member in members {
        let mut member =
            member.map_err(|e| PackError::Archive(format!("reading content layer: {}", e)))?;
        if !member.header().entry_type().is_file() {
            continue;
        }
        let name = member
            .path()
            .map_err(|e| PackError::Archive(format!("bad member name: {}", e)))?
            .to_string_lossy()
            .into_owned();
        check_member_name(&name)?;
        let mode = member.header().mode().unwrap_or(DEFAULT_MODE);
        let mut data = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut data)
            .map_err(|e| PackError::Archive(format!("reading {}: {}", name, e)))?;
        entries.push(ContentEntry::new(name, mode, data));
    }
    Ok(entries)
}

/// Reject names that would escape the directory an archive is extracted to,
/// and names the tar header would not store verbatim
///
/// Only plain `a/b/c` names are accepted. `.` components, repeated or
/// trailing separators are rejected because the tar writer normalizes them
/// away and the member would come back under a different name.
pub fn check_member_name(name: &str) -> PackResult<()> {
    let mut parts = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            _ => return Err(PackError::Archive(format!("unsafe member name: {:?}", name))),
        }
    }
    if parts.is_empty() || parts.join("/") != name {
        return Err(PackError::Archive(format!(
            "non-canonical member name: {:?}",
            name
        )));
    }
    Ok(())
}
