use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::backup::manifest::{decode_sha1, Manifest, ManifestEntry, ManifestEntryPart};
use crate::error::{CofferError, Result};
use crate::file::File;
use crate::store::ByteRange;

/// Read path for version 1 and 2 manifests (never written).
///
/// A v2 entry carries `"_"` as a `"set/bundle_key"` shorthand instead of the
/// split `set` and `parts` fields. Multiple keys per entry were possible in
/// theory but never happened in practice, so only the single string form is
/// decoded. v1 shares this decoder.
pub(crate) fn read_v2_manifest(data: &[u8]) -> Result<Manifest> {
    let wire: ManifestWireV2 =
        serde_json::from_slice(data).map_err(|_| CofferError::MalformedManifest)?;
    let entries = wire
        .entries
        .into_iter()
        .map(entry_from_v2)
        .collect::<Result<Vec<_>>>()?;
    Ok(Manifest::assemble(
        wire.version,
        wire.key,
        wire.created,
        None,
        entries,
    ))
}

#[derive(Deserialize)]
struct ManifestWireV2 {
    version: u32,
    key: String,
    created: DateTime<Utc>,
    entries: Vec<EntryWireV2>,
}

#[derive(Deserialize)]
struct EntryWireV2 {
    root: String,
    name: String,
    mode: u32,
    mtime: DateTime<Utc>,
    uid: u32,
    gid: u32,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "_", default)]
    object: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
}

fn entry_from_v2(w: EntryWireV2) -> Result<ManifestEntry> {
    let (set, parts) = match w.object {
        Some(object) => {
            let (set, key) = object
                .split_once('/')
                .ok_or(CofferError::MalformedManifest)?;
            (
                set.to_string(),
                vec![ManifestEntryPart {
                    key: key.to_string(),
                    range: ByteRange::default(),
                }],
            )
        }
        None => (String::new(), Vec::new()),
    };

    Ok(ManifestEntry {
        file: File {
            root: w.root,
            name: w.name,
            size: w.size.unwrap_or(0),
            mode: w.mode,
            mtime: w.mtime,
            uid: w.uid,
            gid: w.gid,
            sha1: decode_sha1(w.sha1.as_deref())?,
        },
        set,
        parts,
    })
}
