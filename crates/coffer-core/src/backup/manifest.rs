use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::bundle::{bundle_small_files_across_paths, key_factory, manifest_key};
use crate::backup::compat;
use crate::error::{CofferError, Result};
use crate::file::fs::FileSystem;
use crate::file::hash::checksum_files;
use crate::file::{File, SHA1_SIZE};
use crate::jsonutil::parse_version_json;
use crate::store::ByteRange;

/// Codec version written by this implementation. Versions 1 and 2 are
/// readable legacy.
pub const MANIFEST_VERSION: u32 = 3;

/// One `{object key, byte range}` tuple of a manifest entry. An empty range
/// means the whole object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntryPart {
    pub key: String,
    pub range: ByteRange,
}

/// A `File` tagged with the backup set that uploaded it and the object
/// part(s) holding its contents. Directories carry no parts; their metadata
/// is restored from the manifest alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file: File,
    pub set: String,
    pub parts: Vec<ManifestEntryPart>,
}

impl ManifestEntry {
    pub fn path(&self) -> String {
        self.file.path()
    }
}

/// The index of all files known to the store: the union of entries across
/// all backup runs, each tagged with the run that last wrote it.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub version: u32,
    pub last_set: String,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub entries: Vec<ManifestEntry>,
    /// Full path -> position in `entries`. One canonical entry per path.
    path_index: HashMap<String, usize>,
}

fn truncate_sec(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or_default()
}

impl Manifest {
    /// A manifest of the given files, all assigned to a fresh set.
    pub fn new(fs: &dyn FileSystem, files: &[File]) -> Result<Self> {
        let mut m = Self {
            version: MANIFEST_VERSION,
            last_set: String::new(),
            created: DateTime::default(),
            updated: None,
            entries: Vec::new(),
            path_index: HashMap::new(),
        };
        let now = m.update(fs, files)?;
        m.created = truncate_sec(now);
        Ok(m)
    }

    pub(crate) fn assemble(
        version: u32,
        last_set: String,
        created: DateTime<Utc>,
        updated: Option<DateTime<Utc>>,
        entries: Vec<ManifestEntry>,
    ) -> Self {
        let mut m = Self {
            version,
            last_set,
            created,
            updated,
            entries,
            path_index: HashMap::new(),
        };
        m.rebuild_path_index();
        m
    }

    fn rebuild_path_index(&mut self) {
        self.path_index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path(), i))
            .collect();
    }

    pub fn has(&self, f: &File) -> bool {
        self.path_index.contains_key(&f.path())
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.path_index.get(path).map(|&i| &self.entries[i])
    }

    /// Remove the entry at `f`'s path, if present. The removed slot is
    /// filled by the tail entry to keep `entries` dense.
    pub fn remove(&mut self, f: &File) -> bool {
        let Some(i) = self.path_index.remove(&f.path()) else {
            return false;
        };
        self.entries.swap_remove(i);
        if i < self.entries.len() {
            self.path_index.insert(self.entries[i].path(), i);
        }
        true
    }

    /// True when an entry exists at `their` path with the same mode, the
    /// same size (non-directories), and either an equal mtime or an equal
    /// checksum. Restore uses this to skip files already on disk.
    pub fn has_identical(&self, their: &File) -> bool {
        let Some(our) = self.entry(&their.path()) else {
            return false;
        };
        if !our.file.is_dir() && our.file.size != their.size {
            return false;
        }
        if our.file.mode != their.mode {
            return false;
        }
        if our.file.mtime != their.mtime {
            return our.file.sha1 == their.sha1;
        }
        true
    }

    /// Decide which of the scanned files need uploading: new paths, size
    /// changes, and mtime-touched files whose contents actually differ.
    pub fn compare(&self, fs: &dyn FileSystem, after: &[File]) -> Result<Vec<File>> {
        let mut changed: Vec<File> = Vec::new();
        let mut touched: Vec<File> = Vec::new();

        for a in after {
            match self.entry(&a.path()) {
                Some(b) => {
                    if !a.is_dir() && a.size != b.file.size {
                        changed.push(a.clone()); // non-dir, size different
                    } else if a.mtime != b.file.mtime {
                        touched.push(a.clone()); // timestamp touched
                    }
                }
                None => changed.push(a.clone()), // not found; must be new
            }
        }

        checksum_files(fs, &mut [touched.as_mut_slice(), changed.as_mut_slice()])?;

        for t in touched {
            let Some(b) = self.entry(&t.path()) else {
                continue;
            };
            if t.sha1 != b.file.sha1 {
                changed.push(t);
            }
        }

        Ok(changed)
    }

    /// The transactional entry point at backup time: assign every file to a
    /// bundle under a fresh set key, overwriting existing entries in place.
    pub fn update(&mut self, fs: &dyn FileSystem, files: &[File]) -> Result<DateTime<Utc>> {
        let mut files = files.to_vec();
        checksum_files(fs, &mut [files.as_mut_slice()])?; // pre-populate hashes

        let now = Utc::now();
        self.last_set = manifest_key(now);
        self.updated = Some(truncate_sec(now));

        let bundles = bundle_small_files_across_paths(files);
        let mut next_key = key_factory(bundles.len());

        for bundle in bundles {
            let key = next_key();
            for f in bundle {
                let parts = if f.is_dir() {
                    Vec::new()
                } else {
                    vec![ManifestEntryPart {
                        key: key.clone(),
                        range: ByteRange::default(),
                    }]
                };
                let path = f.path();
                let entry = ManifestEntry {
                    file: f,
                    set: self.last_set.clone(),
                    parts,
                };
                match self.path_index.get(&path) {
                    Some(&i) => self.entries[i] = entry, // replace the entry
                    None => {
                        self.path_index.insert(path, self.entries.len());
                        self.entries.push(entry);
                    }
                }
            }
        }

        Ok(now)
    }

    /// Entries of the most recent set, grouped by the object that carries
    /// them. This is the unit of upload scheduling.
    pub fn latest_entries(&self) -> BTreeMap<String, Vec<ManifestEntry>> {
        let mut grouped: BTreeMap<String, Vec<ManifestEntry>> = BTreeMap::new();
        for e in &self.entries {
            if e.set == self.last_set {
                for p in &e.parts {
                    let obj = format!("{}/{}", self.last_set, p.key);
                    grouped.entry(obj).or_default().push(e.clone());
                }
            }
        }
        grouped
    }

    // -- JSON codec ---------------------------------------------------------

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let wire = ManifestWire {
            version: MANIFEST_VERSION,
            last_set: self.last_set.clone(),
            created: self.created,
            updated: self.updated,
            entries: self.entries.iter().map(entry_to_wire).collect(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }
}

/// Parse manifest JSON of any known version. Versions 1 and 2 share a
/// decoder; version 3 is the current format.
pub fn read_manifest_data(data: &[u8]) -> Result<Manifest> {
    match parse_version_json(data) {
        Some(1) | Some(2) => compat::read_v2_manifest(data),
        Some(3) => {
            let wire: ManifestWire =
                serde_json::from_slice(data).map_err(|_| CofferError::MalformedManifest)?;
            let entries = wire
                .entries
                .into_iter()
                .map(entry_from_wire)
                .collect::<Result<Vec<_>>>()?;
            Ok(Manifest::assemble(
                wire.version,
                wire.last_set,
                wire.created,
                wire.updated,
                entries,
            ))
        }
        Some(_) => Err(CofferError::BadVersion),
        None => Err(CofferError::MalformedManifest),
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestWire {
    version: u32,
    #[serde(rename = "lastSet")]
    last_set: String,
    created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated: Option<DateTime<Utc>>,
    entries: Vec<EntryWire>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct EntryWire {
    root: String,
    name: String,
    mode: u32,
    mtime: DateTime<Utc>,
    uid: u32,
    gid: u32,
    set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parts: Option<Vec<PartWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha1: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct PartWire {
    key: String,
    #[serde(default, skip_serializing_if = "ByteRange::is_empty")]
    range: ByteRange,
}

fn entry_to_wire(e: &ManifestEntry) -> EntryWire {
    EntryWire {
        root: e.file.root.clone(),
        name: e.file.name.clone(),
        mode: e.file.mode,
        mtime: e.file.mtime,
        uid: e.file.uid,
        gid: e.file.gid,
        set: e.set.clone(),
        parts: if e.parts.is_empty() {
            None
        } else {
            Some(
                e.parts
                    .iter()
                    .map(|p| PartWire {
                        key: p.key.clone(),
                        range: p.range,
                    })
                    .collect(),
            )
        },
        size: if e.file.is_dir() {
            None
        } else {
            Some(e.file.size)
        },
        sha1: e.file.sha1.map(|d| BASE64.encode(d)),
    }
}

fn entry_from_wire(w: EntryWire) -> Result<ManifestEntry> {
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
        set: w.set,
        parts: w
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(|p| ManifestEntryPart {
                key: p.key,
                range: p.range,
            })
            .collect(),
    })
}

pub(crate) fn decode_sha1(raw: Option<&str>) -> Result<Option<[u8; SHA1_SIZE]>> {
    let Some(raw) = raw else { return Ok(None) };
    let bytes = BASE64
        .decode(raw)
        .map_err(|_| CofferError::MalformedManifest)?;
    let digest: [u8; SHA1_SIZE] = bytes
        .try_into()
        .map_err(|_| CofferError::MalformedManifest)?;
    Ok(Some(digest))
}
