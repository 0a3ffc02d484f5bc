// Track catalog: raw corpus entries and generated tracks.
//
// A `MusicItem` is the plain record handed to storage. Items without an id
// get a stable one derived from title and composer (CRC-32, masked to 31
// bits), so re-importing the same metadata yields the same ids. The split is
// matched case-insensitively on input and the duration is kept in whole
// seconds.
//
// `Catalog` is the storage seam; `JsonCatalog` keeps every item in one JSON
// array on disk and rewrites the file on each insert.
//
// `clean_maestro` turns MAESTRO-style metadata rows into catalog items:
// strings are trimmed, empty fields dropped, file paths reduced to their file
// name (either separator), numbers rounded, and rows repeating a
// (composer, title, midi file) key skipped.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which part of the corpus an item belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Split {
    #[default]
    Train,
    Test,
    Validation,
    Generated,
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            "validation" => Ok(Split::Validation),
            "generated" => Ok(Split::Generated),
            other => Err(Error::Catalog(format!("unknown split {other:?}"))),
        }
    }
}

impl TryFrom<String> for Split {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Split::Train => "Train",
            Split::Test => "Test",
            Split::Validation => "Validation",
            Split::Generated => "Generated",
        };
        f.pad(name)
    }
}

/// Accept integer or fractional seconds, truncating to whole seconds.
fn whole_seconds<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u32>, D::Error> {
    Ok(Option::<f64>::deserialize(d)?
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0) as u32))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicItem {
    /// 0 until assigned; see `ensure_id`.
    #[serde(default)]
    pub id: u32,
    #[serde(default, alias = "canonical_title")]
    pub title: Option<String>,
    #[serde(default, alias = "canonical_composer")]
    pub composer: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub split: Split,
    /// Whole seconds.
    #[serde(default, deserialize_with = "whole_seconds")]
    pub duration: Option<u32>,
    /// Unix seconds.
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub plays: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub midi_filename: Option<String>,
    #[serde(default)]
    pub audio_filename: Option<String>,
    /// Encoding revision for generated items.
    #[serde(default)]
    pub encoding_version: Option<u32>,
}

/// Stable id from title and composer.
pub fn stable_id(title: &str, composer: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(title.as_bytes());
    hasher.update(composer.as_bytes());
    hasher.finalize() & 0x7fff_ffff
}

impl MusicItem {
    /// Assign the stable id if none is set. Items with a MIDI file hash it
    /// along with the composer, so separate performances of one piece keep
    /// separate ids.
    pub fn ensure_id(&mut self) {
        if self.id != 0 {
            return;
        }
        let title = self.title.as_deref().unwrap_or("");
        let composer = self.composer.as_deref().unwrap_or("");
        self.id = match &self.midi_filename {
            Some(midi) => stable_id(title, &format!("{composer}{midi}")),
            None => stable_id(title, composer),
        };
    }

    fn matches_search(&self, needle_lower: &str) -> bool {
        [&self.title, &self.composer]
            .into_iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(needle_lower))
    }
}

/// Storage collaborator for catalog records.
pub trait Catalog: Send {
    /// Items in storage order. `filter` is a split name or `"all"`; `search`
    /// is a case-insensitive substring of title or composer.
    fn list(&self, filter: Option<&str>, search: Option<&str>) -> Result<Vec<MusicItem>>;

    fn get(&self, id: u32) -> Result<Option<MusicItem>>;

    /// Store an item, replacing any item with the same id. Returns the id.
    fn insert(&mut self, item: MusicItem) -> Result<u32>;
}

/// Catalog persisted as a JSON array.
#[derive(Debug, Default)]
pub struct JsonCatalog {
    path: Option<PathBuf>,
    items: Vec<MusicItem>,
}

impl JsonCatalog {
    /// Not backed by a file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let mut items: Vec<MusicItem> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Vec::new()
        };
        for item in &mut items {
            item.ensure_id();
        }
        tracing::info!("catalog {} holds {} items", path.display(), items.len());
        Ok(JsonCatalog {
            path: Some(path.to_path_buf()),
            items,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert many items with a single write.
    pub fn insert_all(&mut self, items: impl IntoIterator<Item = MusicItem>) -> Result<usize> {
        let mut count = 0;
        for item in items {
            self.upsert(item);
            count += 1;
        }
        self.persist()?;
        Ok(count)
    }

    fn upsert(&mut self, mut item: MusicItem) -> u32 {
        item.ensure_id();
        let id = item.id;
        match self.items.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        id
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.items)?)?;
        Ok(())
    }
}

impl Catalog for JsonCatalog {
    fn list(&self, filter: Option<&str>, search: Option<&str>) -> Result<Vec<MusicItem>> {
        let split = match filter.map(str::trim) {
            None | Some("") => None,
            Some(f) if f.eq_ignore_ascii_case("all") => None,
            Some(f) => Some(f.parse::<Split>()?),
        };
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(self
            .items
            .iter()
            .filter(|item| split.is_none_or(|s| item.split == s))
            .filter(|item| needle.as_deref().is_none_or(|n| item.matches_search(n)))
            .cloned()
            .collect())
    }

    fn get(&self, id: u32) -> Result<Option<MusicItem>> {
        Ok(self.items.iter().find(|item| item.id == id).cloned())
    }

    fn insert(&mut self, item: MusicItem) -> Result<u32> {
        let id = self.upsert(item);
        self.persist()?;
        Ok(id)
    }
}

/// Trimmed string, or `None` when absent or blank.
fn clean_str(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// File name of a path written with either separator.
fn file_name(value: Option<&Value>) -> Option<String> {
    let raw = clean_str(value)?.replace('\\', "/");
    let name = raw.rsplit('/').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn rounded(value: Option<&Value>) -> Option<f64> {
    let v = value?.as_f64()?;
    Some((v * 100.0).round() / 100.0)
}

/// Convert MAESTRO metadata rows into deduplicated catalog items.
pub fn clean_maestro(rows: &[Value]) -> Vec<MusicItem> {
    let mut seen: HashSet<(Option<String>, Option<String>, Option<String>)> = HashSet::new();
    let mut items = Vec::new();

    for row in rows {
        let composer = clean_str(row.get("canonical_composer"));
        let title = clean_str(row.get("canonical_title"));
        let midi_filename = file_name(row.get("midi_filename"));
        let audio_filename = file_name(row.get("audio_filename"));
        let year = rounded(row.get("year")).map(|y| y.round() as i32);
        let duration = rounded(row.get("duration")).map(|d| d.max(0.0) as u32);
        let split = clean_str(row.get("split")).and_then(|s| s.parse().ok());

        if composer.is_none() && title.is_none() && midi_filename.is_none() {
            continue;
        }
        let key = (composer.clone(), title.clone(), midi_filename.clone());
        if !seen.insert(key) {
            continue;
        }

        let mut item = MusicItem {
            title,
            composer,
            year,
            split: split.unwrap_or_default(),
            duration,
            midi_filename,
            audio_filename,
            ..Default::default()
        };
        item.ensure_id();
        items.push(item);
    }

    items
}

/// Read a MAESTRO metadata file (a JSON array of rows) and clean it.
pub fn import_maestro(path: &Path) -> Result<Vec<MusicItem>> {
    let rows: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let items = clean_maestro(&rows);
    tracing::info!(
        "{}: {} rows, {} unique items",
        path.display(),
        rows.len(),
        items.len()
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(title: &str, composer: &str, split: Split) -> MusicItem {
        MusicItem {
            title: Some(title.into()),
            composer: Some(composer.into()),
            split,
            ..Default::default()
        }
    }

    #[test]
    fn stable_id_is_31_bit_and_deterministic() {
        let a = stable_id("Nocturne", "Chopin");
        assert_eq!(a, stable_id("Nocturne", "Chopin"));
        assert_ne!(a, stable_id("Nocturne", "Field"));
        assert!(a < 1 << 31);
    }

    #[test]
    fn deserializes_aliases_and_loose_values() {
        let json = r#"{
            "canonical_title": "Ballade",
            "canonical_composer": "Chopin",
            "split": "VALIDATION",
            "duration": 612.7
        }"#;
        let mut it: MusicItem = serde_json::from_str(json).unwrap();
        it.ensure_id();
        assert_eq!(it.title.as_deref(), Some("Ballade"));
        assert_eq!(it.split, Split::Validation);
        assert_eq!(it.duration, Some(612));
        assert_eq!(it.id, stable_id("Ballade", "Chopin"));
        assert!(serde_json::from_str::<MusicItem>(r#"{"split": "bogus"}"#).is_err());
    }

    #[test]
    fn list_filters_and_searches() {
        let mut cat = JsonCatalog::in_memory();
        cat.insert(item("Nocturne", "Chopin", Split::Train)).unwrap();
        cat.insert(item("Sonata", "Mozart", Split::Test)).unwrap();
        cat.insert(item("Night Piece", "Generated", Split::Generated)).unwrap();

        assert_eq!(cat.list(None, None).unwrap().len(), 3);
        assert_eq!(cat.list(Some("all"), None).unwrap().len(), 3);
        assert_eq!(cat.list(Some("test"), None).unwrap()[0].title.as_deref(), Some("Sonata"));
        assert_eq!(cat.list(None, Some("CHOP")).unwrap().len(), 1);
        assert_eq!(cat.list(Some("Train"), Some("mozart")).unwrap().len(), 0);
        assert!(matches!(cat.list(Some("holdout"), None), Err(Error::Catalog(_))));
    }

    #[test]
    fn get_and_upsert() {
        let mut cat = JsonCatalog::in_memory();
        let id = cat.insert(item("Etude", "Liszt", Split::Train)).unwrap();
        let mut updated = item("Etude", "Liszt", Split::Train);
        updated.plays = 3;
        assert_eq!(cat.insert(updated).unwrap(), id);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.get(id).unwrap().unwrap().plays, 3);
        assert!(cat.get(id ^ 1).unwrap().is_none());
    }

    #[test]
    fn json_catalog_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let id = {
            let mut cat = JsonCatalog::open(&path).unwrap();
            assert!(cat.is_empty());
            cat.insert(item("Prelude", "Bach", Split::Train)).unwrap()
        };
        let reopened = JsonCatalog::open(&path).unwrap();
        assert_eq!(reopened.get(id).unwrap().unwrap().composer.as_deref(), Some("Bach"));
    }

    #[test]
    fn maestro_cleaning() {
        let rows = vec![
            json!({
                "canonical_composer": "  Frédéric Chopin ",
                "canonical_title": "Ballade No. 1",
                "split": "train",
                "year": 2004,
                "midi_filename": "2004\\MIDI-Unprocessed_01.midi",
                "audio_filename": "2004/MIDI-Unprocessed_01.wav",
                "duration": 598.456
            }),
            json!({
                "canonical_composer": "Frédéric Chopin",
                "canonical_title": "Ballade No. 1",
                "midi_filename": "other/MIDI-Unprocessed_01.midi",
                "split": "test"
            }),
            json!({ "canonical_composer": "", "canonical_title": "   " }),
            json!({
                "canonical_composer": "Bach",
                "canonical_title": "Prelude",
                "split": "validation",
                "midi_filename": ""
            }),
        ];
        let items = clean_maestro(&rows);
        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert_eq!(first.composer.as_deref(), Some("Frédéric Chopin"));
        assert_eq!(first.midi_filename.as_deref(), Some("MIDI-Unprocessed_01.midi"));
        assert_eq!(first.audio_filename.as_deref(), Some("MIDI-Unprocessed_01.wav"));
        assert_eq!(first.duration, Some(598));
        assert_eq!(first.year, Some(2004));
        assert_eq!(items[1].split, Split::Validation);
        assert_eq!(items[1].midi_filename, None);
    }

    #[test]
    fn import_keeps_every_performance() {
        let rows = vec![
            json!({
                "canonical_composer": "Frédéric Chopin",
                "canonical_title": "Ballade No. 1",
                "midi_filename": "2004/MIDI-Unprocessed_01.midi"
            }),
            json!({
                "canonical_composer": "Frédéric Chopin",
                "canonical_title": "Ballade No. 1",
                "midi_filename": "2006/MIDI-Unprocessed_07.midi"
            }),
        ];
        let items = clean_maestro(&rows);
        assert_eq!(items.len(), 2);
        assert_ne!(items[0].id, items[1].id);

        let mut cat = JsonCatalog::in_memory();
        assert_eq!(cat.insert_all(items).unwrap(), 2);
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.list(None, Some("ballade")).unwrap().len(), 2);
    }
}
