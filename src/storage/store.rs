use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::storage::records::{
    from_json, to_json, unix_now, EncodingRow, FaceRegion, ImageRecord, SearchFolder,
    StoreStats, StoredEncoding,
};
use redb::{Database, ReadTransaction, ReadableTable, Table, TableDefinition, WriteTransaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Key: absolute file path. Value: JSON serialized ImageRecord
const IMAGES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("images");

/// Key: image id. Value: absolute file path
const IMAGE_IDS_TABLE: TableDefinition<u64, &str> = TableDefinition::new("image_ids");

/// Key: (image id, face index). Value: JSON serialized EncodingRow
const ENCODINGS_TABLE: TableDefinition<(u64, u32), &str> = TableDefinition::new("encodings");

/// Key: folder path. Value: JSON serialized SearchFolder
const FOLDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("search_folders");

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_NEXT_IMAGE_ID: &str = "next_image_id";
const META_EMBEDDING_DIM: &str = "embedding_dim";

type Snapshot = Arc<Vec<StoredEncoding>>;

/// Durable store for image metadata, face encodings and search folders.
///
/// Every public method absorbs storage faults: the fault is logged and the
/// caller sees `None`, `false`, an empty collection or zeroed stats. Writes
/// for one image always happen inside a single transaction.
///
/// Encodings are kept resident in memory for search. The snapshot is rebuilt
/// lazily on the first scan after a committed write.
pub struct EncodingStore {
    db: Database,
    path: PathBuf,
    generation: AtomicU64,
    snapshot: RwLock<Option<(u64, Snapshot)>>,
}

impl EncodingStore {
    /// Open or create the encoding store at the configured location
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.database_path)
    }

    /// Open or create the encoding store at an explicit path
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path.exists() {
            Database::open(path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("Face database is locked. Another facefind process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::db("Failed to open face database", e)
                }
            })?
        } else {
            Database::create(path).map_err(|e| Error::db("Failed to create face database", e))?
        };

        let store = Self {
            db,
            path: path.to_path_buf(),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(None),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create every table up front so later operations can assume they exist.
    fn init_schema(&self) -> Result<()> {
        self.write(|txn| {
            open(txn, IMAGES_TABLE)?;
            open(txn, IMAGE_IDS_TABLE)?;
            open(txn, ENCODINGS_TABLE)?;
            open(txn, FOLDERS_TABLE)?;
            open(txn, META_TABLE)?;
            Ok(())
        })
    }

    /// Insert or replace the record for `path`, returning its id.
    ///
    /// The id of an already known path is kept. Its previous encodings are
    /// removed, so the caller is expected to add the new ones.
    pub fn upsert_image(
        &self,
        path: &str,
        name: &str,
        size: u64,
        modified_ms: u64,
        face_count: u32,
        folder: &str,
    ) -> Option<u64> {
        let record = ImageRecord {
            id: 0,
            path: path.to_string(),
            name: name.to_string(),
            size,
            modified_ms,
            face_count,
            processed_at: unix_now(),
            folder: folder.to_string(),
        };
        let result = self.write(|txn| write_image(txn, record));
        degrade("upsert image", path, result.map(Some), None)
    }

    /// Append one face encoding to an existing image.
    pub fn add_encoding(
        &self,
        image_id: u64,
        face_index: u32,
        embedding: &[f32],
        region: FaceRegion,
        confidence: f32,
    ) -> bool {
        let row = EncodingRow {
            face_index,
            embedding: embedding.to_vec(),
            region,
            confidence,
        };
        let result = self.write(|txn| {
            let ids = open(txn, IMAGE_IDS_TABLE)?;
            if ids.get(image_id).map_err(|e| Error::db("Failed to read image id", e))?.is_none() {
                return Err(Error::Database(format!("Unknown image id {}", image_id)));
            }
            let mut meta = open(txn, META_TABLE)?;
            check_dimension(&mut meta, row.embedding.len())?;
            let mut encodings = open(txn, ENCODINGS_TABLE)?;
            insert_encoding(&mut encodings, image_id, &row)
        });
        degrade("add encoding", &image_id.to_string(), result.map(|_| true), false)
    }

    /// Write a record together with all of its encodings in one transaction.
    ///
    /// `face_count` is taken from `encodings`. Either everything is stored or
    /// nothing is.
    pub fn replace_image(&self, mut record: ImageRecord, encodings: &[EncodingRow]) -> Option<u64> {
        record.face_count = encodings.len() as u32;
        record.processed_at = unix_now();
        let path = record.path.clone();
        let result = self.write(|txn| {
            let id = write_image(txn, record)?;
            let mut meta = open(txn, META_TABLE)?;
            let mut table = open(txn, ENCODINGS_TABLE)?;
            for row in encodings {
                check_dimension(&mut meta, row.embedding.len())?;
                insert_encoding(&mut table, id, row)?;
            }
            Ok(id)
        });
        degrade("replace image", &path, result.map(Some), None)
    }

    pub fn get_image_by_path(&self, path: &str) -> Option<ImageRecord> {
        let result = self.read(|txn| {
            let images = txn
                .open_table(IMAGES_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            load_image(&images, path)
        });
        degrade("get image", path, result, None)
    }

    /// Encodings of one image ordered by face index
    pub fn encodings_for_image(&self, image_id: u64) -> Vec<EncodingRow> {
        let result = self.read(|txn| {
            let table = txn
                .open_table(ENCODINGS_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let mut rows = Vec::new();
            for item in table
                .range((image_id, 0u32)..=(image_id, u32::MAX))
                .map_err(|e| Error::db("Failed to iterate encodings", e))?
            {
                let (_key, value) = item.map_err(|e| Error::db("Failed to read encoding", e))?;
                rows.push(from_json::<EncodingRow>(value.value())?);
            }
            Ok(rows)
        });
        degrade("list encodings", &image_id.to_string(), result, Vec::new())
    }

    /// Every stored encoding joined with its owning image.
    ///
    /// Served from the resident snapshot; only the first call after a write
    /// reads the database.
    pub fn all_encodings(&self) -> Snapshot {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
            if let Some((built_at, snapshot)) = guard.as_ref() {
                if *built_at == generation {
                    return Arc::clone(snapshot);
                }
            }
        }

        match self.read(load_snapshot) {
            Ok(rows) => {
                let snapshot = Arc::new(rows);
                let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
                *guard = Some((generation, Arc::clone(&snapshot)));
                snapshot
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to scan encodings");
                Arc::new(Vec::new())
            }
        }
    }

    /// True iff a record exists for `path` whose stored mtime is at least `modified_ms`.
    ///
    /// Only modification times are compared. A file edited while its clock
    /// runs behind the stored value is treated as current.
    pub fn is_up_to_date(&self, path: &str, modified_ms: u64) -> bool {
        self.get_image_by_path(path)
            .map(|record| record.modified_ms >= modified_ms)
            .unwrap_or(false)
    }

    /// Remove a record and all of its encodings. Succeeds when `path` is unknown.
    pub fn delete_image_and_encodings(&self, path: &str) -> bool {
        let result = self.write(|txn| {
            let mut images = open(txn, IMAGES_TABLE)?;
            let Some(record) = load_image(&images, path)? else {
                return Ok(());
            };
            let mut encodings = open(txn, ENCODINGS_TABLE)?;
            remove_encodings(&mut encodings, record.id)?;
            let mut ids = open(txn, IMAGE_IDS_TABLE)?;
            ids.remove(record.id)
                .map_err(|e| Error::db("Failed to remove image id", e))?;
            images
                .remove(path)
                .map_err(|e| Error::db("Failed to remove image", e))?;
            Ok(())
        });
        degrade("delete image", path, result.map(|_| true), false)
    }

    pub fn list_images(&self) -> Vec<ImageRecord> {
        let result = self.read(|txn| {
            let images = txn
                .open_table(IMAGES_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let mut records = Vec::new();
            for item in images.iter().map_err(|e| Error::db("Failed to iterate images", e))? {
                let (_key, value) = item.map_err(|e| Error::db("Failed to read image", e))?;
                records.push(from_json::<ImageRecord>(value.value())?);
            }
            Ok(records)
        });
        degrade("list images", "*", result, Vec::new())
    }

    /// Drop every image and encoding and forget the embedding dimensionality.
    /// Search folders are kept.
    pub fn clear_index(&self) -> bool {
        let result = self.write(|txn| {
            txn.delete_table(IMAGES_TABLE)
                .map_err(|e| Error::db("Failed to delete table", e))?;
            txn.delete_table(IMAGE_IDS_TABLE)
                .map_err(|e| Error::db("Failed to delete table", e))?;
            txn.delete_table(ENCODINGS_TABLE)
                .map_err(|e| Error::db("Failed to delete table", e))?;
            open(txn, IMAGES_TABLE)?;
            open(txn, IMAGE_IDS_TABLE)?;
            open(txn, ENCODINGS_TABLE)?;
            let mut meta = open(txn, META_TABLE)?;
            meta.remove(META_EMBEDDING_DIM)
                .map_err(|e| Error::db("Failed to reset embedding dimension", e))?;
            Ok(())
        });
        degrade("clear index", "*", result.map(|_| true), false)
    }

    /// Add a folder to the search scope, re-activating it if it was removed.
    pub fn add_folder(&self, path: &str) -> bool {
        let result = self.write(|txn| {
            let mut folders = open(txn, FOLDERS_TABLE)?;
            let existing = folders
                .get(path)
                .map_err(|e| Error::db("Failed to read folder", e))?
                .map(|guard| guard.value().to_string());
            let added_at = match existing {
                Some(json) => from_json::<SearchFolder>(&json)?.added_at,
                None => unix_now(),
            };
            let folder = SearchFolder {
                path: path.to_string(),
                active: true,
                added_at,
            };
            folders
                .insert(path, to_json(&folder)?.as_str())
                .map_err(|e| Error::db("Failed to insert folder", e))?;
            Ok(())
        });
        degrade("add folder", path, result.map(|_| true), false)
    }

    /// Soft-delete a folder. Indexed images under it are left in place.
    pub fn deactivate_folder(&self, path: &str) -> bool {
        let result = self.write(|txn| {
            let mut folders = open(txn, FOLDERS_TABLE)?;
            let existing = folders
                .get(path)
                .map_err(|e| Error::db("Failed to read folder", e))?
                .map(|guard| guard.value().to_string());
            if let Some(json) = existing {
                let mut folder: SearchFolder = from_json(&json)?;
                folder.active = false;
                folders
                    .insert(path, to_json(&folder)?.as_str())
                    .map_err(|e| Error::db("Failed to update folder", e))?;
            }
            Ok(())
        });
        degrade("deactivate folder", path, result.map(|_| true), false)
    }

    /// All folders, active or not, in path order
    pub fn list_folders(&self) -> Vec<SearchFolder> {
        let result = self.read(|txn| {
            let folders = txn
                .open_table(FOLDERS_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let mut out = Vec::new();
            for item in folders.iter().map_err(|e| Error::db("Failed to iterate folders", e))? {
                let (_key, value) = item.map_err(|e| Error::db("Failed to read folder", e))?;
                out.push(from_json::<SearchFolder>(value.value())?);
            }
            Ok(out)
        });
        degrade("list folders", "*", result, Vec::new())
    }

    pub fn list_active_folders(&self) -> Vec<String> {
        self.list_folders()
            .into_iter()
            .filter(|f| f.active)
            .map(|f| f.path)
            .collect()
    }

    /// Dimensionality fixed by the first encoding written, if any
    pub fn embedding_dim(&self) -> Option<usize> {
        let result = self.read(|txn| {
            let meta = txn
                .open_table(META_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let dim = meta
                .get(META_EMBEDDING_DIM)
                .map_err(|e| Error::db("Failed to read embedding dimension", e))?
                .map(|guard| guard.value() as usize);
            Ok(dim)
        });
        degrade("read embedding dimension", "*", result, None)
    }

    pub fn stats(&self) -> StoreStats {
        let result = self.read(|txn| {
            let images = txn
                .open_table(IMAGES_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let encodings = txn
                .open_table(ENCODINGS_TABLE)
                .map_err(|e| Error::db("Failed to open table", e))?;
            let image_count = images
                .iter()
                .map_err(|e| Error::db("Failed to iterate images", e))?
                .count() as u64;
            let encoding_count = encodings
                .iter()
                .map_err(|e| Error::db("Failed to iterate encodings", e))?
                .count() as u64;
            Ok((image_count, encoding_count))
        });
        let (image_count, encoding_count) = degrade("stats", "*", result, (0, 0));

        StoreStats {
            image_count,
            encoding_count,
            active_folder_count: self.list_active_folders().len() as u64,
            store_size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::db("Failed to begin read transaction", e))?;
        f(&txn)
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::db("Failed to begin write transaction", e))?;
        let outcome = f(&txn);
        match outcome {
            Ok(value) => {
                txn.commit()
                    .map_err(|e| Error::db("Failed to commit transaction", e))?;
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    tracing::warn!(error = %abort_err, "failed to abort transaction");
                }
                Err(e)
            }
        }
    }
}

/// Log a storage fault and substitute the degraded value.
fn degrade<T>(operation: &str, subject: &str, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        tracing::error!(operation, subject, error = %e, "encoding store operation failed");
        fallback
    })
}

fn open<'db, 'txn, K: redb::RedbKey + 'static, V: redb::RedbValue + 'static>(
    txn: &'txn WriteTransaction<'db>,
    definition: TableDefinition<K, V>,
) -> Result<Table<'db, 'txn, K, V>> {
    txn.open_table(definition)
        .map_err(|e| Error::db("Failed to open table", e))
}

fn load_image(
    table: &impl ReadableTable<&'static str, &'static str>,
    path: &str,
) -> Result<Option<ImageRecord>> {
    let json = table
        .get(path)
        .map_err(|e| Error::db("Failed to get image", e))?
        .map(|guard| guard.value().to_string());
    json.map(|j| from_json(&j)).transpose()
}

fn write_image(txn: &WriteTransaction, mut record: ImageRecord) -> Result<u64> {
    let mut images = open(txn, IMAGES_TABLE)?;
    let id = match load_image(&images, &record.path)? {
        Some(previous) => {
            let mut encodings = open(txn, ENCODINGS_TABLE)?;
            remove_encodings(&mut encodings, previous.id)?;
            previous.id
        }
        None => {
            let mut meta = open(txn, META_TABLE)?;
            let next = meta
                .get(META_NEXT_IMAGE_ID)
                .map_err(|e| Error::db("Failed to read next image id", e))?
                .map(|guard| guard.value())
                .unwrap_or(1);
            meta.insert(META_NEXT_IMAGE_ID, next + 1)
                .map_err(|e| Error::db("Failed to advance image id", e))?;
            let mut ids = open(txn, IMAGE_IDS_TABLE)?;
            ids.insert(next, record.path.as_str())
                .map_err(|e| Error::db("Failed to insert image id", e))?;
            next
        }
    };

    record.id = id;
    images
        .insert(record.path.as_str(), to_json(&record)?.as_str())
        .map_err(|e| Error::db("Failed to insert image", e))?;
    Ok(id)
}

fn insert_encoding(
    table: &mut Table<(u64, u32), &'static str>,
    image_id: u64,
    row: &EncodingRow,
) -> Result<()> {
    table
        .insert((image_id, row.face_index), to_json(row)?.as_str())
        .map_err(|e| Error::db("Failed to insert encoding", e))?;
    Ok(())
}

fn remove_encodings(table: &mut Table<(u64, u32), &'static str>, image_id: u64) -> Result<usize> {
    let mut keys = Vec::new();
    for item in table
        .range((image_id, 0u32)..=(image_id, u32::MAX))
        .map_err(|e| Error::db("Failed to iterate encodings", e))?
    {
        let (key, _value) = item.map_err(|e| Error::db("Failed to read encoding", e))?;
        keys.push(key.value());
    }
    for key in &keys {
        table
            .remove(key)
            .map_err(|e| Error::db("Failed to remove encoding", e))?;
    }
    Ok(keys.len())
}

fn check_dimension(meta: &mut Table<&'static str, u64>, dim: usize) -> Result<()> {
    let recorded = meta
        .get(META_EMBEDDING_DIM)
        .map_err(|e| Error::db("Failed to read embedding dimension", e))?
        .map(|guard| guard.value() as usize);
    match recorded {
        Some(expected) if expected != dim => Err(Error::DimensionMismatch {
            expected,
            actual: dim,
        }),
        Some(_) => Ok(()),
        None => {
            meta.insert(META_EMBEDDING_DIM, dim as u64)
                .map_err(|e| Error::db("Failed to record embedding dimension", e))?;
            Ok(())
        }
    }
}

fn load_snapshot(txn: &ReadTransaction) -> Result<Vec<StoredEncoding>> {
    let images = txn
        .open_table(IMAGES_TABLE)
        .map_err(|e| Error::db("Failed to open table", e))?;
    let encodings = txn
        .open_table(ENCODINGS_TABLE)
        .map_err(|e| Error::db("Failed to open table", e))?;

    let mut owners: HashMap<u64, (String, String)> = HashMap::new();
    for item in images.iter().map_err(|e| Error::db("Failed to iterate images", e))? {
        let (_key, value) = item.map_err(|e| Error::db("Failed to read image", e))?;
        let record: ImageRecord = from_json(value.value())?;
        owners.insert(record.id, (record.path, record.name));
    }

    let mut rows = Vec::new();
    for item in encodings.iter().map_err(|e| Error::db("Failed to iterate encodings", e))? {
        let (key, value) = item.map_err(|e| Error::db("Failed to read encoding", e))?;
        let (image_id, _face_index) = key.value();
        let Some((path, name)) = owners.get(&image_id) else {
            tracing::warn!(image_id, "encoding without owning image");
            continue;
        };
        let row: EncodingRow = from_json(value.value())?;
        rows.push(StoredEncoding {
            image_id,
            face_index: row.face_index,
            embedding: row.embedding,
            region: row.region,
            confidence: row.confidence,
            path: path.clone(),
            name: name.clone(),
        });
    }
    Ok(rows)
}
