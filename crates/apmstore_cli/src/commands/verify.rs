//! Verify command implementation.

use apmstore_channel::{ChannelBackend, FileBackend};
use apmstore_codec::from_cbor;
use apmstore_core::{DataRecord, PersistedIndex, StorageRoot, CHANNEL_EXTENSION, INDEX_EXTENSION};
use std::path::Path;

/// Verification result for one storage.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of index entries checked.
    pub records_checked: usize,
    /// Number of valid entries.
    pub valid_records: usize,
    /// Number of entries pointing outside their channel or to undecodable bytes.
    pub corrupt_records: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            records_checked: 0,
            valid_records: 0,
            corrupt_records: 0,
            errors: Vec::new(),
        }
    }

    /// True if nothing was wrong.
    pub fn is_ok(&self) -> bool {
        self.corrupt_records == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, id: Option<&str>, decode: bool) -> Result<(), Box<dyn std::error::Error>> {
    let root = StorageRoot::open_read_only(path)?;
    println!("Verifying storages at {:?}", path);
    println!();

    let ids: Vec<String> = match id {
        Some(id) => vec![id.to_string()],
        None => root
            .list_metadata()?
            .iter()
            .map(|storage| storage.id().to_string())
            .collect(),
    };

    let mut all_ok = true;
    for id in &ids {
        let result = verify_storage(&root, id, decode)?;
        print_result(id, &result);
        all_ok &= result.is_ok();
    }

    println!();
    if all_ok {
        println!("✓ Verification passed ({} storage(s))", ids.len());
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every persisted index entry of one storage against its channel file.
pub fn verify_storage(
    root: &StorageRoot,
    id: &str,
    decode: bool,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::new();
    if root.load_metadata(id)?.is_none() {
        result.errors.push(format!("storage {} has no metadata", id));
        return Ok(result);
    }

    let dir = root.storage_dir(id);
    for path in root.files_with_extension(id, INDEX_EXTENSION)? {
        let index = match PersistedIndex::load(&path) {
            Ok(index) => index,
            Err(e) => {
                result.errors.push(format!("unreadable index {:?}: {}", path, e));
                continue;
            }
        };

        let channel_path = dir.join(format!("{}.{}", index.channel_id, CHANNEL_EXTENSION));
        if !channel_path.exists() {
            result.errors.push(format!(
                "index {:?} refers to missing channel {}",
                path, index.channel_id
            ));
            result.records_checked += index.entries.len();
            result.corrupt_records += index.entries.len();
            continue;
        }
        let channel = FileBackend::open_existing(&channel_path)?;
        let channel_size = channel.size()?;

        for entry in &index.entries {
            result.records_checked += 1;
            let end = entry.offset.saturating_add(entry.length);
            if entry.length == 0 || end > channel_size {
                result.corrupt_records += 1;
                result.errors.push(format!(
                    "record {} at {}+{} exceeds channel {} of {} bytes",
                    entry.record_id, entry.offset, entry.length, index.channel_id, channel_size
                ));
                continue;
            }

            if decode {
                let bytes = channel.read_at(entry.offset, entry.length as usize)?;
                match from_cbor::<DataRecord>(&bytes) {
                    Ok(record) if record.id == entry.record_id => {}
                    Ok(record) => {
                        result.corrupt_records += 1;
                        result.errors.push(format!(
                            "record {} decodes as record {}",
                            entry.record_id, record.id
                        ));
                        continue;
                    }
                    Err(e) => {
                        result.corrupt_records += 1;
                        result
                            .errors
                            .push(format!("record {} does not decode: {}", entry.record_id, e));
                        continue;
                    }
                }
            }
            result.valid_records += 1;
        }
    }

    Ok(result)
}

fn print_result(id: &str, result: &VerifyResult) {
    println!("  {}:", id);
    println!("    Records checked: {}", result.records_checked);
    println!("    Valid records: {}", result.valid_records);
    println!("    Corrupt records: {}", result.corrupt_records);

    if !result.errors.is_empty() {
        println!("    Errors:");
        for (i, error) in result.errors.iter().take(10).enumerate() {
            println!("      {}. {}", i + 1, error);
        }
        if result.errors.len() > 10 {
            println!("      ... and {} more errors", result.errors.len() - 10);
        }
    }
}
