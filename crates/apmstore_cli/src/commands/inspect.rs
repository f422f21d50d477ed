//! Inspect command implementation.

use super::list::format_bytes;
use apmstore_channel::{ChannelBackend, FileBackend};
use apmstore_core::{
    IndexEntry, PersistedIndex, StorageData, StorageRoot, CHANNEL_EXTENSION, INDEX_EXTENSION,
};
use serde::Serialize;
use std::path::Path;

/// Storage inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage metadata.
    pub storage: StorageData,
    /// Persisted index generations.
    pub generations: Vec<GenerationStats>,
    /// Channel files.
    pub channels: Vec<ChannelStats>,
    /// Total number of indexed records.
    pub record_count: usize,
}

/// Statistics for one persisted index generation.
#[derive(Debug, Serialize)]
pub struct GenerationStats {
    /// Index file name.
    pub file: String,
    /// Generation sequence number.
    pub generation: u64,
    /// Channel holding the records.
    pub channel_id: u32,
    /// Number of indexed records.
    pub record_count: usize,
    /// Indexed bytes.
    pub data_size: u64,
    /// Entries (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<IndexEntry>>,
}

/// Statistics for one channel file.
#[derive(Debug, Serialize)]
pub struct ChannelStats {
    /// Channel file name.
    pub file: String,
    /// File size in bytes.
    pub size: u64,
}

/// Collects the inspection result for one storage.
pub fn inspect(
    root: &StorageRoot,
    id: &str,
    with_entries: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let storage = root
        .load_metadata(id)?
        .ok_or_else(|| format!("No storage {} found under {:?}", id, root.path()))?;

    let mut generations = Vec::new();
    for path in root.files_with_extension(id, INDEX_EXTENSION)? {
        let index = PersistedIndex::load(&path)?;
        generations.push(GenerationStats {
            file: file_name(&path),
            generation: index.generation,
            channel_id: index.channel_id,
            record_count: index.entries.len(),
            data_size: index.entries.iter().map(|entry| entry.length).sum(),
            entries: with_entries.then(|| index.entries.clone()),
        });
    }
    generations.sort_by_key(|generation| generation.generation);

    let mut channels = Vec::new();
    for path in root.files_with_extension(id, CHANNEL_EXTENSION)? {
        let backend = FileBackend::open_existing(&path)?;
        channels.push(ChannelStats {
            file: file_name(&path),
            size: backend.size()?,
        });
    }

    let record_count = generations.iter().map(|generation| generation.record_count).sum();
    Ok(InspectResult {
        storage,
        generations,
        channels,
        record_count,
    })
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    id: &str,
    with_entries: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = StorageRoot::open_read_only(path)?;
    let result = inspect(&root, id, with_entries)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn print_text_output(result: &InspectResult) {
    let storage = &result.storage;
    println!("Storage: {}", storage.name);
    println!("  Id:          {}", storage.id());
    println!("  State:       {}", storage.state());
    if let Some(description) = &storage.description {
        println!("  Description: {}", description);
    }
    println!("  Version:     {}", storage.server_version);
    println!("  Disk size:   {}", format_bytes(storage.disk_size));
    if !storage.labels.is_empty() {
        let labels: Vec<&str> = storage.labels.iter().map(String::as_str).collect();
        println!("  Labels:      {}", labels.join(", "));
    }
    println!("  Records:     {}", result.record_count);

    println!();
    println!("Index generations: {}", result.generations.len());
    for generation in &result.generations {
        println!(
            "  #{:<4} channel {:<10}  {:>8} records  {:>12}  {}",
            generation.generation,
            generation.channel_id,
            generation.record_count,
            format_bytes(generation.data_size),
            generation.file
        );
        if let Some(entries) = &generation.entries {
            for entry in entries {
                println!(
                    "      record {:<20} offset {:<12} length {}",
                    entry.record_id, entry.offset, entry.length
                );
            }
        }
    }

    println!();
    println!("Channels: {}", result.channels.len());
    for channel in &result.channels {
        println!("  {:<24} {:>12}", channel.file, format_bytes(channel.size));
    }
}
