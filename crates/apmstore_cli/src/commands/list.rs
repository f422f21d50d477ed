//! List command implementation.

use apmstore_core::{StorageData, StorageRoot};
use std::path::Path;

/// Runs the list command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let root = StorageRoot::open_read_only(path)?;
    let storages = root.list_metadata()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&storages)?);
        }
        _ => {
            print_text_output(&storages);
        }
    }

    Ok(())
}

fn print_text_output(storages: &[StorageData]) {
    if storages.is_empty() {
        println!("No storages found");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:>12}  {:<8}  NAME",
        "ID", "STATE", "SIZE", "VERSION"
    );
    for storage in storages {
        println!(
            "{:<36}  {:<10}  {:>12}  {:<8}  {}",
            storage.id(),
            storage.state().to_string(),
            format_bytes(storage.disk_size),
            storage.server_version,
            storage.name
        );
    }
    println!();
    println!("{} storage(s)", storages.len());
}

/// Formats a byte count for humans.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
