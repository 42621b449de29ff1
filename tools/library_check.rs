use std::collections::BTreeMap;
use std::env;

use common::{LibraryItem, VideoLibrary};
use library::{JsonFileStorage, LibraryStorage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Counts {
    by_type: BTreeMap<String, usize>,
    aliases: usize,
    hidden: usize,
    errors: usize,
    with_stream: usize,
}

fn count(items: &[LibraryItem], in_alias: bool, counts: &mut Counts) {
    for item in items {
        let alias = in_alias || item.is_alias() || item.is_alias_only();
        if alias {
            counts.aliases += 1;
        } else {
            *counts.by_type.entry(format!("{:?}", item.kind)).or_default() += 1;
            if item.hide == Some(true) {
                counts.hidden += 1;
            }
            if item.error.is_some() {
                counts.errors += 1;
            }
            if item.stream_uri.is_some() {
                counts.with_stream += 1;
            }
        }
        count(item.children(), alias, counts);
    }
}

fn report(library: &VideoLibrary) {
    let mut counts = Counts::default();
    count(&library.array, false, &mut counts);

    println!(
        "Status: {:?} ({:.1}%), last update {}",
        library.status, library.progress, library.last_update
    );
    println!(
        "Files: {} main, {} bonus",
        library.main_file_count, library.bonus_file_count
    );
    println!("Top-level items: {}", library.array.len());
    for (kind, total) in &counts.by_type {
        println!("  {:<14} {}", kind, total);
    }
    println!("Alias nodes: {}", counts.aliases);
    println!("Hidden: {}", counts.hidden);
    println!("With stream: {}", counts.with_stream);
    println!("With errors: {}", counts.errors);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("LIBRARY_PATH").ok())
        .unwrap_or_else(|| "library.json".to_string());

    let storage = JsonFileStorage::new(&path);
    info!("Reading {}", storage.path().display());
    let library = storage
        .load()
        .await?
        .ok_or_else(|| format!("no library file at {}", path))?;
    report(&library);
    Ok(())
}
