use std::env;
use std::fs::File;
use std::process;

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::hfsplus::{
    btree::{catalog::CatalogRecord, WalkEvent},
    data_source::{DataSource, DataSourceError},
    layout::{CatalogKey, CatalogNodeId},
    HfsPlus, HfsPlusError,
};

mod hfsplus;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hfsplus_utils=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(input_path) = env::args().nth(1) else {
        error!("Input file not specified");
        eprintln!("usage: hfsplus_utils <volume-image> [<parent-cnid>]");
        process::exit(2);
    };
    let parent_id = match env::args().nth(2).map(|arg| arg.parse::<CatalogNodeId>()) {
        None => None,
        Some(Ok(parent_id)) => Some(parent_id),
        Some(Err(e)) => {
            error!("Invalid parent CNID: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(&input_path, parent_id) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(input_path: &str, parent_id: Option<CatalogNodeId>) -> Result<(), HfsPlusError> {
    let volume_file = File::open(input_path).map_err(|e| {
        error!("Cannot open {}: {}", input_path, e);
        DataSourceError::ReadDataError
    })?;
    let data_source = DataSource::from_source(volume_file);

    let mut hfs = HfsPlus::new(&data_source)?;
    hfs.init_btrees()?;
    let catalog = hfs.catalog()?;

    match parent_id {
        None => {
            for event in catalog.btree.walk() {
                print_event(&event);
            }
        }
        Some(parent_id) => {
            match catalog.path_of(parent_id)? {
                Some(path) => println!("{} ({})", path, parent_id),
                None => println!("<no thread record> ({})", parent_id),
            }
            for (key, record) in catalog.children(parent_id)? {
                print_record(&key, &record);
            }
        }
    }
    Ok(())
}

fn print_event(event: &WalkEvent<CatalogKey, CatalogRecord>) {
    match event {
        WalkEvent::IndexNode { node, records } => {
            println!("Node {} is an index node with {} records", node, records)
        }
        WalkEvent::IndexRecord {
            record, key, child, ..
        } => println!(
            "  Record {}: parent {}, \"{}\" -> node {}",
            record,
            key.parent_id,
            key.name(),
            child
        ),
        WalkEvent::LeafNode {
            node,
            forward_link,
            records,
        } => println!(
            "Node {} is a leaf node with {} records, next leaf {}",
            node, records, forward_link
        ),
        WalkEvent::LeafRecord { key, value, .. } => print_record(key, value),
        WalkEvent::HeaderNode { node } => println!("Node {} is a header node", node),
        WalkEvent::MapNode { node } => println!("Node {} is a map node", node),
        WalkEvent::Warning {
            node,
            record,
            warning,
        } => match record {
            Some(record) => println!("  Node {} record {}: {:?}", node, record, warning),
            None => println!("  Node {}: {:?}", node, warning),
        },
    }
}

fn print_record(key: &CatalogKey, record: &CatalogRecord) {
    let name = key.name();
    match record {
        CatalogRecord::Folder(folder) => println!(
            "\tFolder \"{}\": CNID {}, parent {}, {} items",
            name, folder.folder_id, key.parent_id, folder.valence
        ),
        CatalogRecord::File(file) => println!(
            "\tFile \"{}\": CNID {}, parent {}, {} bytes",
            name, file.file_id, key.parent_id, file.data_fork.logical_size
        ),
        CatalogRecord::FolderThread(thread) => println!(
            "\tFolder thread: CNID {} is \"{}\" in {}",
            key.parent_id,
            thread.node_name.to_string_lossy(),
            thread.parent_id
        ),
        CatalogRecord::FileThread(thread) => println!(
            "\tFile thread: CNID {} is \"{}\" in {}",
            key.parent_id,
            thread.node_name.to_string_lossy(),
            thread.parent_id
        ),
        CatalogRecord::Unknown(record_type) => {
            println!("\tUnknown record type {:#06x}", record_type)
        }
    }
}
