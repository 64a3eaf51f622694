//! Registry loader
//!
//! Walks the declarative configuration tree:
//!
//! ```text
//! sources/
//!   google/
//!     _source.yaml
//!     google_calendar/
//!       _stream.yaml
//!       google_calendar_events/
//!         _signal.yaml
//! ```
//!
//! Directory names are authoritative for entity names; the YAML records
//! carry everything else. Semantic streams (`output: semantics`) get a
//! derived semantic descriptor unless the stream directory carries an
//! explicit `_semantic.yaml`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{
    Registry, SemanticDescriptor, SignalDescriptor, SourceDescriptor, StreamDescriptor,
    StreamOutput,
};
use crate::error::{Error, Result};

const SOURCE_FILE: &str = "_source.yaml";
const STREAM_FILE: &str = "_stream.yaml";
const SIGNAL_FILE: &str = "_signal.yaml";
const SEMANTIC_FILE: &str = "_semantic.yaml";

/// Load and compile the registry from a `sources/` directory tree.
pub fn load_registry(root: &Path) -> Result<Registry> {
    if !root.is_dir() {
        return Err(Error::Configuration(format!(
            "registry root is not a directory: {}",
            root.display()
        )));
    }

    let mut sources = HashMap::new();
    let mut streams = HashMap::new();
    let mut signals = HashMap::new();
    let mut semantics = HashMap::new();

    for source_dir in subdirectories(root)? {
        let source_name = dir_name(&source_dir)?;
        let mut source: SourceDescriptor = read_yaml(&source_dir.join(SOURCE_FILE))?;
        source.name = source_name.clone();
        if source.display_name.is_empty() {
            source.display_name = source_name.clone();
        }

        for stream_dir in subdirectories(&source_dir)? {
            let stream_name = dir_name(&stream_dir)?;
            let mut stream: StreamDescriptor = read_yaml(&stream_dir.join(STREAM_FILE))?;
            stream.name = stream_name.clone();
            stream.source_name = source_name.clone();
            stream.signals.clear();

            for signal_dir in subdirectories(&stream_dir)? {
                let signal_name = dir_name(&signal_dir)?;
                let mut signal: SignalDescriptor = read_yaml(&signal_dir.join(SIGNAL_FILE))?;
                signal.name = signal_name.clone();
                signal.stream_name = stream_name.clone();
                signal.source_name = source_name.clone();
                stream.signals.push(signal_name.clone());
                if signals.insert(signal_name.clone(), signal).is_some() {
                    return Err(Error::Configuration(format!(
                        "duplicate signal '{signal_name}'"
                    )));
                }
            }
            stream.signals.sort();

            if stream.output == StreamOutput::Semantics {
                let semantic_path = stream_dir.join(SEMANTIC_FILE);
                let semantic = if semantic_path.is_file() {
                    let mut s: SemanticDescriptor = read_yaml(&semantic_path)?;
                    s.stream_name = stream_name.clone();
                    s.source_name = source_name.clone();
                    s
                } else {
                    SemanticDescriptor {
                        name: stream_name.clone(),
                        stream_name: stream_name.clone(),
                        source_name: source_name.clone(),
                        description: stream.description.clone(),
                    }
                };
                semantics.insert(semantic.name.clone(), semantic);
            }

            if streams.insert(stream_name.clone(), stream).is_some() {
                return Err(Error::Configuration(format!(
                    "duplicate stream '{stream_name}'"
                )));
            }
        }

        if sources.insert(source_name.clone(), source).is_some() {
            return Err(Error::Configuration(format!(
                "duplicate source '{source_name}'"
            )));
        }
    }

    tracing::info!(
        sources = sources.len(),
        streams = streams.len(),
        signals = signals.len(),
        semantics = semantics.len(),
        "Registry loaded"
    );

    Ok(Registry::new(sources, streams, signals, semantics))
}

fn subdirectories(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| Error::Configuration(format!("unreadable directory name: {}", path.display())))
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Configuration(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::Configuration(format!("invalid yaml in {}: {e}", path.display())))
}
