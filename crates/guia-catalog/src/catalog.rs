use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CatalogError;

/// `areas.json` — the catalog index. Extra keys are preserved because the
/// raw document is served as-is to clients.
#[derive(Debug, Deserialize)]
struct AreasDoc {
    #[serde(default)]
    areas: Vec<AreaEntry>,
    #[serde(default)]
    pros: BTreeMap<String, ProcedureEntry>,
}

#[derive(Debug, Deserialize)]
struct AreaEntry {
    id: String,
    #[serde(default)]
    pros: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProcedureEntry {
    nombre: String,
    /// Entry step id within the step graph.
    inicio: String,
    /// Step-graph document filename under `nodos/`.
    nodos: String,
    #[serde(default)]
    flow_order: Vec<String>,
}

/// A resolved procedure: display metadata plus its step graph.
///
/// The graph itself stays opaque — only node ids (for transition validation)
/// and step titles (for assistant prompts) are indexed.
#[derive(Debug)]
pub struct Procedure {
    pub pro_id: String,
    pub nombre: String,
    pub entry_node: String,
    pub node_ids: BTreeSet<String>,
    pub step_titles: Vec<String>,
    graph: Arc<Value>,
}

impl Procedure {
    pub fn graph(&self) -> Arc<Value> {
        Arc::clone(&self.graph)
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.node_ids.contains(node_id)
    }
}

struct CatalogData {
    document: Arc<Value>,
    procedures: BTreeMap<String, Arc<Procedure>>,
}

/// Read-only index of areas and procedures, loaded from a directory of
/// static JSON documents (`areas.json` plus one step graph per procedure
/// under `nodos/`).
///
/// Loaded once at startup; `reload` swaps in a fresh snapshot atomically and
/// keeps the previous one live if loading fails. Reads never block each
/// other — callers get an `Arc` into the current snapshot.
pub struct Catalog {
    dir: PathBuf,
    inner: RwLock<Arc<CatalogData>>,
}

impl Catalog {
    /// Load the catalog from `dir`. Missing or malformed documents are a
    /// fatal startup condition.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let dir = dir.into();
        let data = load_dir(&dir)?;
        info!(
            dir = %dir.display(),
            procedures = data.procedures.len(),
            "catalog loaded"
        );
        Ok(Self {
            dir,
            inner: RwLock::new(Arc::new(data)),
        })
    }

    /// Re-read the catalog directory and swap the snapshot. On failure the
    /// previous snapshot stays in place and the error is returned.
    pub fn reload(&self) -> Result<(), CatalogError> {
        match load_dir(&self.dir) {
            Ok(data) => {
                let procedures = data.procedures.len();
                *self.inner.write() = Arc::new(data);
                info!(procedures, "catalog reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "catalog reload failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Resolve a procedure id. `None` is not an error — callers fall back to
    /// legacy defaults.
    pub fn resolve(&self, pro_id: &str) -> Option<Arc<Procedure>> {
        self.inner.read().procedures.get(pro_id).map(Arc::clone)
    }

    /// The raw step-graph document for a procedure.
    pub fn step_graph(&self, pro_id: &str) -> Option<Arc<Value>> {
        self.resolve(pro_id).map(|p| p.graph())
    }

    /// The full areas+procedures index, as read from disk.
    pub fn document(&self) -> Arc<Value> {
        Arc::clone(&self.inner.read().document)
    }
}

fn load_dir(dir: &Path) -> Result<CatalogData, CatalogError> {
    let areas_path = dir.join("areas.json");
    let raw = std::fs::read_to_string(&areas_path)
        .map_err(|e| CatalogError::Io(format!("{}: {e}", areas_path.display())))?;

    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| CatalogError::Parse(format!("{}: {e}", areas_path.display())))?;
    let doc: AreasDoc = serde_json::from_value(document.clone())
        .map_err(|e| CatalogError::Invalid(format!("{}: {e}", areas_path.display())))?;

    // Every procedure referenced from an area must exist in the index.
    for area in &doc.areas {
        for pro_id in &area.pros {
            if !doc.pros.contains_key(pro_id) {
                return Err(CatalogError::Invalid(format!(
                    "area {} references unknown procedure {pro_id}",
                    area.id
                )));
            }
        }
    }

    let mut procedures = BTreeMap::new();
    for (pro_id, entry) in doc.pros {
        let procedure = load_procedure(dir, &pro_id, &entry)?;
        procedures.insert(pro_id, Arc::new(procedure));
    }

    Ok(CatalogData {
        document: Arc::new(document),
        procedures,
    })
}

fn load_procedure(
    dir: &Path,
    pro_id: &str,
    entry: &ProcedureEntry,
) -> Result<Procedure, CatalogError> {
    let graph_path = dir.join("nodos").join(&entry.nodos);
    let raw = std::fs::read_to_string(&graph_path)
        .map_err(|e| CatalogError::Io(format!("{}: {e}", graph_path.display())))?;
    let graph: Value = serde_json::from_str(&raw)
        .map_err(|e| CatalogError::Parse(format!("{}: {e}", graph_path.display())))?;

    let nodes = graph.as_object().ok_or_else(|| {
        CatalogError::Invalid(format!("{pro_id}: step graph must be an object"))
    })?;

    if !nodes.contains_key(&entry.inicio) {
        return Err(CatalogError::Invalid(format!(
            "{pro_id}: entry step {} not present in step graph",
            entry.inicio
        )));
    }

    let node_ids: BTreeSet<String> = nodes.keys().cloned().collect();

    // Titles in walk order when the index declares one, map order otherwise.
    let step_titles: Vec<String> = if entry.flow_order.is_empty() {
        nodes
            .values()
            .filter_map(|n| n.get("titulo").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    } else {
        entry
            .flow_order
            .iter()
            .filter_map(|id| nodes.get(id))
            .filter_map(|n| n.get("titulo").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    };

    Ok(Procedure {
        pro_id: pro_id.to_owned(),
        nombre: entry.nombre.clone(),
        entry_node: entry.inicio.clone(),
        node_ids,
        step_titles,
        graph: Arc::new(graph),
    })
}
