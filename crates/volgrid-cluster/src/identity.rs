//! Node identity.
//!
//! Each daemon owns a stable identifier established at first boot and
//! persisted under the working directory. Identities never change; they
//! key every other cluster-wide relation.

use std::path::Path;

use tracing::info;
use uuid::Uuid;
use volgrid_core::{Error, Result};

const IDENTITY_FILE: &str = "uuid";

/// Loads the node identity from `workdir`, generating and persisting a
/// fresh one on first boot.
pub fn load_or_create(workdir: &Path) -> Result<Uuid> {
    let path = workdir.join(IDENTITY_FILE);

    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let id = Uuid::parse_str(content.trim()).map_err(|e| {
            Error::internal(format!("corrupt identity file {}: {e}", path.display()))
        })?;
        return Ok(id);
    }

    std::fs::create_dir_all(workdir)?;
    let id = Uuid::new_v4();
    std::fs::write(&path, format!("{id}\n"))?;
    info!(node_id = %id, path = %path.display(), "generated node identity");
    Ok(id)
}
