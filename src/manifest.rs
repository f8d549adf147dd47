use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::unit::{Unit, UnitKind};

/// Reads a JSON array of resolved units, as written by the download step.
pub async fn load(path: &Path) -> Result<Vec<Unit>> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read manifest {}: {}", path.display(), e))?;

    let units = parse(&data)
        .map_err(|e| anyhow!("Invalid manifest {}: {}", path.display(), e))?;

    info!("Loaded {} links from {}", units.len(), path.display());
    Ok(units)
}

/// Parses and validates a manifest. Preview and page names must not collide,
/// since they share the root directory.
pub fn parse(data: &str) -> Result<Vec<Unit>> {
    let units: Vec<Unit> = serde_json::from_str(data)?;

    let mut top_level_names = HashSet::new();
    for (index, unit) in units.iter().enumerate() {
        unit.validate()
            .map_err(|e| anyhow!("link #{} (\"{}\"): {}", index + 1, unit.source_link, e))?;

        let top_level = match unit.kind() {
            UnitKind::Book => Some(unit.display_name.as_str()),
            UnitKind::Preview | UnitKind::Page => Some(unit.sub_units[0].name.as_str()),
            UnitKind::Unresolved => {
                debug!("Link #{} is unresolved and will be skipped", index + 1);
                None
            }
        };

        if let Some(name) = top_level {
            if !top_level_names.insert(name) {
                return Err(anyhow!(
                    "link #{} (\"{}\"): directory \"{}\" is already used by another link",
                    index + 1,
                    unit.source_link,
                    name
                ));
            }
        }
    }

    Ok(units)
}
