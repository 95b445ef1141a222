use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;

const FILE_PREFIX: &str = "keys_pool_";
const FILE_SUFFIX: &str = ".env";

/// Scan `dir` for `keys_pool_<provider>.env` files and return the secrets
/// per provider, preserving file order. Blank and whitespace-only lines
/// are ignored. A missing directory yields an empty map.
pub fn load_keys_dir(dir: &Path) -> Result<HashMap<String, Vec<String>>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();

    if !dir.is_dir() {
        warn!(dir = %dir.display(), "keys directory does not exist, starting with an empty pool");
        return Ok(out);
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(provider) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
        else {
            continue;
        };
        if provider.is_empty() {
            continue;
        }

        let content = std::fs::read_to_string(&path)?;
        let secrets: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        info!(provider, count = secrets.len(), "loaded credential file");
        out.insert(provider.to_string(), secrets);
    }

    Ok(out)
}
