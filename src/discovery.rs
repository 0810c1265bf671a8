/// Resource discovery: turns each configured source url into concrete targets.
///
/// A url whose last path segment holds glob metacharacters names a pattern.
/// The enclosing directory is fetched as an HTML index (the classic
/// `<a href="name">` listing served by Apache, nginx `autoindex` and friends)
/// and every entry matching the glob becomes its own target.

use crate::checkpoint::FileCheckpointStore;
use crate::config::{SourceConfig, StartPosition};
use crate::error::{ConfigError, FetchError};
use crate::transport::Transport;

use globset::Glob;
use regex_lite::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// One resource to tail, with its initial policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub locator: String,
    pub start_position: StartPosition,
    pub checkpoint_path: Option<PathBuf>,
}

/// True if the last path segment of `url` is a glob rather than a name.
pub fn is_pattern(url: &str) -> bool {
    last_segment(url).contains(['*', '[', '{'])
}

/// Split a pattern url into its directory url (with trailing `/`) and glob.
pub fn split_pattern(url: &str) -> (String, String) {
    let path = url.split('?').next().unwrap_or(url);
    match path.rfind('/') {
        Some(idx) => (path[..=idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn last_segment(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// File names linked from a directory index page. Parent links, sort links
/// and subdirectories are skipped.
pub fn listing_entries(html: &str) -> Vec<String> {
    let re = match Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*"([^"]*)""#) {
        Ok(re) => re,
        Err(e) => {
            log::error!("Listing pattern failed to compile: {e}");
            return Vec::new();
        }
    };
    let mut names: Vec<String> = re
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_start_matches("./").to_string())
        .filter(|name| !name.is_empty() && !name.starts_with('?') && !name.contains('/'))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Resolve one source into targets. Listing an unreachable directory is
/// retried every `retry_delay` until it answers.
pub fn discover(
    transport: &dyn Transport,
    source: &SourceConfig,
    default_start: StartPosition,
    retry_delay: Duration,
) -> Result<Vec<Target>, ConfigError> {
    let start_position = source.start_position.unwrap_or(default_start);

    if !is_pattern(&source.url) {
        return Ok(vec![Target {
            locator: source.url.clone(),
            start_position,
            checkpoint_path: source.checkpoint_path.clone(),
        }]);
    }

    let (dir_url, pattern) = split_pattern(&source.url);
    let matcher = Glob::new(&pattern)
        .map_err(|e| ConfigError::Invalid(format!("bad pattern in {}: {e}", source.url)))?
        .compile_matcher();

    let html = loop {
        log::info!("Listing {dir_url} for {pattern}");
        match transport.fetch_listing(&dir_url) {
            Ok(body) => break body,
            Err(FetchError::Unreachable(reason)) => {
                log::error!("Listing {dir_url} failed: {reason}. Retrying in {}s", retry_delay.as_secs());
                std::thread::sleep(retry_delay);
            }
            Err(e) => {
                return Err(ConfigError::Startup {
                    locator: dir_url,
                    reason: e.to_string(),
                });
            }
        }
    };

    let targets: Vec<Target> = listing_entries(&html)
        .into_iter()
        .filter(|name| {
            let hit = matcher.is_match(name);
            log::debug!("Pattern {pattern} vs {name}: {}", if hit { "match" } else { "skip" });
            hit
        })
        .map(|name| Target {
            locator: format!("{dir_url}{name}"),
            start_position,
            checkpoint_path: None,
        })
        .collect();

    if targets.is_empty() {
        log::warn!("No entries under {dir_url} match {pattern}");
    }
    Ok(targets)
}

/// Build the checkpoint store for `targets`. Each resource may be claimed by
/// one source only, and no two resources may share a checkpoint file.
pub fn checkpoint_store(dir: PathBuf, targets: &[Target]) -> Result<FileCheckpointStore, ConfigError> {
    let mut store = FileCheckpointStore::new(dir);
    for target in targets {
        if let Some(path) = &target.checkpoint_path {
            store.set_path(&target.locator, path.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut claimed = HashSet::new();
    for target in targets {
        if !seen.insert(target.locator.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "{} is matched by more than one source",
                target.locator
            )));
        }
        let path = store.validate(&target.locator)?;
        if !claimed.insert(path.clone()) {
            return Err(ConfigError::DuplicateCheckpoint(path));
        }
    }
    Ok(store)
}
