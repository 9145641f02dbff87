//! Request deduplication
//!
//! Reduces a batch of watch requests to the minimal set that has to be
//! watched: per correlation group, exact duplicates are dropped and requests
//! below an already watched path are folded into their parent. Symbolic
//! links are the exception, backends do not follow them when recursing, so
//! a link below a watched parent is watched on its own.

use crate::trie::PathTrie;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::trace;
use tw_core::path::{path_key, IGNORE_CASE};
use tw_core::WatchRequest;

/// Result of deduplicating a batch of requests
#[derive(Debug, Default)]
pub struct Deduplicated {
    /// Requests that need a watcher (no guaranteed order)
    pub requests: Vec<WatchRequest>,
    /// Requests dropped because their path cannot be watched
    pub unwatchable: Vec<WatchRequest>,
}

/// Remove duplicate and overlapping requests
pub async fn remove_duplicate_requests(
    mut requests: Vec<WatchRequest>,
    validate_paths: bool,
    verbose: bool,
) -> Deduplicated {
    // Shortest paths first so parents are seen before their children
    requests.sort_by_key(|request| request.path.as_os_str().len());

    // Group by correlation; a later request for the same path replaces the earlier one
    let mut groups: BTreeMap<Option<u64>, Vec<WatchRequest>> = BTreeMap::new();
    for request in requests {
        if request.excludes_everything() {
            continue;
        }

        let group = groups.entry(request.correlation_id).or_default();
        let key = path_key(&request.path);
        match group.iter_mut().find(|existing| path_key(&existing.path) == key) {
            Some(existing) => {
                if verbose {
                    trace!("ignoring a request for watching who's path is already watched: {}", request);
                }
                *existing = request;
            }
            None => group.push(request),
        }
    }

    let mut result = Deduplicated::default();
    for group in groups.into_values() {
        let mut trie = PathTrie::new(IGNORE_CASE);

        for request in group {
            if trie.find_prefix(&request.path).is_some() {
                if trie.contains(&request.path) {
                    if verbose {
                        trace!("ignoring a request for watching who's path is already watched: {}", request);
                    }
                    continue;
                }

                match tokio::fs::symlink_metadata(&request.path).await {
                    Ok(metadata) if !metadata.file_type().is_symlink() => {
                        if verbose {
                            trace!("ignoring a request for watching who's parent is already watched: {}", request);
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if verbose {
                            trace!(
                                "ignoring a request for watching who's lstat failed to resolve: {} (error: {})",
                                request,
                                e
                            );
                        }
                        result.unwatchable.push(request);
                        continue;
                    }
                }
            }

            if validate_paths && !is_path_valid(&request.path, verbose).await {
                result.unwatchable.push(request);
                continue;
            }

            trie.insert(&request.path.clone(), request);
        }

        result.requests.extend(trie.into_values());
    }

    result
}

/// Check that a path exists and is a directory
async fn is_path_valid(path: &Path, verbose: bool) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => true,
        Ok(_) => {
            if verbose {
                trace!("ignoring a path for watching that is a file and not a folder: {}", path.display());
            }
            false
        }
        Err(e) => {
            if verbose {
                trace!(
                    "ignoring a path for watching who's stat info failed to resolve: {} (error: {})",
                    path.display(),
                    e
                );
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn paths(requests: &[WatchRequest]) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = requests.iter().map(|r| r.path.clone()).collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_child_folded_into_parent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();

        let result = remove_duplicate_requests(
            vec![
                WatchRequest::new(&sub).with_correlation(1),
                WatchRequest::new(&root).with_correlation(1),
            ],
            true,
            false,
        )
        .await;

        assert_eq!(paths(&result.requests), vec![root]);
        assert!(result.unwatchable.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_child_kept() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("ws");
        let target = temp_dir.path().join("target");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&target).unwrap();
        let link = root.join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = remove_duplicate_requests(
            vec![WatchRequest::new(&root), WatchRequest::new(&link)],
            true,
            false,
        )
        .await;

        assert_eq!(paths(&result.requests), vec![root, link]);
    }

    #[tokio::test]
    async fn test_groups_deduplicated_independently() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();

        let result = remove_duplicate_requests(
            vec![
                WatchRequest::new(&root).with_correlation(1),
                WatchRequest::new(&sub).with_correlation(2),
                WatchRequest::new(&root),
                WatchRequest::new(&root),
            ],
            true,
            false,
        )
        .await;

        assert_eq!(result.requests.len(), 3);
        assert!(result.requests.iter().any(|r| r.correlation_id == Some(2)));
        assert_eq!(
            result.requests.iter().filter(|r| r.correlation_id.is_none()).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_later_duplicate_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        let result = remove_duplicate_requests(
            vec![
                WatchRequest::new(&root).with_excludes(["a"]),
                WatchRequest::new(&root).with_excludes(["b"]),
            ],
            true,
            false,
        )
        .await;

        assert_eq!(result.requests.len(), 1);
        assert_eq!(result.requests[0].excludes, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_fully_excluded_request_dropped() {
        let temp_dir = TempDir::new().unwrap();

        let result = remove_duplicate_requests(
            vec![WatchRequest::new(temp_dir.path()).with_excludes(["**"])],
            true,
            false,
        )
        .await;

        assert!(result.requests.is_empty());
        assert!(result.unwatchable.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_paths_reported() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let missing = temp_dir.path().join("missing");

        let result = remove_duplicate_requests(
            vec![WatchRequest::new(&file), WatchRequest::new(&missing)],
            true,
            false,
        )
        .await;

        assert!(result.requests.is_empty());
        assert_eq!(paths(&result.unwatchable), {
            let mut expected = vec![file, missing];
            expected.sort();
            expected
        });
    }

    #[tokio::test]
    async fn test_missing_child_of_watched_parent_reported() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let missing = root.join("missing");

        let result = remove_duplicate_requests(
            vec![WatchRequest::new(&root), WatchRequest::new(&missing)],
            true,
            false,
        )
        .await;

        assert_eq!(paths(&result.requests), vec![root]);
        assert_eq!(paths(&result.unwatchable), vec![missing]);
    }

    #[tokio::test]
    async fn test_validation_can_be_skipped() {
        let result = remove_duplicate_requests(
            vec![WatchRequest::new("/definitely/not/here")],
            false,
            false,
        )
        .await;

        assert_eq!(result.requests.len(), 1);
    }
}
