use std::collections::{BTreeSet, HashMap};

use common::join_rel;
use tokio_util::sync::CancellationToken;

use crate::config::{BonusMatcher, SyncConfig};
use crate::fs::DirEntryNode;
use crate::progress::ProgressTracker;

/// Media files by directory, plus the bonus directory names seen anywhere.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanResult {
    /// Directory relpath (`""` for the root) to sorted media file names.
    pub files: HashMap<String, Vec<String>>,
    pub bonus_dirs: BTreeSet<String>,
    pub main_file_count: usize,
    pub bonus_file_count: usize,
}

impl ScanResult {
    pub fn files_in(&self, dir: &str) -> &[String] {
        self.files.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_files(&self) -> usize {
        self.main_file_count + self.bonus_file_count
    }
}

pub struct Scanner<'a> {
    config: &'a SyncConfig,
    bonus: &'a BonusMatcher,
    cancel: &'a CancellationToken,
    progress: Option<&'a ProgressTracker>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        config: &'a SyncConfig,
        bonus: &'a BonusMatcher,
        cancel: &'a CancellationToken,
        progress: Option<&'a ProgressTracker>,
    ) -> Self {
        Self {
            config,
            bonus,
            cancel,
            progress,
        }
    }

    /// Classifies the listing. Returns `None` when cancelled.
    pub fn scan(&self, root: &DirEntryNode) -> Option<ScanResult> {
        let mut result = ScanResult::default();
        if !self.walk(root, "", false, &mut result) {
            return None;
        }
        for names in result.files.values_mut() {
            names.sort();
        }
        Some(result)
    }

    fn walk(&self, node: &DirEntryNode, dir: &str, in_bonus: bool, out: &mut ScanResult) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        for child in &node.children {
            if child.name.starts_with('.') || child.is_symlink {
                continue;
            }
            if child.is_directory {
                let is_bonus = self.bonus.is_bonus_dir(&child.name);
                if is_bonus {
                    out.bonus_dirs.insert(child.name.clone());
                }
                let path = join_rel(dir, &child.name);
                if !self.walk(child, &path, in_bonus || is_bonus, out) {
                    return false;
                }
                continue;
            }
            if self.config.is_backup_file(&child.name) || !self.config.is_media_file(&child.name) {
                continue;
            }
            out.files
                .entry(dir.to_string())
                .or_default()
                .push(child.name.clone());
            if in_bonus {
                out.bonus_file_count += 1;
            } else {
                out.main_file_count += 1;
            }
            if let Some(progress) = self.progress {
                progress.advance(1.0);
            }
        }
        true
    }
}
