// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Seitenwerk page scheduler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A source image: a file on disk plus the page number inside it
/// (multi-page TIFFs carry several images in one file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId {
    pub path: PathBuf,
    pub page: u32,
}

impl ImageId {
    pub fn new(path: impl Into<PathBuf>, page: u32) -> Self {
        Self {
            path: path.into(),
            page,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Which part of a source image a logical page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubPage {
    /// The whole image is one page.
    Single,
    /// Left half of a two-page spread.
    Left,
    /// Right half of a two-page spread.
    Right,
}

impl SubPage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Identifies one logical page. Immutable; used as the queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub image: ImageId,
    pub sub_page: SubPage,
}

impl PageId {
    pub fn new(image: ImageId, sub_page: SubPage) -> Self {
        Self { image, sub_page }
    }

    /// Shorthand for a single-page image.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::new(ImageId::new(path, 0), SubPage::Single)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}/{}",
            self.image.path.display(),
            self.image.page,
            self.sub_page.as_str()
        )
    }
}

/// Unique identifier for one scheduled task.
///
/// A page may be queued many times over a session; results are matched to
/// their queue entry by task id so a stale run never completes a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a task was scheduled by user focus or by a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskMode {
    Interactive,
    Batch,
}

/// The project's pages in reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSequence {
    pages: Vec<PageId>,
}

impl PageSequence {
    /// Build a sequence, dropping repeated ids (first occurrence wins).
    pub fn new(pages: impl IntoIterator<Item = PageId>) -> Self {
        let mut seen = HashSet::new();
        let pages = pages
            .into_iter()
            .filter(|page| seen.insert(page.clone()))
            .collect();
        Self { pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageId> {
        self.pages.iter()
    }

    pub fn contains(&self, page: &PageId) -> bool {
        self.position(page).is_some()
    }

    pub fn position(&self, page: &PageId) -> Option<usize> {
        self.pages.iter().position(|p| p == page)
    }

    pub fn get(&self, index: usize) -> Option<&PageId> {
        self.pages.get(index)
    }

    pub fn first(&self) -> Option<&PageId> {
        self.pages.first()
    }

    pub fn last(&self) -> Option<&PageId> {
        self.pages.last()
    }

    /// Every page, starting at `leader` and wrapping forward through the
    /// rest of the sequence. An absent or unknown leader starts at the
    /// first page.
    pub fn wrapped_from(&self, leader: Option<&PageId>) -> Vec<PageId> {
        let start = leader.and_then(|p| self.position(p)).unwrap_or(0);
        self.pages[start..]
            .iter()
            .chain(self.pages[..start].iter())
            .cloned()
            .collect()
    }

    /// Remove the given pages, returning how many were present.
    pub fn remove(&mut self, pages: &HashSet<PageId>) -> usize {
        let before = self.pages.len();
        self.pages.retain(|p| !pages.contains(p));
        before - self.pages.len()
    }
}
