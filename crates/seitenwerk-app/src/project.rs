// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Project loading: the page sequence from an input directory and the
// scheduler configuration from an optional JSON file.

use std::path::{Path, PathBuf};

use seitenwerk_core::config::SchedulerConfig;
use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::{ImageId, PageId, PageSequence, SubPage};
use tracing::{debug, info, instrument, warn};

/// File extensions picked up as page images.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Collect the images in `dir`, sorted by file name, as a page sequence.
/// With `spreads` every image contributes a left and a right page.
#[instrument(skip_all, fields(dir = %dir.display(), spreads = spreads))]
pub fn scan_pages(dir: &Path, spreads: bool) -> Result<PageSequence> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_page_image(path))
        .collect();
    files.sort();

    let pages = files.into_iter().flat_map(|path| {
        let image = ImageId::new(path, 0);
        if spreads {
            vec![
                PageId::new(image.clone(), SubPage::Left),
                PageId::new(image, SubPage::Right),
            ]
        } else {
            vec![PageId::new(image, SubPage::Single)]
        }
    });
    let sequence = PageSequence::new(pages);

    info!(pages = sequence.len(), "project pages collected");
    Ok(sequence)
}

/// Read the scheduler configuration.  No path means defaults; a path that
/// cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let Some(path) = path else {
        debug!("no config file given, using defaults");
        return Ok(SchedulerConfig::default());
    };

    let data = std::fs::read_to_string(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "config file unreadable");
        SeitenwerkError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = SchedulerConfig::from_json(&data)?;
    info!(path = %path.display(), "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").expect("write file");
    }

    #[test]
    fn scan_pages_sorts_and_filters() {
        let dir = tempfile::tempdir().expect("temp dir");
        touch(dir.path(), "002.png");
        touch(dir.path(), "001.TIF");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("sub.png")).expect("mkdir");

        let pages = scan_pages(dir.path(), false).expect("scan");
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.image.path().file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, [Some("001.TIF".to_string()), Some("002.png".to_string())]);
        assert!(pages.iter().all(|p| p.sub_page == SubPage::Single));
    }

    #[test]
    fn spreads_yield_two_pages_per_image() {
        let dir = tempfile::tempdir().expect("temp dir");
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.jpg");

        let pages = scan_pages(dir.path(), true).expect("scan");
        assert_eq!(pages.len(), 4);
        let sides: Vec<_> = pages.iter().map(|p| p.sub_page).collect();
        assert_eq!(
            sides,
            [SubPage::Left, SubPage::Right, SubPage::Left, SubPage::Right]
        );
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = scan_pages(&dir.path().join("nope"), false);
        assert!(matches!(result, Err(SeitenwerkError::Io(_))));
    }

    #[test]
    fn no_config_path_gives_defaults() {
        let config = load_config(None).expect("defaults");
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("seitenwerk.json");
        std::fs::write(&path, r#"{ "worker_threads": 3, "terminal_stage": 2 }"#)
            .expect("write config");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.terminal_stage, 2);
        assert!(!config.debug);
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = load_config(Some(&dir.path().join("missing.json")));
        assert!(matches!(result, Err(SeitenwerkError::Config(_))));
    }
}
