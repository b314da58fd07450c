// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The six page stages driven by the `seitenwerk` binary.  Each one is small:
// orientation, spread splitting, deskew, content detection, margins and PNG
// output.  They operate on in-memory images using the `image` and
// `imageproc` crates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use image::{DynamicImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use imageproc::contrast::otsu_level;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use seitenwerk_core::error::SeitenwerkError;
use seitenwerk_core::types::{PageId, SubPage};
use seitenwerk_pipeline::{
    ExecuteNode, Payload, ProbeNode, ProbeVerdict, Stage, StageFailure, StageRegistry,
};
use tracing::{debug, info, instrument};

/// Stage names in pipeline order.
pub const STAGE_NAMES: [&str; 6] = [
    "fix-orientation",
    "page-split",
    "deskew",
    "select-content",
    "page-layout",
    "output",
];

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Defaults applied to every page, and where output goes.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub output_dir: PathBuf,
    /// Clockwise rotation in degrees; multiples of 90.
    pub rotation: u16,
    pub deskew_degrees: f32,
    /// White border around the detected content, in pixels.
    pub margin: u32,
}

impl StageOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            rotation: 0,
            deskew_degrees: 0.0,
            margin: 20,
        }
    }
}

/// Build the registry in pipeline order.
pub fn registry(options: &StageOptions) -> Result<StageRegistry, SeitenwerkError> {
    StageRegistry::new(vec![
        Arc::new(FixOrientation::new(options.rotation)) as Arc<dyn Stage>,
        Arc::new(PageSplit),
        Arc::new(Deskew::new(options.deskew_degrees)),
        Arc::new(SelectContent::default()),
        Arc::new(PageLayout::new(options.margin)),
        Arc::new(Output::new(&options.output_dir)),
    ])
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Region of a page image holding its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What flows between the image stages.
pub struct PageImage {
    pub image: DynamicImage,
    pub content: Option<ContentBox>,
}

/// The payload of the output stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

fn take_image(input: Payload, stage: &str) -> Result<PageImage, StageFailure> {
    input
        .downcast::<PageImage>()
        .map_err(|_| StageFailure::new(format!("{stage}: expected a page image")))
}

// ---------------------------------------------------------------------------
// Per-page parameters
// ---------------------------------------------------------------------------

/// Parameters a stage keeps per page.  Doubles as the stage's cache record:
/// a page with parameters has been set up for this stage.
#[derive(Debug)]
struct PageParams<T> {
    inner: Arc<Mutex<HashMap<PageId, T>>>,
}

impl<T> Clone for PageParams<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for PageParams<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone> PageParams<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<PageId, T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn get(&self, page: &PageId) -> Option<T> {
        self.lock().get(page).cloned()
    }

    /// Insert `value` unless the page already has parameters.
    fn seed(&self, page: &PageId, value: T) {
        self.lock().entry(page.clone()).or_insert(value);
    }

    fn set(&self, page: &PageId, value: T) {
        self.lock().insert(page.clone(), value);
    }

    fn contains(&self, page: &PageId) -> bool {
        self.lock().contains_key(page)
    }
}

struct ParamsProbe<T> {
    params: PageParams<T>,
}

impl<T: Clone + Send> ProbeNode for ParamsProbe<T> {
    fn probe(&self, page: &PageId) -> ProbeVerdict {
        if self.params.contains(page) {
            ProbeVerdict::Valid
        } else {
            ProbeVerdict::Missing
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 0: orientation
// ---------------------------------------------------------------------------

struct FixOrientation {
    params: PageParams<u16>,
    default: u16,
}

impl FixOrientation {
    fn new(default: u16) -> Self {
        Self {
            params: PageParams::default(),
            default,
        }
    }
}

impl Stage for FixOrientation {
    fn name(&self) -> &str {
        STAGE_NAMES[0]
    }

    fn load_default_settings(&self, page: &PageId) {
        self.params.seed(page, self.default);
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, _debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(OrientationNode {
            source: page.image.path().to_path_buf(),
            rotation: self.params.get(page).unwrap_or(self.default),
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(ParamsProbe {
            params: self.params.clone(),
        })
    }
}

struct OrientationNode {
    source: PathBuf,
    rotation: u16,
}

impl ExecuteNode for OrientationNode {
    #[instrument(skip_all, fields(path = %self.source.display(), rotation = self.rotation))]
    fn execute(&mut self, _input: Payload) -> Result<Payload, StageFailure> {
        let image = image::open(&self.source).map_err(|err| {
            StageFailure::new(format!("cannot open {}: {err}", self.source.display()))
        })?;
        debug!(width = image.width(), height = image.height(), "page image loaded");

        let image = match self.rotation % 360 {
            90 => image.rotate90(),
            180 => image.rotate180(),
            270 => image.rotate270(),
            _ => image,
        };
        Ok(Payload::new(PageImage {
            image,
            content: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Stage 1: spread splitting
// ---------------------------------------------------------------------------

/// Cuts a two-page spread in half.  The half is chosen by the page id, so
/// there is nothing to cache.
struct PageSplit;

impl Stage for PageSplit {
    fn name(&self) -> &str {
        STAGE_NAMES[1]
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, _debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(SplitNode {
            sub_page: page.sub_page,
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(AlwaysValid)
    }
}

struct AlwaysValid;

impl ProbeNode for AlwaysValid {
    fn probe(&self, _page: &PageId) -> ProbeVerdict {
        ProbeVerdict::Valid
    }
}

struct SplitNode {
    sub_page: SubPage,
}

impl ExecuteNode for SplitNode {
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        let page = take_image(input, STAGE_NAMES[1])?;
        let (width, height) = (page.image.width(), page.image.height());
        if self.sub_page != SubPage::Single && width < 2 {
            return Err(StageFailure::new("image too narrow to split"));
        }

        let half = width / 2;
        let image = match self.sub_page {
            SubPage::Single => page.image,
            SubPage::Left => page.image.crop_imm(0, 0, half, height),
            SubPage::Right => page.image.crop_imm(half, 0, width - half, height),
        };
        Ok(Payload::new(PageImage {
            image,
            content: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Stage 2: deskew
// ---------------------------------------------------------------------------

struct Deskew {
    params: PageParams<f32>,
    default: f32,
}

impl Deskew {
    fn new(default: f32) -> Self {
        Self {
            params: PageParams::default(),
            default,
        }
    }
}

impl Stage for Deskew {
    fn name(&self) -> &str {
        STAGE_NAMES[2]
    }

    fn load_default_settings(&self, page: &PageId) {
        self.params.seed(page, self.default);
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, _debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(DeskewNode {
            degrees: self.params.get(page).unwrap_or(self.default),
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(ParamsProbe {
            params: self.params.clone(),
        })
    }
}

struct DeskewNode {
    degrees: f32,
}

impl ExecuteNode for DeskewNode {
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        let page = take_image(input, STAGE_NAMES[2])?;
        if self.degrees.abs() < 0.01 {
            return Ok(Payload::new(page));
        }

        let rotated = rotate_about_center(
            &page.image.to_rgba8(),
            self.degrees.to_radians(),
            Interpolation::Bilinear,
            WHITE,
        );
        debug!(degrees = self.degrees, "page deskewed");
        Ok(Payload::new(PageImage {
            image: DynamicImage::ImageRgba8(rotated),
            content: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Stage 3: content detection
// ---------------------------------------------------------------------------

/// Finds the box holding the dark (inked) pixels.  The detected box is
/// remembered per page.
#[derive(Default)]
struct SelectContent {
    params: PageParams<ContentBox>,
}

impl Stage for SelectContent {
    fn name(&self) -> &str {
        STAGE_NAMES[3]
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(SelectContentNode {
            page: page.clone(),
            params: self.params.clone(),
            debug,
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(ParamsProbe {
            params: self.params.clone(),
        })
    }
}

struct SelectContentNode {
    page: PageId,
    params: PageParams<ContentBox>,
    debug: bool,
}

impl ExecuteNode for SelectContentNode {
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        let page = take_image(input, STAGE_NAMES[3])?;
        let gray = page.image.to_luma8();
        let level = otsu_level(&gray);

        let content = content_box(&gray, level).unwrap_or(ContentBox {
            x: 0,
            y: 0,
            width: gray.width(),
            height: gray.height(),
        });
        if self.debug {
            info!(page = %self.page, level, ?content, "content detected");
        }

        self.params.set(&self.page, content);
        Ok(Payload::new(PageImage {
            image: page.image,
            content: Some(content),
        }))
    }
}

/// Bounding box of the pixels no brighter than `level`, or `None` for a
/// blank page.
pub(crate) fn content_box(gray: &GrayImage, level: u8) -> Option<ContentBox> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] > level {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds.map(|(x0, y0, x1, y1)| ContentBox {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

// ---------------------------------------------------------------------------
// Stage 4: margins
// ---------------------------------------------------------------------------

struct PageLayout {
    params: PageParams<u32>,
    default: u32,
}

impl PageLayout {
    fn new(default: u32) -> Self {
        Self {
            params: PageParams::default(),
            default,
        }
    }
}

impl Stage for PageLayout {
    fn name(&self) -> &str {
        STAGE_NAMES[4]
    }

    fn load_default_settings(&self, page: &PageId) {
        self.params.seed(page, self.default);
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, _debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(LayoutNode {
            margin: self.params.get(page).unwrap_or(self.default),
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(ParamsProbe {
            params: self.params.clone(),
        })
    }
}

struct LayoutNode {
    margin: u32,
}

impl ExecuteNode for LayoutNode {
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        let page = take_image(input, STAGE_NAMES[4])?;
        let content = page.content.unwrap_or(ContentBox {
            x: 0,
            y: 0,
            width: page.image.width(),
            height: page.image.height(),
        });
        if content.width == 0 || content.height == 0 {
            return Err(StageFailure::new("empty content area"));
        }

        let cropped = page
            .image
            .crop_imm(content.x, content.y, content.width, content.height)
            .to_rgba8();
        let m = self.margin;
        let mut canvas = RgbaImage::from_pixel(content.width + 2 * m, content.height + 2 * m, WHITE);
        image::imageops::overlay(&mut canvas, &cropped, i64::from(m), i64::from(m));

        Ok(Payload::new(PageImage {
            image: DynamicImage::ImageRgba8(canvas),
            content: Some(ContentBox {
                x: m,
                y: m,
                width: content.width,
                height: content.height,
            }),
        }))
    }
}

// ---------------------------------------------------------------------------
// Stage 5: output
// ---------------------------------------------------------------------------

struct Output {
    dir: PathBuf,
}

impl Output {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl Stage for Output {
    fn name(&self) -> &str {
        STAGE_NAMES[5]
    }

    fn create_execute_node(&self, page: &PageId, _batch: bool, _debug: bool) -> Box<dyn ExecuteNode> {
        Box::new(OutputNode {
            path: output_path(&self.dir, page),
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(OutputProbe {
            dir: self.dir.clone(),
        })
    }
}

/// `<stem>[-<n>][_left|_right].png` inside `dir`.
pub fn output_path(dir: &Path, page: &PageId) -> PathBuf {
    let stem = page
        .image
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    let number = if page.image.page > 0 {
        format!("-{}", page.image.page)
    } else {
        String::new()
    };
    let side = match page.sub_page {
        SubPage::Single => "",
        SubPage::Left => "_left",
        SubPage::Right => "_right",
    };
    dir.join(format!("{stem}{number}{side}.png"))
}

struct OutputNode {
    path: PathBuf,
}

impl ExecuteNode for OutputNode {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        let page = take_image(input, STAGE_NAMES[5])?;
        page.image
            .save_with_format(&self.path, ImageFormat::Png)
            .map_err(|err| {
                StageFailure::new(format!("cannot write {}: {err}", self.path.display()))
            })?;
        debug!("page written");

        Ok(Payload::new(WrittenPage {
            path: self.path.clone(),
            width: page.image.width(),
            height: page.image.height(),
        }))
    }
}

/// Valid while the output file is at least as new as its source image.
struct OutputProbe {
    dir: PathBuf,
}

impl ProbeNode for OutputProbe {
    fn probe(&self, page: &PageId) -> ProbeVerdict {
        let output = output_path(&self.dir, page);
        let Ok(written) = std::fs::metadata(&output).and_then(|m| m.modified()) else {
            return ProbeVerdict::Missing;
        };
        match std::fs::metadata(page.image.path()).and_then(|m| m.modified()) {
            Ok(source) if source > written => ProbeVerdict::Stale,
            Ok(_) => ProbeVerdict::Valid,
            Err(_) => ProbeVerdict::Stale,
        }
    }
}
