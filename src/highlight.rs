//! Keyword highlight geometry for rendered pages.
//!
//! A [`TextLocator`] finds the rectangles of a phrase on one page. Keywords
//! are located twice: once as the exact phrase and, for multi-word
//! keywords, once per token. The two passes overlap on the same glyph runs,
//! so [`dedupe`] keeps the first box seen near any given top-left corner.
//! Exact-phrase boxes arrive first and therefore win.
//!
//! Locator coordinates are page points (1/72 inch). Deduplication runs in
//! that space; [`HighlightSet::scaled`] converts to image pixels afterwards.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    text_util::{Matching, find_all, fold_chars, normalize_whitespace},
};

/// Corner distance below which two boxes count as the same occurrence.
pub const DEFAULT_TOLERANCE: f32 = 5.0;
/// Render resolution used when the caller gives none.
pub const DEFAULT_DPI: f32 = 150.0;
/// Margin added around the highlights when cropping.
pub const DEFAULT_CROP_PADDING: f32 = 50.0;

const POINTS_PER_INCH: f32 = 72.0;

/// Axis-aligned rectangle, `(x0, y0)` top-left and `(x1, y1)` bottom-right.
#[derive(
    Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x0 * factor,
            self.y0 * factor,
            self.x1 * factor,
            self.y1 * factor,
        )
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    /// Whether both top-left coordinates differ by less than `tolerance`.
    pub fn is_near(&self, other: &Self, tolerance: f32) -> bool {
        (self.x0 - other.x0).abs() < tolerance
            && (self.y0 - other.y0).abs() < tolerance
    }

    fn overlaps_vertically(&self, other: &Self) -> bool {
        self.y0 < other.y1 && other.y0 < self.y1
    }
}

/// One located occurrence of a keyword (or of one of its tokens).
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub struct KeywordOccurrence {
    pub keyword: String,
    pub bbox: BoundingBox,
}

/// Deduplicated occurrences in arrival order.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
)]
#[serde(transparent)]
pub struct HighlightSet {
    pub occurrences: Vec<KeywordOccurrence>,
}

impl HighlightSet {
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            occurrences: self
                .occurrences
                .iter()
                .map(|o| KeywordOccurrence {
                    keyword: o.keyword.clone(),
                    bbox: o.bbox.scaled(factor),
                })
                .collect(),
        }
    }

    /// Smallest box holding every occurrence, or `None` when empty.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut boxes = self.occurrences.iter().map(|o| o.bbox);
        let first = boxes.next()?;
        Some(boxes.fold(first, |acc, b| acc.union(&b)))
    }
}

/// Finds where a phrase is drawn on one page.
pub trait TextLocator {
    /// Every rectangle covering an occurrence of `phrase`, in page order.
    fn locate(&self, phrase: &str) -> Vec<BoundingBox>;
}

/// Locate `keyword` on a page: the exact phrase first, then each token of
/// a multi-word keyword. Single-character tokens are skipped.
pub fn collect_occurrences(
    locator: &impl TextLocator,
    keyword: &str,
) -> Vec<KeywordOccurrence> {
    let mut found: Vec<KeywordOccurrence> = locator
        .locate(keyword)
        .into_iter()
        .map(|bbox| KeywordOccurrence {
            keyword: keyword.to_string(),
            bbox,
        })
        .collect();

    let tokens: Vec<&str> = keyword.split_whitespace().collect();
    if tokens.len() > 1 {
        for token in tokens.into_iter().filter(|t| t.chars().count() > 1) {
            found.extend(locator.locate(token).into_iter().map(|bbox| {
                KeywordOccurrence {
                    keyword: token.to_string(),
                    bbox,
                }
            }));
        }
    }

    found
}

/// Drop every occurrence whose top-left corner is within `tolerance` of an
/// already accepted one. The earlier occurrence always wins.
pub fn dedupe(
    occurrences: Vec<KeywordOccurrence>,
    tolerance: f32,
) -> HighlightSet {
    let mut accepted: Vec<KeywordOccurrence> =
        Vec::with_capacity(occurrences.len());
    for occurrence in occurrences {
        if !accepted
            .iter()
            .any(|a| a.bbox.is_near(&occurrence.bbox, tolerance))
        {
            accepted.push(occurrence);
        }
    }
    HighlightSet {
        occurrences: accepted,
    }
}

/// Collect and deduplicate all `keywords` on one page.
pub fn highlight_keywords(
    locator: &impl TextLocator,
    keywords: &[String],
    tolerance: f32,
) -> HighlightSet {
    let occurrences: Vec<KeywordOccurrence> = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .flat_map(|k| collect_occurrences(locator, k))
        .collect();
    let raw = occurrences.len();
    let set = dedupe(occurrences, tolerance);
    tracing::debug!(raw, kept = set.len(), "deduplicated highlight boxes");
    set
}

/// Pixels per page point at `dpi`.
pub fn scale_factor(dpi: f32) -> f32 {
    dpi / POINTS_PER_INCH
}

/// The region of an image to crop so every highlight is visible.
///
/// The union of all boxes is padded by `padding` on each side and clamped
/// to `[0, width] x [0, height]`.
pub fn crop_region(
    set: &HighlightSet,
    padding: f32,
    width: f32,
    height: f32,
) -> Option<BoundingBox> {
    let bounds = set.bounds()?;
    Some(BoundingBox::new(
        (bounds.x0 - padding).max(0.0),
        (bounds.y0 - padding).max(0.0),
        (bounds.x1 + padding).min(width),
        (bounds.y1 + padding).min(height),
    ))
}

/// A positioned word on a page.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub struct Word {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Text layout of one page in reading order, in page points.
///
/// This is the shape PDF toolkits export as "words" output.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub words: Vec<Word>,
}

impl PageLayout {
    /// Page text: words joined with single spaces.
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `(start, len)` in characters of each word within [`Self::text`].
    fn word_spans(&self) -> Vec<(usize, usize)> {
        let mut spans = Vec::with_capacity(self.words.len());
        let mut offset = 0;
        for word in &self.words {
            let len = word.text.chars().count();
            spans.push((offset, len));
            offset += len + 1;
        }
        spans
    }

    /// Rectangles covering characters `[start, end)` of the page text, one
    /// per run of words on the same line.
    fn span_boxes(
        &self,
        spans: &[(usize, usize)],
        start: usize,
        end: usize,
    ) -> Vec<BoundingBox> {
        let mut boxes: Vec<BoundingBox> = Vec::new();
        for (word, &(word_start, len)) in self.words.iter().zip(spans) {
            let word_end = word_start + len;
            if len == 0 || word_end <= start || word_start >= end {
                continue;
            }

            let from = start.max(word_start) - word_start;
            let to = end.min(word_end) - word_start;
            let w = word.bbox.width();
            let part = BoundingBox::new(
                word.bbox.x0 + w * from as f32 / len as f32,
                word.bbox.y0,
                word.bbox.x0 + w * to as f32 / len as f32,
                word.bbox.y1,
            );

            match boxes.last_mut() {
                Some(last) if last.overlaps_vertically(&part) => {
                    *last = last.union(&part)
                }
                _ => boxes.push(part),
            }
        }
        boxes
    }
}

impl TextLocator for PageLayout {
    fn locate(&self, phrase: &str) -> Vec<BoundingBox> {
        let phrase = normalize_whitespace(phrase);
        if phrase.is_empty() {
            return Vec::new();
        }

        let haystack = fold_chars(&self.text(), Matching::CaseInsensitive);
        let needle = fold_chars(&phrase, Matching::CaseInsensitive);
        let spans = self.word_spans();

        find_all(&haystack, &needle)
            .into_iter()
            .flat_map(|(start, end)| self.span_boxes(&spans, start, end))
            .collect()
    }
}

/// Options for [`highlight_page`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightOptions {
    pub tolerance: f32,
    pub dpi: f32,
    /// Crop padding in image pixels; `None` disables cropping.
    pub crop_padding: Option<f32>,
}

impl HighlightOptions {
    /// Reject a non-positive dpi and a negative or NaN tolerance or padding.
    pub fn validate(&self) -> Result<()> {
        if !(self.dpi > 0.0) {
            return Err(Error::out_of_range("dpi", self.dpi, "> 0"));
        }
        if !(self.tolerance >= 0.0) {
            return Err(Error::out_of_range(
                "tolerance",
                self.tolerance,
                ">= 0",
            ));
        }
        if let Some(padding) = self.crop_padding
            && !(padding >= 0.0)
        {
            return Err(Error::out_of_range("crop_padding", padding, ">= 0"));
        }
        Ok(())
    }
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            dpi: DEFAULT_DPI,
            crop_padding: None,
        }
    }
}

/// Highlights of one page in image coordinates, ready for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct HighlightReport {
    pub keywords: Vec<String>,
    pub dpi: f32,
    pub image_width: f32,
    pub image_height: f32,
    pub highlights: HighlightSet,
    pub crop: Option<BoundingBox>,
}

/// Locate, deduplicate and scale highlights for `keywords` on `page`.
pub fn highlight_page(
    page: &PageLayout,
    keywords: &[String],
    options: HighlightOptions,
) -> HighlightReport {
    let factor = scale_factor(options.dpi);
    let image_width = page.width * factor;
    let image_height = page.height * factor;

    let highlights =
        highlight_keywords(page, keywords, options.tolerance).scaled(factor);
    let crop = options.crop_padding.and_then(|padding| {
        crop_region(&highlights, padding, image_width, image_height)
    });

    HighlightReport {
        keywords: keywords.to_vec(),
        dpi: options.dpi,
        image_width,
        image_height,
        highlights,
        crop,
    }
}
