//! # Styled Text Segmentation
//!
//! Notification text often packs several logical fields into one styled
//! string: the map application renders road names bold and connecting words
//! ("toward", "onto") in the normal weight. This module recovers those fields
//! from style alone, without knowing anything about the source application.
//!
//! ## Pipeline
//! 1. [`find_spans`]: cut the string at every style boundary into
//!    [`StyledSpan`]s that cover the whole text
//! 2. [`split_by_style`]: classify each span as key/non-key and merge runs of
//!    the same classification into trimmed [`SpanSegment`]s
//!
//! All offsets are character offsets, not byte offsets.

use serde::{Deserialize, Serialize};

/// Typeface style of a run of text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    #[default]
    Normal,
    Bold,
    Italic,
    BoldItalic,
}

/// Style applied to `[start, end)` of a [`StyledText`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRun {
    pub start: usize,
    pub end: usize,
    pub style: TextStyle,
}

/// Plain text plus the style runs laid over it.
///
/// Runs may leave gaps (unstyled text is [`TextStyle::Normal`]) and may
/// overlap, in which case the first listed run wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledText {
    pub text: String,
    #[serde(default)]
    pub runs: Vec<StyleRun>,
}

impl StyledText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            runs: Vec::new(),
        }
    }

    /// Append `text` with `style`, extending the run list.
    ///
    /// # Example
    /// ```
    /// use nav_relay_lib::span_parser::{StyledText, TextStyle};
    ///
    /// let text = StyledText::default()
    ///     .push("Main St", TextStyle::Bold)
    ///     .push(" toward ", TextStyle::Normal);
    /// assert_eq!(text.text, "Main St toward ");
    /// assert_eq!(text.runs.len(), 2);
    /// ```
    pub fn push(mut self, text: &str, style: TextStyle) -> Self {
        let start = self.text.chars().count();
        self.text.push_str(text);
        let end = self.text.chars().count();
        self.runs.push(StyleRun { start, end, style });
        self
    }
}

/// One contiguous run of uniformly styled text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledSpan {
    pub begin: usize,
    pub end: usize,
    pub text: String,
    pub style: TextStyle,
}

/// Merged run of spans sharing one classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanSegment {
    pub text: String,
    pub is_key_style: bool,
}

/// Cut `input` at every style boundary.
///
/// The returned spans are ordered, contiguous and cover `[0, len)`; an empty
/// string yields no spans.
pub fn find_spans(input: &StyledText) -> Vec<StyledSpan> {
    let chars: Vec<char> = input.text.chars().collect();
    let len = chars.len();

    let mut bounds = vec![0, len];
    for run in &input.runs {
        bounds.push(run.start.min(len));
        bounds.push(run.end.min(len));
    }
    bounds.sort_unstable();
    bounds.dedup();

    bounds
        .windows(2)
        .map(|w| {
            let (begin, end) = (w[0], w[1]);
            let style = input
                .runs
                .iter()
                .find(|run| run.start < run.end && run.start <= begin && end <= run.end)
                .map(|run| run.style)
                .unwrap_or_default();
            StyledSpan {
                begin,
                end,
                text: chars[begin..end].iter().collect(),
                style,
            }
        })
        .collect()
}

/// Segment `input` into runs that are / are not in `key_style`.
///
/// A span counts as key only when its style equals `key_style` and its
/// trimmed length exceeds `min_len`, so stray separators (" / ", ", ") rendered
/// in the key style do not split a field.
pub fn split_by_style(input: &StyledText, key_style: TextStyle, min_len: usize) -> Vec<SpanSegment> {
    let chars: Vec<char> = input.text.chars().collect();
    let spans = find_spans(input);
    let mut result = Vec::new();

    let mut begin = 0;
    let mut previous_matched = false;
    for (index, span) in spans.iter().enumerate() {
        let matched = span.style == key_style && span.text.trim().chars().count() > min_len;

        if matched != previous_matched {
            push_segment(&mut result, &chars[begin..span.begin], previous_matched);
            begin = span.begin;
        }

        if index + 1 == spans.len() {
            push_segment(&mut result, &chars[begin..span.end], matched);
        }
        previous_matched = matched;
    }

    log::trace!("split {:?} into {:?}", input.text, result);
    result
}

fn push_segment(result: &mut Vec<SpanSegment>, chars: &[char], is_key_style: bool) {
    let text: String = chars.iter().collect();
    let text = text.trim();
    if !text.is_empty() {
        result.push(SpanSegment {
            text: text.to_string(),
            is_key_style,
        });
    }
}
