//! Token-bounded splitting with overlap.
//!
//! Text is cut into units: lines (newline kept), and for lines over budget,
//! whitespace-delimited pieces of the line. Units are packed greedily into
//! parts. Every part after the first starts with the longest run of whole
//! trailing units of the previous part that fits the overlap budget, so
//! [`reassemble`] can drop that prefix and rebuild the input exactly.

use tracing::warn;

use crate::tokens::TokenEstimator;

/// One part of a split text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPart {
    pub text: String,
    /// Byte length of the prefix repeated from the end of the previous part.
    pub overlap_len: usize,
}

impl TextPart {
    /// The part without its repeated prefix.
    pub fn fresh(&self) -> &str {
        &self.text[self.overlap_len..]
    }
}

/// Token budget plus overlap budget.
#[derive(Debug, Clone)]
pub struct Splitter {
    estimator: TokenEstimator,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Splitter {
    pub fn new(estimator: TokenEstimator, max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            estimator,
            max_tokens: max_tokens.max(1),
            overlap_tokens,
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn fits(&self, text: &str) -> bool {
        self.estimator.estimate(text) <= self.max_tokens
    }

    /// Split `text` into parts within the token budget. Text that already
    /// fits comes back as a single part.
    pub fn split(&self, text: &str) -> Vec<TextPart> {
        if self.fits(text) {
            return vec![TextPart {
                text: text.to_string(),
                overlap_len: 0,
            }];
        }

        let units = self.units(text);
        let mut parts = Vec::new();
        // Units of the part being built, and how many of them are overlap.
        let mut current: Vec<&str> = Vec::new();
        let mut current_text = String::new();
        let mut overlap_units = 0;

        for unit in units {
            if !current.is_empty() {
                current_text.push_str(unit);
                if self.fits(&current_text) {
                    current.push(unit);
                    continue;
                }
                current_text.truncate(current_text.len() - unit.len());

                let seed = self.overlap_seed(&current, overlap_units, unit);
                parts.push(close(&current, overlap_units));

                current = seed;
                overlap_units = current.len();
                current_text = current.concat();
            }
            current.push(unit);
            current_text.push_str(unit);
        }
        if !current.is_empty() {
            parts.push(close(&current, overlap_units));
        }
        parts
    }

    /// Longest suffix of `previous` (never the whole part) within the overlap
    /// budget that still leaves room for `next`.
    fn overlap_seed<'a>(&self, previous: &[&'a str], overlap_units: usize, next: &str) -> Vec<&'a str> {
        if self.overlap_tokens == 0 {
            return Vec::new();
        }
        // Keep at least one fresh unit behind so parts always advance.
        let min_start = (overlap_units + 1).min(previous.len());

        let mut start = previous.len();
        let mut suffix = String::new();
        while start > min_start {
            let candidate = format!("{}{suffix}", previous[start - 1]);
            if self.estimator.estimate(&candidate) > self.overlap_tokens
                || !self.fits(&format!("{candidate}{next}"))
            {
                break;
            }
            suffix = candidate;
            start -= 1;
        }
        previous[start..].to_vec()
    }

    /// Lines, with over-budget lines broken into pieces.
    fn units<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut units = Vec::new();
        for line in text.split_inclusive('\n') {
            if self.fits(line) {
                units.push(line);
            } else {
                self.split_line(line, &mut units);
            }
        }
        units
    }

    /// Greedy pack of whitespace-delimited words (trailing whitespace kept).
    fn split_line<'a>(&self, line: &'a str, out: &mut Vec<&'a str>) {
        let mut piece_start = 0;
        let mut piece_end = 0;

        for (word_start, word_end) in words(line) {
            if piece_end > piece_start && self.fits(&line[piece_start..word_end]) {
                piece_end = word_end;
                continue;
            }
            if piece_end > piece_start {
                out.push(&line[piece_start..piece_end]);
            }
            let word = &line[word_start..word_end];
            if self.fits(word) {
                piece_start = word_start;
                piece_end = word_end;
            } else {
                self.hard_cut(word, out);
                piece_start = word_end;
                piece_end = word_end;
            }
        }
        if piece_end > piece_start {
            out.push(&line[piece_start..piece_end]);
        }
    }

    /// Cut a single over-budget token at character boundaries.
    fn hard_cut<'a>(&self, word: &'a str, out: &mut Vec<&'a str>) {
        warn!(
            chars = word.chars().count(),
            max_tokens = self.max_tokens,
            "single token exceeds budget, cutting it"
        );
        let mut rest = word;
        while !rest.is_empty() {
            let cut = self.longest_fitting_prefix(rest);
            out.push(&rest[..cut]);
            rest = &rest[cut..];
        }
    }

    /// Byte index of the longest char-aligned prefix within budget; at least
    /// one character.
    fn longest_fitting_prefix(&self, text: &str) -> usize {
        let ends: Vec<usize> = text.char_indices().map(|(i, c)| i + c.len_utf8()).collect();
        // ends[lo] is accepted; search the largest fitting index below hi.
        let (mut lo, mut hi) = (0, ends.len());
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if self.fits(&text[..ends[mid]]) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        ends[lo]
    }
}

/// Rebuild the original text from its parts.
pub fn reassemble(parts: &[TextPart]) -> String {
    parts.iter().map(TextPart::fresh).collect()
}

fn close(units: &[&str], overlap_units: usize) -> TextPart {
    TextPart {
        text: units.concat(),
        overlap_len: units[..overlap_units].iter().map(|u| u.len()).sum(),
    }
}

/// Byte ranges of words, each extended over its trailing whitespace. Leading
/// whitespace of the line forms its own range.
fn words(line: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut in_space = line.starts_with(char::is_whitespace);

    for (i, c) in line.char_indices() {
        let space = c.is_whitespace();
        if in_space && !space && i > start {
            ranges.push((start, i));
            start = i;
        }
        in_space = space;
    }
    if start < line.len() {
        ranges.push((start, line.len()));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(max_tokens: usize, overlap_tokens: usize) -> Splitter {
        Splitter::new(TokenEstimator::Heuristic, max_tokens, overlap_tokens)
    }

    /// 900 lines of 40 chars (newline included): 9,000 heuristic tokens.
    fn field_listing() -> String {
        (0..900).map(|i| format!("Field_{i:04}__c : picklist{:>15}\n", "")).collect()
    }

    #[test]
    fn small_text_is_one_part() {
        let parts = splitter(100, 10).split("one\ntwo\n");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].overlap_len, 0);
    }

    #[test]
    fn nine_thousand_tokens_split_in_two() {
        let text = field_listing();
        assert!(text.lines().all(|l| l.len() == 39));
        let s = splitter(6000, 200);
        assert_eq!(s.estimator().estimate(&text), 9000);

        let parts = s.split(&text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].overlap_len, 0);
        assert!(parts.iter().all(|p| s.fits(&p.text)));

        let overlap = &parts[1].text[..parts[1].overlap_len];
        assert!(s.estimator().estimate(overlap) <= 200);
        assert_eq!(parts[1].overlap_len, 800);
        assert!(parts[0].text.ends_with(overlap));
        assert_eq!(reassemble(&parts), text);
    }

    #[test]
    fn zero_overlap_parts_are_disjoint() {
        let text = field_listing();
        let parts = splitter(1000, 0).split(&text);
        assert!(parts.iter().all(|p| p.overlap_len == 0));
        let joined: String = parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn long_lines_split_on_whitespace() {
        let line = "word ".repeat(100) + "\n";
        let s = splitter(20, 4);
        let parts = s.split(&line);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| s.fits(&p.text)));
        assert_eq!(reassemble(&parts), line);
        assert!(parts[0].text.ends_with(' '));
    }

    #[test]
    fn oversized_token_is_cut_not_lost() {
        let text = format!("short\n{}\nafter\n", "x".repeat(100));
        let s = splitter(10, 2);
        let parts = s.split(&text);
        assert!(parts.iter().all(|p| s.fits(&p.text)));
        assert_eq!(reassemble(&parts), text);
    }

    #[test]
    fn multibyte_text_round_trips() {
        let text = "überlange Zeile mit Umlauten äöü ".repeat(40);
        let s = splitter(30, 5);
        let parts = s.split(&text);
        assert!(parts.iter().all(|p| s.fits(&p.text)));
        assert_eq!(reassemble(&parts), text);
    }

    #[test]
    fn word_ranges_keep_trailing_space() {
        let line = "  ab cd\n";
        let ranges: Vec<&str> = words(line).into_iter().map(|(a, b)| &line[a..b]).collect();
        assert_eq!(ranges, vec!["  ", "ab ", "cd\n"]);
    }
}
