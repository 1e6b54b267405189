//! Recursive character text splitter.
//!
//! Splits on the coarsest separator present (paragraphs, then lines, then
//! words, then characters) and merges the pieces back into chunks of at most
//! `chunk_size` characters, carrying up to `chunk_overlap` characters of
//! trailing context into the next chunk. Lengths are counted in characters.

use anyhow::{ensure, Result};
use std::collections::VecDeque;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        ensure!(chunk_size > 0, "chunk_size must be at least 1");
        ensure!(
            chunk_overlap < chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap,
            chunk_size
        );
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }

        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, separator);

                // Keep a tail of at most chunk_overlap characters
                loop {
                    let joiner = if current.is_empty() { 0 } else { sep_len };
                    let over_overlap = total > self.chunk_overlap;
                    let no_room = total > 0 && total + len + joiner > self.chunk_size;
                    if !over_overlap && !no_room {
                        break;
                    }

                    let dropped_joiner = if current.len() > 1 { sep_len } else { 0 };
                    match current.pop_front() {
                        Some(first) => {
                            total = total.saturating_sub(char_len(first) + dropped_joiner)
                        }
                        None => break,
                    }
                }
            }

            let joiner = if current.is_empty() { 0 } else { sep_len };
            current.push_back(piece);
            total += len + joiner;
        }

        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current
        .iter()
        .copied()
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_overlap() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(800, 100).is_ok());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = TextSplitter::new(800, 100).unwrap();
        let chunks = splitter.split_text("  Gas test before entry.  ");
        assert_eq!(chunks, vec!["Gas test before entry."]);
    }

    #[test]
    fn test_word_merge_with_overlap() {
        let splitter = TextSplitter::new(10, 5).unwrap();
        let chunks = splitter.split_text("aaaa bbbb cccc dddd");
        assert_eq!(chunks, vec!["aaaa bbbb", "bbbb cccc", "cccc dddd"]);
    }

    #[test]
    fn test_word_merge_without_overlap() {
        let splitter = TextSplitter::new(10, 3).unwrap();
        let chunks = splitter.split_text("aaaa bbbb cccc dddd");
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn test_paragraphs_preferred() {
        let splitter = TextSplitter::new(30, 0).unwrap();
        let text = "Section 1. Permits.\n\nSection 2. Gas testing.";
        let chunks = splitter.split_text(text);
        assert_eq!(chunks, vec!["Section 1. Permits.", "Section 2. Gas testing."]);
    }

    #[test]
    fn test_chunks_respect_size_on_multibyte_text() {
        let splitter = TextSplitter::new(20, 5).unwrap();
        let text = "밀폐공간작업전에는반드시산소농도와유해가스농도를측정하여야한다".repeat(3);
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_long_paragraphs_are_split() {
        let splitter = TextSplitter::new(50, 10).unwrap();
        let paragraph = "Hot work requires a fire watch and a gas test. ".repeat(5);
        let text = format!("{}\n\nShort closing line.", paragraph.trim());
        let chunks = splitter.split_text(&text);

        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
        assert_eq!(chunks.last().map(String::as_str), Some("Short closing line."));
    }
}
