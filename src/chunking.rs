use std::sync::OnceLock;

use regex::Regex;

use crate::config::ChunkingConfig;

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").unwrap())
}

fn sentence_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches one terminating punctuation character plus the whitespace
    // run after it; `split_sentences` below cuts right after the
    // punctuation so it stays attached to the sentence it ends.
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").unwrap())
}

/// Splits on terminating punctuation followed by whitespace, keeping the
/// punctuation attached to the preceding sentence (spec.md §4.2 step 3).
fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in sentence_break().find_iter(text) {
        let cut = m.start() + 1; // terminator is a single ASCII byte
        pieces.push(text[last..cut].trim());
        last = m.end();
    }
    if last < text.len() {
        pieces.push(text[last..].trim());
    }
    pieces.into_iter().filter(|s| !s.is_empty()).collect()
}

/// One emitted chunk (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub total: usize,
}

/// `ceil(len_chars / 4)`, the token estimator spec.md §4.2 mandates.
pub fn estimate_tokens(s: &str) -> usize {
    let chars = s.chars().count();
    chars.div_ceil(4)
}

/// Splits `content` into embedding-sized chunks on paragraph then sentence
/// boundaries, with overlap and small-chunk merge (spec.md §4.2). The
/// returned stream is deterministic for a fixed `content` and `cfg`.
pub fn chunk_text(content: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
    if estimate_tokens(content) <= cfg.max_tokens {
        return finalize(vec![content.trim().to_string()]);
    }

    let raw = split_into_raw_chunks(content, cfg);
    let merged = merge_small_chunks(raw, cfg);
    finalize(merged)
}

fn split_into_raw_chunks(content: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in paragraph_break().split(content) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if estimate_tokens(para) > cfg.max_tokens {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long_paragraph(para, cfg));
            continue;
        }

        let candidate = if current.is_empty() {
            para.to_string()
        } else {
            format!("{current}\n\n{para}")
        };

        if estimate_tokens(&candidate) > cfg.max_tokens && !current.is_empty() {
            let tail = overlap_tail(&current, cfg.overlap_tokens / 2);
            chunks.push(std::mem::take(&mut current));
            current = if tail.is_empty() {
                para.to_string()
            } else {
                format!("{tail} {para}")
            };
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// A single paragraph exceeding `max_tokens` is split on sentence
/// boundaries and accumulated without overlap (spec.md §4.2 step 3).
fn split_long_paragraph(para: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(para) {
        let candidate = if current.is_empty() {
            sentence.to_string()
        } else {
            format!("{current} {sentence}")
        };
        if estimate_tokens(&candidate) > cfg.max_tokens && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current = sentence.to_string();
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Last `n_words` words of `s`, used as the overlap tail prefixed onto the
/// chunk that follows a break.
fn overlap_tail(s: &str, n_words: usize) -> String {
    if n_words == 0 {
        return String::new();
    }
    let words: Vec<&str> = s.split_whitespace().collect();
    let start = words.len().saturating_sub(n_words);
    words[start..].join(" ")
}

/// Merges chunks smaller than `min_chunk_size` tokens into an adjacent
/// chunk when the merged result stays within `max_tokens` (spec.md §4.2
/// step 4); otherwise the small chunk is left standalone.
fn merge_small_chunks(chunks: Vec<String>, cfg: &ChunkingConfig) -> Vec<String> {
    if chunks.len() <= 1 {
        return chunks;
    }

    let mut result: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        let cur = chunks[i].clone();
        if estimate_tokens(&cur) >= cfg.min_chunk_size {
            result.push(cur);
            i += 1;
            continue;
        }

        if i + 1 < chunks.len() {
            let candidate = format!("{cur}\n\n{}", chunks[i + 1]);
            if estimate_tokens(&candidate) <= cfg.max_tokens {
                result.push(candidate);
                i += 2;
                continue;
            }
        }

        if let Some(prev) = result.last().cloned() {
            let candidate = format!("{prev}\n\n{cur}");
            if estimate_tokens(&candidate) <= cfg.max_tokens {
                *result.last_mut().unwrap() = candidate;
                i += 1;
                continue;
            }
        }

        result.push(cur);
        i += 1;
    }

    result
}

fn finalize(contents: Vec<String>) -> Vec<Chunk> {
    let total = contents.len();
    contents
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            content,
            index,
            total,
        })
        .collect()
}
