//! Markdown-aware text chunker.
//!
//! Splits note body text into chunks of roughly `target_words` words,
//! never exceeding `max_words`, preferring to cut at natural markdown
//! break points (headings, list boundaries, blank-line paragraph starts,
//! fences, rules, block quotes). A leading `---`-delimited frontmatter
//! block is stripped before chunking. Chunks shorter than `min_words`
//! are dropped.
//!
//! Chunking is pure and deterministic for a given input; it performs
//! no I/O. Emission order defines the paragraph index of each chunk.

use crate::config::ChunkingConfig;

/// Split a text blob into ordered chunk texts.
///
/// The result preserves the exact line content of each chunk (trimmed at
/// the chunk edges); indices into the returned vector are the chunks'
/// paragraph indices.
pub fn chunk_text(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let body = strip_frontmatter(text);
    let lines: Vec<&str> = body.lines().collect();

    let mut raw: Vec<String> = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut buf_words = 0usize;

    for (i, &line) in lines.iter().enumerate() {
        let line_words = word_count(line);

        if buf_words > 0 && buf_words + line_words > cfg.max_words {
            flush(&mut raw, &mut buf, &mut buf_words);
        } else if buf_words > 0
            && buf_words + line_words > cfg.target_words
            && is_natural_break(&lines, i)
        {
            flush(&mut raw, &mut buf, &mut buf_words);
        }

        buf.push(line);
        buf_words += line_words;
    }
    flush(&mut raw, &mut buf, &mut buf_words);

    let mut chunks: Vec<String> = Vec::new();
    for chunk in raw {
        if word_count(&chunk) > cfg.max_words {
            chunks.extend(split_long_chunk(&chunk, cfg.max_words));
        } else {
            chunks.push(chunk);
        }
    }

    chunks.retain(|c| word_count(c) >= cfg.min_words);
    chunks
}

/// Returns the body of the text with a leading frontmatter block
/// (lines delimited by `---`) removed. Without a closing delimiter the
/// input is returned unchanged.
pub fn strip_frontmatter(text: &str) -> &str {
    let Some(block_end) = frontmatter_end(text) else {
        return text;
    };
    &text[block_end..]
}

/// Returns the raw frontmatter block body (between the `---` delimiters,
/// exclusive), if the text starts with one.
pub fn frontmatter_block(text: &str) -> Option<&str> {
    let mut offset = 0usize;
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }
    offset += first.len();
    let start = offset;
    for line in lines {
        if line.trim_end() == "---" {
            return Some(&text[start..offset]);
        }
        offset += line.len();
    }
    None
}

fn frontmatter_end(text: &str) -> Option<usize> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }
    let mut offset = first.len();
    for line in lines {
        offset += line.len();
        if line.trim_end() == "---" {
            return Some(offset);
        }
    }
    None
}

fn flush(out: &mut Vec<String>, buf: &mut Vec<&str>, buf_words: &mut usize) {
    if *buf_words > 0 {
        out.push(buf.join("\n").trim().to_string());
    }
    buf.clear();
    *buf_words = 0;
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Ordered,
    Unordered,
}

fn list_kind(line: &str) -> Option<ListKind> {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return Some(ListKind::Unordered);
    }
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && t[digits..].starts_with(". ") {
        return Some(ListKind::Ordered);
    }
    None
}

fn is_heading(line: &str) -> bool {
    let t = line.trim_start();
    let hashes = t.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && t[hashes..].starts_with(' ')
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_horizontal_rule(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() {
        return false;
    }
    for marker in ['-', '*', '_'] {
        let count = t.chars().filter(|c| *c == marker).count();
        if count >= 3 && t.chars().all(|c| c == marker || c == ' ') {
            return true;
        }
    }
    false
}

fn is_block_quote(line: &str) -> bool {
    line.trim_start().starts_with("> ")
}

/// Whether the line at `i` opens a semantic unit a chunk may start at.
fn is_natural_break(lines: &[&str], i: usize) -> bool {
    let line = lines[i];
    if line.trim().is_empty() {
        return false;
    }
    if i > 0 && lines[i - 1].trim().is_empty() {
        return true;
    }
    if is_heading(line)
        || list_kind(line).is_some()
        || is_fence(line)
        || is_horizontal_rule(line)
        || is_block_quote(line)
    {
        return true;
    }
    // First line after a list run of a different shape.
    if i > 0 {
        if let Some(prev_kind) = list_kind(lines[i - 1]) {
            if list_kind(line) != Some(prev_kind) {
                return true;
            }
        }
    }
    false
}

/// Break an oversized chunk at sentence boundaries; force-split any
/// sentence that alone exceeds the bound.
fn split_long_chunk(text: &str, max_words: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_words = 0usize;

    for sentence in split_sentences(text) {
        let words = word_count(&sentence);
        if words > max_words {
            if current_words > 0 {
                pieces.push(std::mem::take(&mut current));
                current_words = 0;
            }
            pieces.extend(force_split(&sentence, max_words));
            continue;
        }
        if current_words > 0 && current_words + words > max_words {
            pieces.push(std::mem::take(&mut current));
            current_words = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence.trim());
        current_words += words;
    }
    if current_words > 0 {
        pieces.push(current);
    }
    pieces
}

/// Split on `. `, `! `, `? `, keeping the punctuation with the sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') && bytes[i + 1] == b' ' {
            sentences.push(text[start..=i].to_string());
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    if start < text.len() {
        sentences.push(text[start..].to_string());
    }
    sentences
}

fn force_split(sentence: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    words
        .chunks(max_words)
        .map(|w| w.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    fn sentence(words: usize, tag: &str) -> String {
        let mut s: Vec<String> = (0..words.saturating_sub(1))
            .map(|i| format!("{}{}", tag, i))
            .collect();
        s.push(format!("{}end.", tag));
        s.join(" ")
    }

    #[test]
    fn short_input_yields_nothing() {
        assert!(chunk_text("too few words here", &cfg()).is_empty());
        assert!(chunk_text("", &cfg()).is_empty());
    }

    #[test]
    fn single_paragraph_single_chunk() {
        let text = "Hello world. This is a test paragraph with more than ten words overall.";
        let chunks = chunk_text(text, &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn frontmatter_is_stripped() {
        let body = "A body paragraph that certainly has more than ten words in it.";
        let with_fm = format!("---\ntitle: Example\ntags: [x]\n---\n{}", body);
        assert_eq!(chunk_text(&with_fm, &cfg()), chunk_text(body, &cfg()));
    }

    #[test]
    fn unterminated_frontmatter_is_kept() {
        let text = "---\ntitle: Example with quite a few words to clear the minimum bound here";
        let chunks = chunk_text(text, &cfg());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("title: Example"));
    }

    #[test]
    fn frontmatter_block_extraction() {
        let text = "---\ntitle: X\n---\nbody";
        assert_eq!(frontmatter_block(text), Some("title: X\n"));
        assert_eq!(frontmatter_block("no fm"), None);
        assert_eq!(frontmatter_block("---\nnever closed"), None);
    }

    #[test]
    fn splits_at_heading_past_target() {
        // The heading arrives once the buffer passed target_words, so the
        // chunk closes before it.
        let text = format!("{}\n## Section\n{}", sentence(205, "a"), sentence(100, "b"));
        let chunks = chunk_text(&text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("## Section"));
    }

    #[test]
    fn no_split_below_target() {
        let text = format!("{}\n\n{}", sentence(40, "a"), sentence(40, "b"));
        let chunks = chunk_text(&text, &cfg());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn blank_line_break_past_target() {
        let text = format!("{}\n\n{}", sentence(210, "a"), sentence(60, "b"));
        let chunks = chunk_text(&text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("a0"));
        assert!(chunks[1].starts_with("b0"));
    }

    #[test]
    fn hard_cap_forces_split_without_break() {
        // One long run of short lines with no blank lines or markers.
        let line = "eleven words on this line to pad out the count here";
        let text = vec![line; 30].join("\n");
        let chunks = chunk_text(&text, &cfg());
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(word_count(&c) <= 250, "chunk exceeded cap: {}", word_count(&c));
        }
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let text = (0..30)
            .map(|i| sentence(20, &format!("s{}x", i)))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, &cfg());
        assert!(chunks.len() >= 2);
        for c in &chunks {
            let n = word_count(c);
            assert!((10..=250).contains(&n), "bad chunk size {}", n);
        }
    }

    #[test]
    fn monster_sentence_force_split() {
        let words: Vec<String> = (0..600).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, &cfg());
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(word_count(c) <= 250);
        }
        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks[2].ends_with("w599"));
    }

    #[test]
    fn list_items_are_break_points() {
        let intro = sentence(205, "intro");
        let text = format!("{}\n- item one has a few words\n- item two has a few words\n- item three has a few words\n- item four has a few words", intro);
        let chunks = chunk_text(&text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("- item one"));
    }

    #[test]
    fn horizontal_rule_detection() {
        assert!(is_horizontal_rule("---"));
        assert!(is_horizontal_rule("***"));
        assert!(is_horizontal_rule("___"));
        assert!(is_horizontal_rule("- - -"));
        assert!(!is_horizontal_rule("--"));
        assert!(!is_horizontal_rule("-- x"));
    }

    #[test]
    fn break_detection_markers() {
        let lines = vec!["text", "# Heading", "1. ordered", "> quoted", "```"];
        assert!(is_natural_break(&lines, 1));
        assert!(is_natural_break(&lines, 2));
        assert!(is_natural_break(&lines, 3));
        assert!(is_natural_break(&lines, 4));
        assert!(!is_natural_break(&lines, 0));
    }

    #[test]
    fn line_after_list_run_is_break() {
        let lines = vec!["- a", "- b", "trailing prose line"];
        assert!(is_natural_break(&lines, 2));
        // Another item of the same kind does not end the run (but is a
        // break on its own as a list item).
        assert_eq!(list_kind("- c"), list_kind("- b"));
    }

    #[test]
    fn deterministic() {
        let text = format!("{}\n\n{}\n\n{}", sentence(90, "a"), sentence(120, "b"), sentence(70, "c"));
        assert_eq!(chunk_text(&text, &cfg()), chunk_text(&text, &cfg()));
    }

    #[test]
    fn rechunking_joined_chunks_is_stable() {
        let text = format!("{}\n\n{}\n\n{}", sentence(180, "a"), sentence(150, "b"), sentence(90, "c"));
        let first = chunk_text(&text, &cfg());
        let joined = first.join("\n\n");
        let second = chunk_text(&joined, &cfg());
        assert_eq!(first, second);
    }
}
