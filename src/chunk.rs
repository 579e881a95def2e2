//! Brace-balance source chunker.
//!
//! Splits LEAP (and other curly-brace) source text into blocks that follow
//! the program structure: a chunk ends when a top-level block closes, unless
//! the next significant line continues it (`sonst`, `else`, `fange`, …), in
//! which case the continuation is folded into the same chunk.
//!
//! Each chunk carries a context label derived from the line that opened its
//! first block (`falls`, `while`, a function-call name, …) or `global` when
//! no block was opened.
//!
//! The chunker is a pure function of its input and never fails: malformed
//! input degrades to a single trailing chunk or to no chunks at all.

use serde::Serialize;

/// Chunks whose trimmed text is shorter than this are discarded.
pub const MIN_CHUNK_CHARS: usize = 10;

/// Maximum number of lines inspected when looking for a continuation clause.
pub const LOOKAHEAD_LINES: usize = 8;

/// Label for chunks that never opened a block.
pub const GLOBAL_LABEL: &str = "global";

/// Label for blocks whose opening line matches no keyword or call.
const BLOCK_LABEL: &str = "block";

const CONTROL_KEYWORDS: &[&str] = &[
    "falls", "wenn", "if", "sonst", "else", "for", "für", "while", "während", "solange",
    "repeat", "wiederhole", "try", "versuche", "catch", "fange", "finally", "schließlich",
    "function", "funktion", "switch", "class", "klasse",
];

const CONTINUATION_KEYWORDS: &[&str] = &[
    "else",
    "sonst",
    "elif",
    "catch",
    "fange",
    "finally",
    "schließlich",
];

/// A chunk of source text before embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceChunk {
    pub file: String,
    pub text: String,
    pub context_label: String,
    pub lines: usize,
}

/// Split `content` into structurally coherent chunks.
pub fn chunk_source(content: &str, file: &str) -> Vec<SourceChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();

    let mut buf: Vec<&str> = Vec::new();
    let mut label: Option<String> = None;
    let mut balance: usize = 0;
    let mut opened = false;

    for (i, &line) in lines.iter().enumerate() {
        if buf.is_empty() && line.trim().is_empty() {
            continue;
        }
        buf.push(line);

        if is_comment_line(line) {
            continue;
        }

        let code = code_only(line);
        for ch in code.chars() {
            match ch {
                '{' => {
                    if balance == 0 {
                        opened = true;
                        if label.is_none() {
                            label = Some(context_label(&code));
                        }
                    }
                    balance += 1;
                }
                '}' => balance = balance.saturating_sub(1),
                _ => {}
            }
        }

        if opened && balance == 0 && !continues_block(&lines[i + 1..]) {
            flush(&mut chunks, &mut buf, label.take(), file);
            opened = false;
        }
    }

    flush(&mut chunks, &mut buf, label, file);
    chunks
}

fn flush(chunks: &mut Vec<SourceChunk>, buf: &mut Vec<&str>, label: Option<String>, file: &str) {
    if buf.is_empty() {
        return;
    }
    let text = buf.join("\n").trim_end().to_string();
    buf.clear();

    if text.trim().chars().count() < MIN_CHUNK_CHARS {
        return;
    }

    chunks.push(SourceChunk {
        file: file.to_string(),
        lines: text.lines().count(),
        text,
        context_label: label.unwrap_or_else(|| GLOBAL_LABEL.to_string()),
    });
}

/// Look past blank and comment lines for a continuation clause.
fn continues_block(rest: &[&str]) -> bool {
    rest.iter()
        .take(LOOKAHEAD_LINES)
        .find(|l| !l.trim().is_empty() && !is_comment_line(l))
        .map(|l| starts_with_continuation(l))
        .unwrap_or(false)
}

fn starts_with_continuation(line: &str) -> bool {
    let rest = line.trim_start().trim_start_matches('}').trim_start();
    let word: String = rest.chars().take_while(|c| is_ident_char(*c)).collect();
    let word = word.to_lowercase();
    CONTINUATION_KEYWORDS.contains(&word.as_str())
}

fn is_comment_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with("/*") || t.starts_with('*')
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Derive the context label from a block-opening line: the first control
/// keyword, else the first function-call name, else `block`.
fn context_label(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut first_call: Option<String> = None;
    let mut i = 0;

    while i < chars.len() {
        if !is_ident_char(chars[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        if word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let lower = word.to_lowercase();
        if CONTROL_KEYWORDS.contains(&lower.as_str()) {
            return lower;
        }

        if first_call.is_none() {
            let next = chars[i..].iter().find(|c| !c.is_whitespace());
            if next == Some(&'(') {
                first_call = Some(word);
            }
        }
    }

    first_call.unwrap_or_else(|| BLOCK_LABEL.to_string())
}

/// Return the code portion of a line: `//` and inline `/* */` comments are
/// removed and string literal contents are blanked, so braces inside them
/// are not counted.
fn code_only(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
                out.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => break,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}
