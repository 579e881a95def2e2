//! Answer post-processing.
//!
//! Models trained mostly on C-family code keep producing constructs the
//! LEAP interpreter rejects. Inside fenced code blocks (and only there) the
//! common ones are rewritten:
//!
//! | Model output | Rewritten to |
//! |--------------|--------------|
//! | `solange (`  | `while(` |
//! | `int x = 1`  | `x = 1` |
//! | `i++` / `i--` | `i = i + 1` / `i = i - 1` |
//! | `i += 2` / `i -= 2` | `i = i + 2` / `i = i - 2` |
//!
//! Fences without a language tag are labelled `leap`.

use regex::{Captures, Regex};
use std::sync::OnceLock;

struct Rules {
    fence: Regex,
    solange: Regex,
    typed_decl: Regex,
    incr: Regex,
    decr: Regex,
    add_assign: Regex,
    sub_assign: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        fence: Regex::new(r"(?s)```(\w*)\s*(.*?)```").expect("valid regex"),
        solange: Regex::new(r"(?i)\bsolange\s*\(").expect("valid regex"),
        typed_decl: Regex::new(
            r"\b(?:int|var|const|string|float|double|boolean)\s+([a-zA-Z_]\w*)\s*=",
        )
        .expect("valid regex"),
        incr: Regex::new(r"\b([a-zA-Z_]\w*)\+\+").expect("valid regex"),
        decr: Regex::new(r"\b([a-zA-Z_]\w*)--").expect("valid regex"),
        add_assign: Regex::new(r"\b([a-zA-Z_]\w*)\s*\+=\s*(\d+)").expect("valid regex"),
        sub_assign: Regex::new(r"\b([a-zA-Z_]\w*)\s*-=\s*(\d+)").expect("valid regex"),
    })
}

/// Rewrite unsupported constructs inside every fenced code block of `text`.
pub fn normalize_code_blocks(text: &str) -> String {
    let r = rules();
    r.fence
        .replace_all(text, |caps: &Captures<'_>| {
            let lang = match &caps[1] {
                "" => "leap",
                other => other,
            };
            format!("```{}\n{}```", lang, fix_code(&caps[2]))
        })
        .into_owned()
}

fn fix_code(code: &str) -> String {
    let r = rules();
    let code = r.solange.replace_all(code, "while(");
    let code = r.typed_decl.replace_all(&code, "${1} =");
    let code = r.incr.replace_all(&code, "${1} = ${1} + 1");
    let code = r.decr.replace_all(&code, "${1} = ${1} - 1");
    let code = r.add_assign.replace_all(&code, "${1} = ${1} + ${2}");
    let code = r.sub_assign.replace_all(&code, "${1} = ${1} - ${2}");
    code.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_outside_fences_is_untouched() {
        let text = "Nutze nie i++ oder int x = 1 in LEAP.";
        assert_eq!(normalize_code_blocks(text), text);
    }

    #[test]
    fn test_increment_and_compound_assignment() {
        let text = "```leap\nfor (i = 0; i < 3; i++) {\n  sum += 2;\n  n -= 1;\n  k--;\n}\n```";
        let fixed = normalize_code_blocks(text);
        assert!(fixed.contains("i < 3; i = i + 1)"));
        assert!(fixed.contains("sum = sum + 2;"));
        assert!(fixed.contains("n = n - 1;"));
        assert!(fixed.contains("k = k - 1;"));
    }

    #[test]
    fn test_type_keywords_and_solange() {
        let text = "```\nint x = 5;\nSolange (x > 0) { x = x - 1; }\n```";
        let fixed = normalize_code_blocks(text);
        assert_eq!(fixed, "```leap\nx = 5;\nwhile(x > 0) { x = x - 1; }\n```");
    }

    #[test]
    fn test_language_tag_is_kept() {
        let fixed = normalize_code_blocks("Beispiel:\n```java\ni++;\n```\nFertig.");
        assert_eq!(fixed, "Beispiel:\n```java\ni = i + 1;\n```\nFertig.");
    }

    #[test]
    fn test_multiple_blocks() {
        let fixed = normalize_code_blocks("```leap\na++;\n```\ntext\n```leap\nvar b = 1;\n```");
        assert_eq!(fixed, "```leap\na = a + 1;\n```\ntext\n```leap\nb = 1;\n```");
    }
}
