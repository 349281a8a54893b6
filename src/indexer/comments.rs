//! Go doc-comment association and text extraction over tree-sitter siblings.
//!
//! Grouping follows the Go parser: comments separated by at most one newline
//! form a group, a group ending on the line directly above a declaration is
//! its doc comment, and comments sharing a line with the previous token are
//! that token's line comment instead.
use tree_sitter::Node;

/// Children of `node` minus statement terminators (`\n`, `;`), which
/// tree-sitter-go exposes as anonymous tokens.
pub(crate) fn significant_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|n| n.is_named() || !matches!(n.kind(), "\n" | ";" | "\0"))
        .collect()
}

fn is_comment(node: &Node<'_>) -> bool {
    node.kind() == "comment"
}

/// Comment nodes forming the doc comment of `siblings[idx]`, in source order.
pub(crate) fn doc_group<'a, 't>(siblings: &'a [Node<'t>], idx: usize) -> &'a [Node<'t>] {
    let target_row = siblings[idx].start_position().row;
    let mut start = idx;
    let mut next_row = target_row;

    while start > 0 {
        let prev = &siblings[start - 1];
        if !is_comment(prev) {
            break;
        }
        let end = prev.end_position().row;
        let adjacent = if start == idx {
            end + 1 == target_row
        } else {
            end + 1 >= next_row
        };
        if !adjacent {
            break;
        }
        next_row = prev.start_position().row;
        start -= 1;
    }

    if start < idx && start > 0 {
        let owner_row = siblings[start - 1].end_position().row;
        while start < idx && siblings[start].start_position().row == owner_row {
            start += 1;
        }
    }

    &siblings[start..idx]
}

/// Comment nodes on the same line directly after `siblings[idx]`.
pub(crate) fn line_group<'a, 't>(siblings: &'a [Node<'t>], idx: usize) -> &'a [Node<'t>] {
    let row = siblings[idx].end_position().row;
    let start = idx + 1;
    let mut end = start;
    while end < siblings.len() && is_comment(&siblings[end]) && siblings[end].start_position().row == row {
        end += 1;
    }
    &siblings[start.min(siblings.len())..end]
}

/// Doc comment text for `siblings[idx]`, or `None` when there is no group.
pub(crate) fn doc_text(siblings: &[Node<'_>], idx: usize, source: &[u8]) -> Option<String> {
    let group = doc_group(siblings, idx);
    if group.is_empty() {
        None
    } else {
        Some(group_text(group, source))
    }
}

/// Text of a comment group with markers removed.
///
/// `//` and one following space are stripped, `/* */` delimiters removed,
/// tool directives (`//go:generate`, `//line ...`) dropped, trailing spaces
/// trimmed, and runs of blank lines collapsed. Non-empty results end in `\n`.
pub(crate) fn group_text(group: &[Node<'_>], source: &[u8]) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for node in group {
        let Ok(text) = node.utf8_text(source) else {
            continue;
        };
        if let Some(body) = text.strip_prefix("//") {
            if let Some(rest) = body.strip_prefix(' ') {
                lines.push(rest);
            } else if !is_directive(body) {
                lines.push(body);
            }
        } else if let Some(body) = text.strip_prefix("/*") {
            let body = body.strip_suffix("*/").unwrap_or(body);
            lines.extend(body.split('\n'));
        }
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() && out.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }

    if out.is_empty() {
        return String::new();
    }
    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn is_directive(body: &str) -> bool {
    if body.starts_with("line ") || body.starts_with("extern ") || body.starts_with("export ") {
        return true;
    }
    // "[a-z0-9]+:[a-z0-9]", e.g. go:generate, nolint:all
    let Some((head, tail)) = body.split_once(':') else {
        return false;
    };
    let word = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !head.is_empty() && head.chars().all(word) && tail.chars().next().is_some_and(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{Parser, Tree};

    fn parse(src: &str) -> Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .expect("Failed to load Go grammar");
        parser.parse(src, None).expect("Failed to parse")
    }

    fn doc_of_last(src: &str) -> Option<String> {
        let tree = parse(src);
        let nodes = significant_children(tree.root_node());
        let idx = nodes.len() - 1;
        doc_text(&nodes, idx, src.as_bytes())
    }

    #[test]
    fn test_adjacent_group_is_doc() {
        let src = "package p\n\n// A does a.\n// More about A.\nfunc A() {}\n";
        assert_eq!(doc_of_last(src).as_deref(), Some("A does a.\nMore about A.\n"));
    }

    #[test]
    fn test_blank_line_detaches_comment() {
        let src = "package p\n\n// Orphan.\n\nfunc A() {}\n";
        assert_eq!(doc_of_last(src), None);
    }

    #[test]
    fn test_only_nearest_group_counts() {
        let src = "package p\n\n// Far.\n\n// Near.\nfunc A() {}\n";
        assert_eq!(doc_of_last(src).as_deref(), Some("Near.\n"));
    }

    #[test]
    fn test_block_comment_text() {
        let src = "package p\n\n/*\n Block doc.\n   Indented.\n*/\nfunc A() {}\n";
        assert_eq!(doc_of_last(src).as_deref(), Some(" Block doc.\n   Indented.\n"));
    }

    #[test]
    fn test_directives_are_dropped() {
        let src = "package p\n\n// A is generated.\n//go:generate stringer -type=A\nfunc A() {}\n";
        assert_eq!(doc_of_last(src).as_deref(), Some("A is generated.\n"));
    }

    #[test]
    fn test_blank_comment_lines_collapse() {
        let src = "package p\n\n// First.\n//\n//\n// Second.\n//\nfunc A() {}\n";
        assert_eq!(doc_of_last(src).as_deref(), Some("First.\n\nSecond.\n"));
    }

    #[test]
    fn test_is_directive() {
        assert!(is_directive("go:generate foo"));
        assert!(is_directive("nolint:errcheck"));
        assert!(is_directive("line foo.go:10"));
        assert!(!is_directive("Note: not a directive"));
        assert!(!is_directive("TODO"));
    }
}
