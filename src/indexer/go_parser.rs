use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tree_sitter::{Language, Node, Parser};

use super::comments::{doc_text, group_text, line_group, significant_children};
use crate::chunk::{DocChunk, kind};

/// Failure to parse one directory. Logged and skipped by the source walk.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: syntax error")]
    Syntax { path: String },

    #[error("{path}: missing package clause")]
    MissingPackage { path: String },
}

/// Chunks extracted from a single file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub package: String,
    pub chunks: Vec<DocChunk>,
}

/// Extracts exported, documented declarations from Go source with tree-sitter.
pub struct GoFileParser {
    parser: Parser,
}

impl GoFileParser {
    pub fn new() -> Result<Self, tree_sitter::LanguageError> {
        let language: Language = tree_sitter_go::LANGUAGE.into();
        let mut parser = Parser::new();
        parser.set_language(&language)?;
        Ok(Self { parser })
    }

    /// Parse every `.go` file in `dir` (not recursive).
    ///
    /// Chunks are grouped by declared package name, packages in name order and
    /// files in path order. Any unreadable or malformed file fails the whole
    /// directory.
    pub fn parse_dir(&mut self, dir: &Path) -> Result<Vec<DocChunk>, ParseError> {
        let read_err = |source| ParseError::Read {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let is_file = entry.file_type().map_err(read_err)?.is_file();
            let path = entry.path();
            if is_file && path.extension().is_some_and(|e| e == "go") {
                files.push(path);
            }
        }
        files.sort();

        let mut packages: BTreeMap<String, Vec<DocChunk>> = BTreeMap::new();
        for path in files {
            let source = fs::read(&path).map_err(|source| ParseError::Read {
                path: path.clone(),
                source,
            })?;
            let parsed = self.parse_source(&source, &path.to_string_lossy())?;
            packages.entry(parsed.package).or_default().extend(parsed.chunks);
        }

        Ok(packages.into_values().flatten().collect())
    }

    /// Parse one file's source. `filename` is recorded on every chunk.
    pub fn parse_source(&mut self, source: &[u8], filename: &str) -> Result<ParsedFile, ParseError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::Syntax {
                path: filename.to_string(),
            })?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::Syntax {
                path: filename.to_string(),
            });
        }

        let nodes = significant_children(root);
        let (pkg_idx, package) = nodes
            .iter()
            .enumerate()
            .find(|(_, n)| n.kind() == "package_clause")
            .and_then(|(i, n)| package_name(*n, source).map(|name| (i, name)))
            .ok_or_else(|| ParseError::MissingPackage {
                path: filename.to_string(),
            })?;

        let mut chunks = Vec::new();
        if let Some(doc) = doc_text(&nodes, pkg_idx, source) {
            chunks.push(DocChunk {
                kind: kind::PACKAGE.to_string(),
                symbol: package.clone(),
                doc,
                ..DocChunk::default()
            });
        }

        for (idx, node) in nodes.iter().enumerate() {
            match node.kind() {
                "type_declaration" => {
                    let decl_doc = doc_text(&nodes, idx, source);
                    type_declaration_chunks(*node, decl_doc, source, &mut chunks);
                }
                "function_declaration" | "method_declaration" => {
                    if let Some(chunk) = function_chunk(&nodes, idx, source) {
                        chunks.push(chunk);
                    }
                }
                _ => {}
            }
        }

        for chunk in &mut chunks {
            chunk.package = package.clone();
            chunk.filename = filename.to_string();
        }

        Ok(ParsedFile { package, chunks })
    }
}

fn text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or_default()
}

/// Source text of a type expression with whitespace runs collapsed.
fn type_text(node: Node<'_>, source: &[u8]) -> String {
    text(node, source)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn package_name(clause: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = clause.walk();
    let name = clause
        .named_children(&mut cursor)
        .find(|n| n.kind() == "package_identifier")
        .map(|n| text(n, source).to_string());
    name
}

/// Kind tag derived from the declared type expression.
fn type_kind(ty: Node<'_>, source: &[u8]) -> String {
    match ty.kind() {
        "struct_type" => kind::STRUCT.to_string(),
        "interface_type" => kind::INTERFACE.to_string(),
        "array_type" | "slice_type" | "implicit_length_array_type" => kind::ARRAY.to_string(),
        "map_type" => kind::MAP.to_string(),
        "channel_type" => kind::CHANNEL.to_string(),
        "function_type" => kind::FUNCTION.to_string(),
        "type_identifier" => kind::alias_for(text(ty, source)),
        _ => kind::TYPE.to_string(),
    }
}

fn type_declaration_chunks(
    decl: Node<'_>,
    decl_doc: Option<String>,
    source: &[u8],
    out: &mut Vec<DocChunk>,
) {
    let specs = significant_children(decl);
    for (idx, spec) in specs.iter().enumerate() {
        if !matches!(spec.kind(), "type_spec" | "type_alias") {
            continue;
        }
        let (Some(name), Some(ty)) = (
            spec.child_by_field_name("name"),
            spec.child_by_field_name("type"),
        ) else {
            continue;
        };
        let name = text(name, source);
        if !is_exported(name) {
            continue;
        }

        // Grouped `type ( ... )` specs fall back to their own comment.
        let doc = decl_doc
            .clone()
            .or_else(|| doc_text(&specs, idx, source))
            .unwrap_or_default();

        let mut chunk = DocChunk {
            kind: type_kind(ty, source),
            symbol: name.to_string(),
            doc,
            ..DocChunk::default()
        };
        match ty.kind() {
            "struct_type" => chunk.children = struct_fields(ty, name, source),
            "interface_type" => chunk.children = interface_methods(ty, name, source),
            _ => {}
        }
        out.push(chunk);
    }
}

/// Doc comment plus trailing line comment of a member.
fn member_doc(siblings: &[Node<'_>], idx: usize, source: &[u8]) -> String {
    let mut doc = doc_text(siblings, idx, source).unwrap_or_default();
    let member = siblings[idx];
    let mut cursor = member.walk();
    let inner: Vec<Node<'_>> = member
        .children(&mut cursor)
        .filter(|n| n.kind() == "comment")
        .collect();
    doc.push_str(&group_text(&inner, source));
    doc.push_str(&group_text(line_group(siblings, idx), source));
    doc
}

fn struct_fields(ty: Node<'_>, parent: &str, source: &[u8]) -> Vec<DocChunk> {
    let Some(list) = ty
        .named_child(0)
        .filter(|n| n.kind() == "field_declaration_list")
    else {
        return Vec::new();
    };

    let fields = significant_children(list);
    let mut children = Vec::new();
    for (idx, field) in fields.iter().enumerate() {
        if field.kind() != "field_declaration" {
            continue;
        }
        let Some(ty) = field.child_by_field_name("type") else {
            continue;
        };

        let mut cursor = field.walk();
        let names: Vec<&str> = field
            .children_by_field_name("name", &mut cursor)
            .map(|n| text(n, source))
            .collect();

        let mut field_type = type_text(ty, source);
        let member = if names.is_empty() {
            let mut cursor = field.walk();
            if field.children(&mut cursor).any(|n| n.kind() == "*") {
                field_type = format!("*{field_type}");
            }
            format!("embedded {field_type}")
        } else {
            names.join(", ")
        };

        children.push(DocChunk::child(
            field_type,
            format!("{parent}.{member}"),
            member_doc(&fields, idx, source),
        ));
    }
    children
}

fn interface_methods(ty: Node<'_>, parent: &str, source: &[u8]) -> Vec<DocChunk> {
    let elems = significant_children(ty);
    let mut children = Vec::new();
    for (idx, elem) in elems.iter().enumerate() {
        let member = match elem.kind() {
            "method_elem" | "method_spec" => match elem.child_by_field_name("name") {
                Some(name) => text(name, source).to_string(),
                None => continue,
            },
            "type_elem" | "constraint_elem" | "interface_type_name" => {
                format!("embedded {}", type_text(*elem, source))
            }
            _ => continue,
        };
        children.push(DocChunk::child(
            kind::METHOD,
            format!("{parent}.{member}"),
            member_doc(&elems, idx, source),
        ));
    }
    children
}

fn function_chunk(nodes: &[Node<'_>], idx: usize, source: &[u8]) -> Option<DocChunk> {
    let decl = nodes[idx];
    let name = text(decl.child_by_field_name("name")?, source);
    if !is_exported(name) {
        return None;
    }
    let doc = doc_text(nodes, idx, source)?;

    let symbol = match decl.child_by_field_name("receiver") {
        Some(receiver) => format!("{}.{name}", receiver_name(receiver, source)),
        None => name.to_string(),
    };

    Some(DocChunk {
        kind: kind::FUNCTION.to_string(),
        symbol,
        doc,
        ..DocChunk::default()
    })
}

/// `T` or `*T` for plain receivers; empty for anything else (generic
/// instantiations, parenthesised types).
fn receiver_name(receiver: Node<'_>, source: &[u8]) -> String {
    let mut cursor = receiver.walk();
    let Some(ty) = receiver
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")
        .and_then(|p| p.child_by_field_name("type"))
    else {
        return String::new();
    };

    match ty.kind() {
        "type_identifier" => text(ty, source).to_string(),
        "pointer_type" => match ty.named_child(0) {
            Some(inner) if inner.kind() == "type_identifier" => format!("*{}", text(inner, source)),
            _ => String::new(),
        },
        _ => String::new(),
    }
}
