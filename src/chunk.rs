//! The unit of indexing: one documented Go symbol and its rendered members.
use std::fmt;

/// Kind tags for top-level chunks. Children carry `method` or a field type.
pub mod kind {
    pub const PACKAGE: &str = "package";
    pub const FUNCTION: &str = "function";
    pub const STRUCT: &str = "struct";
    pub const INTERFACE: &str = "interface";
    pub const ARRAY: &str = "array";
    pub const MAP: &str = "map";
    pub const CHANNEL: &str = "channel";
    pub const TYPE: &str = "type";
    pub const METHOD: &str = "method";

    /// Kind of a type declaration whose underlying type is a bare identifier.
    #[must_use]
    pub fn alias_for(name: &str) -> String {
        format!("alias for {name}")
    }
}

/// A documented declaration extracted from a Go source file.
///
/// `children` only exists between parsing and storage; once stored, a chunk
/// is the single text blob produced by [`DocChunk::render`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocChunk {
    pub kind: String,
    pub symbol: String,
    pub doc: String,
    pub package: String,
    pub filename: String,
    pub children: Vec<DocChunk>,
}

/// The upsert key of a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkIdentity {
    pub package: String,
    pub filename: String,
    pub symbol: String,
    pub kind: String,
}

impl DocChunk {
    /// Create a child member (struct field or interface method).
    #[must_use]
    pub fn child(kind: impl Into<String>, symbol: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            symbol: symbol.into(),
            doc: doc.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn identity(&self) -> ChunkIdentity {
        ChunkIdentity {
            package: self.package.clone(),
            filename: self.filename.clone(),
            symbol: self.symbol.clone(),
            kind: self.kind.clone(),
        }
    }

    /// Render `"<kind> <symbol>: <doc>"` followed by one indented line per child.
    ///
    /// This text is both the stored `data` column and the embedding input, so
    /// it must stay byte-for-byte stable.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_indent("")
    }

    #[must_use]
    pub fn render_indent(&self, indent: &str) -> String {
        let mut out = String::new();
        self.write_indent(&mut out, indent);
        out
    }

    fn write_indent(&self, out: &mut String, indent: &str) {
        out.push_str(indent);
        out.push_str(&self.kind);
        out.push(' ');
        out.push_str(&self.symbol);
        out.push_str(": ");
        out.push_str(self.doc.replace('\n', " ").trim());

        let child_indent = format!("{indent}  ");
        for child in &self.children {
            out.push('\n');
            child.write_indent(out, &child_indent);
        }
    }
}

impl fmt::Display for DocChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
