//! Java source inspection and byte-range patching over a tree-sitter syntax
//! tree.

use healwatch_core::error::{MonitorError, MonitorResult};
use tree_sitter::{Node, Parser, Tree};

const ANNOTATION_KINDS: &[&str] = &["annotation", "marker_annotation"];
const PRIMITIVE_KINDS: &[&str] = &["integral_type", "floating_point_type", "boolean_type"];

/// A parsed compilation unit. Parsing fails if the tree has syntax errors.
pub struct JavaSource {
    text: String,
    tree: Tree,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub type_name: String,
    pub name: String,
    /// Declaration as written, e.g. `final String id`.
    pub text: String,
    pub is_primitive: bool,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub indent: String,
    pub annotations: Vec<String>,
    pub modifiers: Vec<String>,
    pub type_parameters: Option<String>,
    pub return_type: String,
    pub parameters: Vec<Parameter>,
    /// Byte just past the opening brace of the body; `None` for abstract
    /// and interface methods.
    pub body_open: Option<usize>,
    pub body_text: String,
}

impl MethodDecl {
    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }

    pub fn body_indent(&self) -> String {
        format!("{}    ", self.indent)
    }
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub start_byte: usize,
    pub indent: String,
    pub annotations: Vec<String>,
}

/// Text inserted at a byte offset of the original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub offset: usize,
    pub text: String,
}

impl Edit {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            text: text.into(),
        }
    }
}

fn java_parser() -> MonitorResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .map_err(|e| MonitorError::FixAnalysis(format!("failed to load java grammar: {e}")))?;
    Ok(parser)
}

impl JavaSource {
    pub fn parse(text: impl Into<String>) -> MonitorResult<Self> {
        let text = text.into();
        let tree = java_parser()?
            .parse(&text, None)
            .ok_or_else(|| MonitorError::FixAnalysis("java parser returned no tree".into()))?;
        if tree.root_node().has_error() {
            return Err(MonitorError::FixAnalysis(
                "java source does not parse cleanly".into(),
            ));
        }
        Ok(Self { text, tree })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Apply edits and re-parse; the result must still be valid Java.
    pub fn patched(&self, edits: Vec<Edit>) -> MonitorResult<JavaSource> {
        let patched = apply_edits(&self.text, edits);
        JavaSource::parse(patched).map_err(|e| match e {
            MonitorError::FixAnalysis(reason) => {
                MonitorError::FixAnalysis(format!("patched source rejected: {reason}"))
            }
            other => other,
        })
    }

    fn node_text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.text.as_bytes()).unwrap_or_default()
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.node_text(n).to_string())
    }

    fn line_indent(&self, byte: usize) -> String {
        let line_start = self.text[..byte].rfind('\n').map_or(0, |i| i + 1);
        self.text[line_start..byte]
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect()
    }

    /// First method declaration named `name`, in source order.
    pub fn find_method(&self, name: &str) -> Option<MethodDecl> {
        let node = find_first(self.tree.root_node(), &|n| {
            n.kind() == "method_declaration"
                && n.child_by_field_name("name")
                    .is_some_and(|id| self.node_text(id) == name)
        })?;
        Some(self.method_decl(node))
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.find_method(name).is_some()
    }

    fn method_decl(&self, node: Node<'_>) -> MethodDecl {
        let modifiers_node = named_child_of_kind(node, "modifiers");
        let (annotations, modifiers) = modifiers_node
            .map(|m| self.split_modifiers(m))
            .unwrap_or_default();
        let body = node.child_by_field_name("body").filter(|b| b.kind() == "block");

        MethodDecl {
            name: self.field_text(node, "name").unwrap_or_default(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            indent: self.line_indent(node.start_byte()),
            annotations,
            modifiers,
            type_parameters: named_child_of_kind(node, "type_parameters")
                .map(|t| self.node_text(t).to_string()),
            return_type: self.field_text(node, "type").unwrap_or_else(|| "void".into()),
            parameters: node
                .child_by_field_name("parameters")
                .map(|p| self.parameters(p))
                .unwrap_or_default(),
            body_open: body.map(|b| b.start_byte() + 1),
            body_text: body.map(|b| self.node_text(b).to_string()).unwrap_or_default(),
        }
    }

    fn split_modifiers(&self, modifiers: Node<'_>) -> (Vec<String>, Vec<String>) {
        let mut annotations = Vec::new();
        let mut keywords = Vec::new();
        let mut cursor = modifiers.walk();
        for child in modifiers.children(&mut cursor) {
            if ANNOTATION_KINDS.contains(&child.kind()) {
                if let Some(name) = self.field_text(child, "name") {
                    annotations.push(simple_name(&name).to_string());
                }
            } else if !child.is_extra() {
                keywords.push(self.node_text(child).to_string());
            }
        }
        (annotations, keywords)
    }

    fn parameters(&self, formal_parameters: Node<'_>) -> Vec<Parameter> {
        let mut cursor = formal_parameters.walk();
        let children: Vec<Node<'_>> = formal_parameters.named_children(&mut cursor).collect();
        children
            .into_iter()
            .filter_map(|param| match param.kind() {
                "formal_parameter" => {
                    let type_node = param.child_by_field_name("type")?;
                    Some(Parameter {
                        type_name: self.node_text(type_node).to_string(),
                        name: self.field_text(param, "name")?,
                        text: self.node_text(param).to_string(),
                        is_primitive: PRIMITIVE_KINDS.contains(&type_node.kind())
                            && param.child_by_field_name("dimensions").is_none(),
                    })
                }
                "spread_parameter" => {
                    let declarator = named_child_of_kind(param, "variable_declarator")?;
                    let name = self.field_text(declarator, "name")?;
                    let text = self.node_text(param).to_string();
                    Some(Parameter {
                        type_name: text
                            .split("...")
                            .next()
                            .unwrap_or_default()
                            .trim()
                            .to_string(),
                        name,
                        text,
                        is_primitive: false,
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Class declaration named `name`.
    pub fn find_class(&self, name: &str) -> Option<ClassDecl> {
        let node = find_first(self.tree.root_node(), &|n| {
            n.kind() == "class_declaration"
                && n.child_by_field_name("name")
                    .is_some_and(|id| self.node_text(id) == name)
        })?;
        let annotations = named_child_of_kind(node, "modifiers")
            .map(|m| self.split_modifiers(m).0)
            .unwrap_or_default();
        Some(ClassDecl {
            name: name.to_string(),
            start_byte: node.start_byte(),
            indent: self.line_indent(node.start_byte()),
            annotations,
        })
    }

    fn imports(&self) -> Vec<Node<'_>> {
        let root = self.tree.root_node();
        let mut cursor = root.walk();
        let imports: Vec<Node<'_>> = root
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "import_declaration")
            .collect();
        imports
    }

    /// Whether `fqcn` is imported directly or through its package wildcard.
    pub fn has_import(&self, fqcn: &str) -> bool {
        let wildcard = fqcn
            .rsplit_once('.')
            .map(|(package, _)| format!("{package}.*"));
        self.imports().into_iter().any(|node| {
            let imported: String = self
                .node_text(node)
                .trim_start_matches("import")
                .trim_end_matches(';')
                .split_whitespace()
                .collect();
            imported == fqcn || Some(&imported) == wildcard.as_ref()
        })
    }

    /// One edit adding every missing import, after the last import or the
    /// package declaration.
    pub fn import_edit(&self, fqcns: &[&str]) -> Option<Edit> {
        let mut missing: Vec<&str> = Vec::new();
        for fqcn in fqcns {
            if !self.has_import(fqcn) && !missing.contains(fqcn) {
                missing.push(fqcn);
            }
        }
        if missing.is_empty() {
            return None;
        }
        let lines: Vec<String> = missing.iter().map(|f| format!("import {f};")).collect();

        if let Some(last) = self.imports().last() {
            let text: String = lines.iter().map(|l| format!("\n{l}")).collect();
            return Some(Edit::insert(last.end_byte(), text));
        }
        let root = self.tree.root_node();
        if let Some(package) = named_child_of_kind(root, "package_declaration") {
            return Some(Edit::insert(
                package.end_byte(),
                format!("\n\n{}", lines.join("\n")),
            ));
        }
        Some(Edit::insert(0, format!("{}\n\n", lines.join("\n"))))
    }
}

/// Apply insertions to `source`. Edits at the same offset keep their order.
pub fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| e.offset);
    let extra: usize = edits.iter().map(|e| e.text.len()).sum();
    let mut out = String::with_capacity(source.len() + extra);
    let mut cursor = 0;
    for edit in edits {
        let offset = edit.offset.min(source.len());
        out.push_str(&source[cursor..offset]);
        out.push_str(&edit.text);
        cursor = offset;
    }
    out.push_str(&source[cursor..]);
    out
}

fn find_first<'t>(node: Node<'t>, pred: &dyn Fn(Node<'t>) -> bool) -> Option<Node<'t>> {
    if pred(node) {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(|child| find_first(child, pred))
}

fn named_child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
