//! Turn extractor — rebuilds the ordered conversation from a snapshot.
//!
//! Works on a parsed copy of the rendered document (the live page is never
//! touched). Primary strategy pairs turn containers holding at most one user
//! and one assistant section each; when the container pattern is absent it
//! falls back to selecting both role patterns in one document-order pass and
//! classifying each element by its own marker, so both roles share a single
//! code path.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::{node::Node, ElementRef, Html, Selector};

use crate::pipeline::error::ExtractionError;
use crate::pipeline::types::{Attachment, Role, Turn};
use crate::selectors::SelectorRegistry;

/// `language-rust` / `lang-py` style class names on code elements.
static LANGUAGE_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lang(?:uage)?-([A-Za-z0-9_+#.-]+)$").expect("valid regex"));

/// Sanity filter for language labels read from sibling elements.
static LANGUAGE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+#.-]{1,24}$").expect("valid regex"));

/// Tags that force a paragraph break around their content.
const PARAGRAPH_TAGS: &[&str] = &["p", "ul", "ol", "blockquote", "table", "h1", "h2", "h3", "h4", "h5", "h6"];

/// Tags that force a line break around their content.
const LINE_TAGS: &[&str] = &["div", "li", "tr", "section", "article"];

/// A snapshot reduced to its conversation: title plus ordered turns.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedConversation {
    pub title: Option<String>,
    pub turns: Vec<Turn>,
}

struct CompiledSelectors {
    container: Selector,
    user: Selector,
    assistant: Selector,
    role_union: Selector,
    reasoning: Selector,
    code_block: Selector,
    code_language_label: Selector,
    image: Selector,
    ignored: Selector,
    title: Selector,
    code_element: Selector,
    document_title: Selector,
}

pub struct TurnExtractor {
    compiled: CompiledSelectors,
}

impl TurnExtractor {
    /// Compile the registry's patterns; a malformed pattern is rejected here
    /// rather than surfacing as silently-empty selections later.
    pub fn new(registry: &SelectorRegistry) -> Result<Self, ExtractionError> {
        Ok(Self {
            compiled: CompiledSelectors {
                container: compile(&registry.turn_container)?,
                user: compile(&registry.user_section)?,
                assistant: compile(&registry.assistant_section)?,
                role_union: compile(&registry.role_union())?,
                reasoning: compile(&registry.reasoning_section)?,
                code_block: compile(&registry.code_block)?,
                code_language_label: compile(&registry.code_language_label)?,
                image: compile(&registry.image)?,
                ignored: compile(&registry.ignored)?,
                title: compile(&registry.title)?,
                code_element: Selector::parse("code").expect("valid selector"),
                document_title: Selector::parse("title").expect("valid selector"),
            },
        })
    }

    /// Rebuild the ordered turn sequence from a document snapshot.
    ///
    /// Fails only when nothing structural matches at all; an empty message
    /// section still yields a turn with empty content.
    pub fn extract(&self, html: &str) -> Result<ExtractedConversation, ExtractionError> {
        let document = Html::parse_document(html);
        let mut turns = Vec::new();

        for container in document.select(&self.compiled.container) {
            if let Some(section) = container.select(&self.compiled.user).next() {
                let turn = self.build_turn(turns.len(), Role::User, section);
                turns.push(turn);
            }
            if let Some(section) = container.select(&self.compiled.assistant).next() {
                let turn = self.build_turn(turns.len(), Role::Assistant, section);
                turns.push(turn);
            }
        }

        if turns.is_empty() {
            // Container pattern absent (or empty): classify role sections
            // directly, in document order.
            for section in document.select(&self.compiled.role_union) {
                let role = if self.compiled.user.matches(&section) {
                    Role::User
                } else {
                    Role::Assistant
                };
                let turn = self.build_turn(turns.len(), role, section);
                turns.push(turn);
            }
        }

        if turns.is_empty() {
            return Err(ExtractionError::NoConversationStructure);
        }

        tracing::debug!(turns = turns.len(), "turn extraction complete");
        Ok(ExtractedConversation {
            title: self.derive_title(&document),
            turns,
        })
    }

    fn build_turn(&self, index: usize, role: Role, section: ElementRef<'_>) -> Turn {
        // Reasoning is pulled out first and excluded from the main walk so
        // its text cannot surface twice.
        let mut excluded: HashSet<NodeId> = HashSet::new();
        let mut reasoning = None;
        if role == Role::Assistant {
            let mut parts: Vec<String> = Vec::new();
            for panel in section.select(&self.compiled.reasoning) {
                excluded.insert(panel.id());
                let text = self.collect_section_text(panel, &HashSet::new());
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            if !parts.is_empty() {
                reasoning = Some(parts.join("\n\n"));
            }
        }

        let attachments = section
            .select(&self.compiled.image)
            .filter(|image| !is_under_any(image, &excluded))
            .filter_map(|image| image.value().attr("src"))
            .filter(|src| !src.trim().is_empty())
            .map(Attachment::image)
            .collect();

        Turn {
            index,
            role,
            content: self.collect_section_text(section, &excluded),
            reasoning,
            attachments,
        }
    }

    // ──────────────────────────────────────────────
    // Text collection
    // ──────────────────────────────────────────────

    fn collect_section_text(&self, section: ElementRef<'_>, skip: &HashSet<NodeId>) -> String {
        let mut raw = String::new();
        for child in section.children() {
            self.walk_node(child, skip, &mut raw);
        }
        normalize_block_text(&raw)
    }

    fn walk_node(&self, node: NodeRef<'_, Node>, skip: &HashSet<NodeId>, out: &mut String) {
        if skip.contains(&node.id()) {
            return;
        }
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let Some(el) = ElementRef::wrap(node) else {
                    return;
                };
                if self.compiled.ignored.matches(&el) {
                    return;
                }
                if self.compiled.code_block.matches(&el) {
                    self.push_code_fence(el, out);
                    return;
                }
                if element.name() == "br" {
                    out.push('\n');
                    return;
                }
                let boundary = boundary_for(element.name());
                push_boundary(out, boundary);
                for child in node.children() {
                    self.walk_node(child, skip, out);
                }
                push_boundary(out, boundary);
            }
            _ => {}
        }
    }

    fn push_code_fence(&self, code_region: ElementRef<'_>, out: &mut String) {
        let language = self.detect_code_language(code_region).unwrap_or_default();
        let body_root = code_region
            .select(&self.compiled.code_element)
            .next()
            .unwrap_or(code_region);
        let body = self.raw_code_text(body_root);

        push_boundary(out, Boundary::Line);
        out.push_str("```");
        out.push_str(&language);
        out.push('\n');
        out.push_str(body.trim_matches('\n'));
        out.push('\n');
        out.push_str("```\n");
    }

    /// Verbatim text of a code region, skipping chrome (copy buttons) but
    /// preserving whitespace exactly.
    fn raw_code_text(&self, node: ElementRef<'_>) -> String {
        fn visit(sel: &Selector, node: NodeRef<'_, Node>, out: &mut String) {
            match node.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(node) {
                        if sel.matches(&el) {
                            return;
                        }
                    }
                    for child in node.children() {
                        visit(sel, child, out);
                    }
                }
                _ => {}
            }
        }
        let mut out = String::new();
        for child in node.children() {
            visit(&self.compiled.ignored, child, &mut out);
        }
        out
    }

    /// Best-effort language label, in priority order: an attribute on the
    /// code element itself, an attribute on an ancestor, then a sibling
    /// label element.
    fn detect_code_language(&self, code_region: ElementRef<'_>) -> Option<String> {
        let code_el = code_region.select(&self.compiled.code_element).next();
        if let Some(language) = code_el.and_then(|el| language_from_attributes(&el)) {
            return Some(language);
        }
        if let Some(language) = language_from_attributes(&code_region) {
            return Some(language);
        }
        for ancestor in code_region.ancestors().filter_map(ElementRef::wrap) {
            if let Some(language) = language_from_attributes(&ancestor) {
                return Some(language);
            }
        }
        for ancestor in code_region.ancestors().filter_map(ElementRef::wrap).take(2) {
            if let Some(label) = ancestor.select(&self.compiled.code_language_label).next() {
                let text: String = label.text().collect();
                if let Some(language) = sanitize_language_label(&text) {
                    return Some(language);
                }
            }
        }
        None
    }

    // ──────────────────────────────────────────────
    // Metadata
    // ──────────────────────────────────────────────

    fn derive_title(&self, document: &Html) -> Option<String> {
        if let Some(el) = document.select(&self.compiled.title).next() {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
        document
            .select(&self.compiled.document_title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
    }
}

fn compile(pattern: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(pattern).map_err(|e| ExtractionError::InvalidSelector {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn is_under_any(element: &ElementRef<'_>, excluded: &HashSet<NodeId>) -> bool {
    if excluded.is_empty() {
        return false;
    }
    if excluded.contains(&element.id()) {
        return true;
    }
    element
        .ancestors()
        .any(|ancestor| excluded.contains(&ancestor.id()))
}

fn language_from_attributes(element: &ElementRef<'_>) -> Option<String> {
    if let Some(language) = element.value().attr("data-language") {
        return sanitize_language_label(language);
    }
    element
        .value()
        .classes()
        .find_map(|class| LANGUAGE_CLASS_RE.captures(class))
        .map(|captures| captures[1].to_ascii_lowercase())
}

fn sanitize_language_label(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    LANGUAGE_TOKEN_RE
        .is_match(trimmed)
        .then(|| trimmed.to_ascii_lowercase())
}

// ──────────────────────────────────────────────
// Whitespace normalization
// ──────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Boundary {
    None,
    Line,
    Paragraph,
}

fn boundary_for(tag: &str) -> Boundary {
    if PARAGRAPH_TAGS.contains(&tag) {
        Boundary::Paragraph
    } else if LINE_TAGS.contains(&tag) {
        Boundary::Line
    } else {
        Boundary::None
    }
}

fn push_boundary(out: &mut String, boundary: Boundary) {
    match boundary {
        Boundary::None => {}
        Boundary::Line => {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        Boundary::Paragraph => {
            if !out.is_empty() && !out.ends_with("\n\n") {
                while out.ends_with('\n') {
                    out.pop();
                }
                out.push_str("\n\n");
            }
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Collapse inline whitespace and blank-line runs while leaving fenced code
/// bodies byte-exact.
fn normalize_block_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_fence = false;
    for line in raw.split('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            lines.push(line.trim().to_string());
        } else if in_fence {
            lines.push(line.to_string());
        } else {
            lines.push(collapse_whitespace(line));
        }
    }

    // Trim leading/trailing blank lines and collapse interior runs.
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    for line in lines {
        let is_fence_marker = line.starts_with("```");
        if is_fence_marker {
            in_fence = !in_fence;
        }
        if !in_fence && !is_fence_marker && line.is_empty() {
            if out.is_empty() || out.last().is_some_and(String::is_empty) {
                continue;
            }
            out.push(String::new());
        } else {
            out.push(line);
        }
    }
    while out.last().is_some_and(String::is_empty) {
        out.pop();
    }
    out.join("\n")
}
