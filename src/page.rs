//! Host page wrapper
//!
//! A parsed document plus the small set of mutations the engine is allowed
//! to make: inserting/removing annotation blocks and inserting the export
//! control. Elements are identified by their tree `NodeId`, which stays
//! stable while other nodes are inserted or detached.

use ego_tree::{NodeMut, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::error::{Error, Result};

pub use ego_tree::NodeId;

/// Class carried by every inserted annotation block
pub const ANNOTATION_CLASS: &str = "unit-price-annotation";
/// Extra class for the variant nested inside table cells
pub const ANNOTATION_COMPACT_CLASS: &str = "unit-price-annotation--compact";
/// Class of the export button
pub const EXPORT_CONTROL_CLASS: &str = "unit-price-export";

const EXPORT_CONTROL_MARKUP: &str =
    r#"<button type="button" class="unit-price-export">単価CSV出力</button>"#;

/// A detached piece of markup that can be grafted into a page.
#[derive(Debug)]
pub struct Fragment {
    html: Html,
}

impl Fragment {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_fragment(markup),
        }
    }

    /// Top-level nodes of the fragment
    fn top_nodes(&self) -> impl Iterator<Item = NodeRef<'_, Node>> {
        self.html.root_element().children()
    }
}

pub struct Page {
    html: Html,
    url: Option<Url>,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            url: None,
        }
    }

    pub fn parse_with_url(html: &str, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|source| Error::Url {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            html: Html::parse_document(html),
            url: Some(url),
        })
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.as_ref().and_then(Url::host_str)
    }

    /// Resolve a possibly relative link against the page URL
    pub fn absolute_url(&self, href: &str) -> Option<String> {
        match &self.url {
            Some(base) => base.join(href).ok().map(String::from),
            None => Url::parse(href).ok().map(String::from),
        }
    }

    /// The document's root element (`<html>`)
    pub fn root(&self) -> NodeId {
        self.html.root_element().id()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Whether `id` is an element still attached to this document.
    /// Detached nodes stay in the tree's arena, so lookup alone is not enough.
    pub fn contains(&self, id: NodeId) -> bool {
        let root = self.root();
        self.element(id)
            .is_some_and(|el| id == root || el.ancestors().any(|a| a.id() == root))
    }

    /// All elements under `scope` matching `selector`, in document order
    pub fn select(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        match self.element(scope) {
            Some(el) => el.select(selector).map(|e| e.id()).collect(),
            None => vec![],
        }
    }

    pub fn select_first(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.element(scope)?.select(selector).next().map(|e| e.id())
    }

    /// Trimmed text content, skipping any annotation blocks inside.
    pub fn text(&self, id: NodeId) -> Option<String> {
        let el = self.element(id)?;
        let mut out = String::new();
        for node in el.descendants() {
            if let Node::Text(text) = node.value() {
                if !inside_annotation(node) {
                    out.push_str(text);
                }
            }
        }
        Some(out.trim().to_string())
    }

    /// Text of the element's direct text children only
    pub fn own_text(&self, id: NodeId) -> Option<String> {
        let node = self.html.tree.get(id)?;
        let text: String = node
            .children()
            .filter_map(|child| match child.value() {
                Node::Text(text) => Some(&**text),
                _ => None,
            })
            .collect();
        Some(text.trim().to_string())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.element(id)?.value().attr(name).map(String::from)
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.value().name())
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        let node = self.html.tree.get(id)?;
        node.parent().and_then(ElementRef::wrap).map(|e| e.id())
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let node = self.html.tree.get(id)?;
        node.next_siblings().find_map(ElementRef::wrap).map(|e| e.id())
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        match self.html.tree.get(id) {
            Some(node) => node.children().filter_map(ElementRef::wrap).map(|e| e.id()).collect(),
            None => vec![],
        }
    }

    /// Nearest ancestor-or-self with the given tag name
    pub fn closest(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        let el = self.element(id)?;
        if el.value().name() == tag {
            return Some(id);
        }
        el.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == tag)
            .map(|e| e.id())
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id)
            .map(|el| el.value().classes().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn is_annotation(&self, id: NodeId) -> bool {
        self.has_class(id, ANNOTATION_CLASS)
    }

    /// Annotation blocks that are direct children of `id`
    pub fn annotation_children(&self, id: NodeId) -> Vec<NodeId> {
        self.element_children(id)
            .into_iter()
            .filter(|&child| self.is_annotation(child))
            .collect()
    }

    /// Every annotation block in the document
    pub fn annotations(&self) -> Vec<NodeId> {
        match class_selector(ANNOTATION_CLASS) {
            Some(selector) => self.select(self.root(), &selector),
            None => vec![],
        }
    }

    /// Detach an annotation block. Anything else is left alone.
    pub fn remove_annotation(&mut self, id: NodeId) -> bool {
        if !self.is_annotation(id) {
            return false;
        }
        match self.html.tree.get_mut(id) {
            Some(mut node) => {
                node.detach();
                true
            }
            None => false,
        }
    }

    /// Insert `fragment` as the next sibling(s) of `anchor`.
    /// Returns the id of the first inserted element.
    pub fn insert_after(&mut self, anchor: NodeId, fragment: &Fragment) -> Option<NodeId> {
        // A node without a parent has no sibling slot
        self.parent_element(anchor)?;

        let mut cursor = anchor;
        let mut first = None;
        for top in fragment.top_nodes() {
            let mut anchor_mut = self.html.tree.get_mut(cursor)?;
            let mut inserted = anchor_mut.insert_after(top.value().clone());
            graft(&mut inserted, top);
            cursor = inserted.id();
            if first.is_none() && top.value().is_element() {
                first = Some(cursor);
            }
        }
        first
    }

    /// Append `fragment` as the last child(ren) of `parent`.
    pub fn append_child(&mut self, parent: NodeId, fragment: &Fragment) -> Option<NodeId> {
        let mut first = None;
        for top in fragment.top_nodes() {
            let mut parent_mut = self.html.tree.get_mut(parent)?;
            let mut inserted = parent_mut.append(top.value().clone());
            graft(&mut inserted, top);
            if first.is_none() && top.value().is_element() {
                first = Some(inserted.id());
            }
        }
        first
    }

    pub fn has_export_control(&self) -> bool {
        class_selector(EXPORT_CONTROL_CLASS)
            .and_then(|selector| self.select_first(self.root(), &selector))
            .is_some()
    }

    /// Put the export button at the top of `<body>`, once.
    pub fn insert_export_control(&mut self) -> bool {
        if self.has_export_control() {
            return false;
        }

        let body = match Selector::parse("body") {
            Ok(sel) => self.select_first(self.root(), &sel),
            Err(_) => None,
        }
        .unwrap_or_else(|| self.root());

        let fragment = Fragment::parse(EXPORT_CONTROL_MARKUP);
        let Some(top) = fragment.top_nodes().next() else {
            return false;
        };
        let Some(mut body_mut) = self.html.tree.get_mut(body) else {
            return false;
        };
        let mut inserted = body_mut.prepend(top.value().clone());
        graft(&mut inserted, top);
        true
    }

    /// Serialize the (possibly annotated) document
    pub fn html(&self) -> String {
        self.html.html()
    }
}

fn class_selector(class: &str) -> Option<Selector> {
    Selector::parse(&format!(".{class}")).ok()
}

fn inside_annotation(node: NodeRef<'_, Node>) -> bool {
    node.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().classes().any(|c| c == ANNOTATION_CLASS))
}

fn graft(dest: &mut NodeMut<'_, Node>, src: NodeRef<'_, Node>) {
    for child in src.children() {
        let mut copy = dest.append(child.value().clone());
        graft(&mut copy, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
    <html><body>
        <div class="card">
            <span class="price">3,980万円</span>
            <span class="area">70.5㎡</span>
        </div>
    </body></html>
    "#;

    fn sel(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_text_and_siblings() {
        let page = Page::parse(HTML);
        let price = page.select_first(page.root(), &sel(".price")).unwrap();
        assert_eq!(page.text(price).unwrap(), "3,980万円");

        let area = page.next_element_sibling(price).unwrap();
        assert_eq!(page.text(area).unwrap(), "70.5㎡");

        let card = page.parent_element(price).unwrap();
        assert!(page.has_class(card, "card"));
        assert_eq!(page.closest(price, "div"), Some(card));
    }

    #[test]
    fn test_insert_and_remove_annotation() {
        let mut page = Page::parse(HTML);
        let price = page.select_first(page.root(), &sel(".price")).unwrap();

        let fragment = Fragment::parse(r#"<div class="unit-price-annotation"><span>x</span></div>"#);
        let inserted = page.insert_after(price, &fragment).unwrap();

        assert_eq!(page.next_element_sibling(price), Some(inserted));
        assert_eq!(page.annotations().len(), 1);
        assert!(page.html().contains("unit-price-annotation"));

        assert!(page.remove_annotation(inserted));
        assert!(page.annotations().is_empty());
        assert!(page.contains(price));
    }

    #[test]
    fn test_text_skips_annotations() {
        let mut page = Page::parse(HTML);
        let price = page.select_first(page.root(), &sel(".price")).unwrap();
        let fragment = Fragment::parse(r#"<div class="unit-price-annotation">坪単価: 1万円</div>"#);
        page.append_child(price, &fragment).unwrap();

        assert_eq!(page.text(price).unwrap(), "3,980万円");
        assert_eq!(page.annotation_children(price).len(), 1);
    }

    #[test]
    fn test_detached_annotation_is_not_contained() {
        let mut page = Page::parse(HTML);
        let price = page.select_first(page.root(), &sel(".price")).unwrap();
        let block = page
            .insert_after(price, &Fragment::parse(r#"<div class="unit-price-annotation">x</div>"#))
            .unwrap();
        assert!(page.contains(block));

        page.remove_annotation(block);

        assert!(!page.contains(block));
        assert!(page.element(block).is_some());
        assert!(page.contains(page.root()));
    }

    #[test]
    fn test_own_text_skips_child_elements() {
        let page = Page::parse("<p class='amount'>5,480<span>万円</span></p>");
        let p = page.select_first(page.root(), &sel(".amount")).unwrap();
        assert_eq!(page.own_text(p).as_deref(), Some("5,480"));
        assert_eq!(page.text(p).as_deref(), Some("5,480万円"));
    }

    #[test]
    fn test_remove_refuses_non_annotation() {
        let mut page = Page::parse(HTML);
        let price = page.select_first(page.root(), &sel(".price")).unwrap();
        assert!(!page.remove_annotation(price));
        assert!(page.contains(price));
    }

    #[test]
    fn test_export_control_inserted_once() {
        let mut page = Page::parse(HTML);
        assert!(page.insert_export_control());
        assert!(!page.insert_export_control());
        assert_eq!(page.html().matches(EXPORT_CONTROL_CLASS).count(), 1);
    }

    #[test]
    fn test_absolute_url() {
        let page = Page::parse_with_url(HTML, "https://suumo.jp/ms/chuko/tokyo/").unwrap();
        assert_eq!(page.host(), Some("suumo.jp"));
        assert_eq!(
            page.absolute_url("/ms/chuko/tokyo/nc_123/").as_deref(),
            Some("https://suumo.jp/ms/chuko/tokyo/nc_123/")
        );
    }
}
