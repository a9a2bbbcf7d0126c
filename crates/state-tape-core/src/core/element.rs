// state-tape-core/src/core/element.rs
// ============================================================================
// Module: State Tape UI Elements
// Description: UI element records and the per-state element graph.
// Purpose: Represent parsed UI structure with id-based arena linkage.
// Dependencies: crate::core::{geometry, identifiers}, serde
// ============================================================================

//! ## Overview
//! Parsed UI structure is stored as flat element records linked by identifier
//! (arena style) rather than by ownership, because parents reference children
//! and children reference parents. The store enforces acyclicity on
//! `parent_id` at write time; this module provides the cycle check.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::geometry::BBox;
use crate::core::identifiers::ElementId;
use crate::core::identifiers::StateId;

// ============================================================================
// SECTION: Element Types
// ============================================================================

/// Recognized UI element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// Push button.
    Button,
    /// Editable text box.
    Textbox,
    /// Checkbox.
    Checkbox,
    /// Radio button.
    Radio,
    /// Dropdown selector.
    Dropdown,
    /// Tab header.
    Tab,
    /// Menu or menu item.
    Menu,
    /// Icon.
    Icon,
    /// Table region.
    Table,
    /// Grid region.
    Grid,
    /// Chart region.
    Chart,
    /// Code region.
    Code,
    /// Top-level window.
    Window,
    /// Scrollbar.
    Scrollbar,
    /// Table or grid cell.
    Cell,
    /// Unclassified element.
    Unknown,
}

/// Interaction state of a UI element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementState {
    /// True when the element is enabled.
    pub enabled: bool,
    /// True when the element is selected.
    pub selected: bool,
    /// True when the element has keyboard focus.
    pub focused: bool,
    /// True when the element is expanded.
    pub expanded: bool,
}

// ============================================================================
// SECTION: UI Element
// ============================================================================

/// One parsed UI element in frame coordinates.
///
/// # Invariants
/// - `bbox` lies within the owning frame bounds (validated before persist).
/// - `parent_id` linkage is acyclic (enforced by [`check_acyclic`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    /// Element identifier, stable across frames when matching succeeds.
    pub element_id: ElementId,
    /// Element type.
    #[serde(rename = "type")]
    pub element_type: ElementType,
    /// Element bounds in frame coordinates.
    pub bbox: BBox,
    /// Token identifiers of attached OCR text.
    pub text_refs: Vec<String>,
    /// Accessible label when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// True when the element accepts interaction.
    pub interactable: bool,
    /// Interaction state.
    #[serde(default)]
    pub state: ElementState,
    /// Parent element identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    /// Child element identifiers.
    #[serde(default)]
    pub children_ids: Vec<ElementId>,
    /// Stacking order: containment depth, then top-to-bottom.
    pub z: u32,
    /// Owning application hint when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_hint: Option<String>,
}

// ============================================================================
// SECTION: Element Graph
// ============================================================================

/// Relationship kinds between elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementEdgeKind {
    /// Source geometrically contains destination.
    Contains,
    /// Source and destination are visually aligned.
    AlignedWith,
    /// Source is the textual label for destination.
    LabelFor,
}

/// Directed relationship between two elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEdge {
    /// Source element identifier.
    pub src: ElementId,
    /// Destination element identifier.
    pub dst: ElementId,
    /// Relationship kind.
    pub kind: ElementEdgeKind,
}

/// Flat element graph for one screen state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementGraph {
    /// Owning state identifier.
    pub state_id: StateId,
    /// Flat element records.
    pub elements: Vec<UIElement>,
    /// Directed relationships.
    pub edges: Vec<ElementEdge>,
}

impl ElementGraph {
    /// Sorts elements by `(z, bbox.y1, bbox.x1, element_id)` and edges by
    /// `(kind, src, dst)` into canonical order for hashing.
    pub fn normalize(&mut self) {
        self.elements.sort_by(|a, b| {
            (a.z, a.bbox.y1(), a.bbox.x1(), a.element_id.as_str()).cmp(&(
                b.z,
                b.bbox.y1(),
                b.bbox.x1(),
                b.element_id.as_str(),
            ))
        });
        self.edges.sort_by(|a, b| {
            (a.kind, a.src.as_str(), a.dst.as_str()).cmp(&(b.kind, b.src.as_str(), b.dst.as_str()))
        });
    }
}

// ============================================================================
// SECTION: Acyclicity Check
// ============================================================================

/// Verifies that `parent_id` linkage over the provided elements is acyclic.
///
/// Returns the identifier participating in a cycle, or `None` when the
/// hierarchy is a forest.
#[must_use]
pub fn check_acyclic(elements: &[UIElement]) -> Option<ElementId> {
    let parents: BTreeMap<&str, &ElementId> = elements
        .iter()
        .filter_map(|el| el.parent_id.as_ref().map(|p| (el.element_id.as_str(), p)))
        .collect();
    for element in elements {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut cursor = element.element_id.as_str();
        seen.insert(cursor);
        while let Some(parent) = parents.get(cursor) {
            cursor = parent.as_str();
            if !seen.insert(cursor) {
                return Some(ElementId::new(cursor));
            }
        }
    }
    None
}
