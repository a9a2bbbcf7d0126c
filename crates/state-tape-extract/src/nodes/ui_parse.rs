// state-tape-extract/src/nodes/ui_parse.rs
// ============================================================================
// Module: UI Parse Node
// Description: VLM-JSON UI parsing into a validated element graph.
// Purpose: Turn model output into arena-linked elements with attached text.
// Dependencies: state-tape-core, state-tape-plugins, jsonschema
// ============================================================================

//! ## Overview
//! The node runs the VLM backend in JSON mode and validates the output
//! against the declared element schema; invalid output yields an empty graph
//! plus a diagnostic, never a partial parse. Valid elements are flattened
//! (nested `children` lifted into the arena), OCR tokens attach by IoU ≥
//! 0.1, and `z` is assigned by containment depth then top-to-bottom order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use state_tape_core::BBox;
use state_tape_core::ElementGraph;
use state_tape_core::ElementState;
use state_tape_core::ElementType;
use state_tape_core::ElementId;
use state_tape_core::StateId;
use state_tape_core::TextToken;
use state_tape_core::UIElement;
use state_tape_core::VlmBackend;
use state_tape_core::check_acyclic;
use state_tape_plugins::Diagnostic;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::TapePlugin;
use state_tape_plugins::compile_schema;

use crate::nodes::empty_config_schema;
use crate::nodes::node_descriptor;
use crate::nodes::object_schema;
use crate::nodes::parse_input;
use crate::nodes::to_items;
use crate::wire::KEY_ELEMENT_GRAPH;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_TEXT_TOKENS;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// IoU threshold for attaching OCR tokens to elements.
const TOKEN_ATTACH_IOU: f64 = 0.1;

/// JSON schema the VLM output must satisfy.
fn element_output_schema() -> Value {
    json!({
        "type": "object",
        "required": ["elements"],
        "properties": {
            "elements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["type", "bbox"],
                    "properties": {
                        "type": { "type": "string" },
                        "bbox": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "minItems": 4,
                            "maxItems": 4
                        },
                        "label": { "type": ["string", "null"] },
                        "interactable": { "type": "boolean" },
                        "app_hint": { "type": ["string", "null"] },
                        "state": { "type": "object" },
                        "children": { "type": "array" }
                    }
                }
            }
        }
    })
}

// ============================================================================
// SECTION: UI Parse Node
// ============================================================================

/// `ui.parse` node in VLM-JSON mode.
pub struct UiParseNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
    /// Backing vision-language model.
    backend: Arc<dyn VlmBackend>,
}

impl UiParseNode {
    /// Creates the node over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn VlmBackend>) -> Self {
        Self {
            descriptor: node_descriptor(
                "ui.parse",
                "ui_parse",
                &[KEY_FRAME_NORMALIZED, KEY_TEXT_TOKENS],
                &[KEY_ELEMENT_GRAPH],
                empty_config_schema(),
                object_schema(),
                &["/state_id"],
            ),
            backend,
        }
    }
}

impl TapePlugin for UiParseNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_TEXT_TOKENS)?;
        if ctx.cancel.is_cancelled() {
            return Err(PluginError::Cancelled("ui.parse".to_string()));
        }
        let patch =
            frame.patch().map_err(|err| PluginError::Execution(err.to_string()))?;
        let raw = self
            .backend
            .parse_elements(&patch)
            .map_err(|err| PluginError::Execution(err.to_string()))?;
        let state_id = StateId::new(format!("state-{}", frame.frame_id));
        let validator = compile_schema(&element_output_schema())?;
        let (graph, diagnostics) = match validator.validate(&raw) {
            Ok(()) => {
                let graph = build_graph(&state_id, &raw, &tokens, frame.width, frame.height);
                match graph {
                    Ok(graph) => (graph, Vec::new()),
                    Err(message) => (
                        empty_graph(&state_id),
                        vec![Diagnostic {
                            code: "ui_parse_rejected".to_string(),
                            message,
                        }],
                    ),
                }
            }
            Err(err) => (
                empty_graph(&state_id),
                vec![Diagnostic {
                    code: "ui_parse_schema_invalid".to_string(),
                    message: err.to_string(),
                }],
            ),
        };
        let element_count = graph.elements.len() as u64;
        Ok(PluginOutput {
            items: to_items(std::slice::from_ref(&graph))?,
            metrics: PluginMetrics { rows_in: 1, rows_out: element_count, model_calls: 1 },
            diagnostics,
        })
    }
}

/// Returns the empty graph used when validation fails.
fn empty_graph(state_id: &StateId) -> ElementGraph {
    ElementGraph { state_id: state_id.clone(), elements: Vec::new(), edges: Vec::new() }
}

// ============================================================================
// SECTION: Graph Construction
// ============================================================================

/// Builds the element graph from validated VLM output.
fn build_graph(
    state_id: &StateId,
    raw: &Value,
    tokens: &[TextToken],
    frame_width: u32,
    frame_height: u32,
) -> Result<ElementGraph, String> {
    let raw_elements = raw
        .get("elements")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing elements array".to_string())?;
    let mut elements = Vec::new();
    for (index, raw_element) in raw_elements.iter().enumerate() {
        flatten_element(
            raw_element,
            None,
            &mut elements,
            format!("e{index}"),
            frame_width,
            frame_height,
        );
    }
    if let Some(cyclic) = check_acyclic(&elements) {
        return Err(format!("cyclic parent linkage at {cyclic}"));
    }
    attach_tokens(&mut elements, tokens);
    assign_z(&mut elements);
    let mut graph =
        ElementGraph { state_id: state_id.clone(), elements, edges: Vec::new() };
    build_containment_edges(&mut graph);
    graph.normalize();
    Ok(graph)
}

/// Flattens one raw element (and its nested children) into the arena.
fn flatten_element(
    raw: &Value,
    parent: Option<ElementId>,
    out: &mut Vec<UIElement>,
    id_prefix: String,
    frame_width: u32,
    frame_height: u32,
) {
    let Some(bbox_raw) = raw.get("bbox").and_then(Value::as_array) else {
        return;
    };
    let coords: Vec<i32> = bbox_raw
        .iter()
        .filter_map(Value::as_i64)
        .map(|v| i32::try_from(v).unwrap_or(i32::MAX))
        .collect();
    if coords.len() != 4 {
        return;
    }
    let Ok(bbox) = BBox::new(coords[0], coords[1], coords[2], coords[3]) else {
        // Invalid bboxes drop the element, never clamp silently.
        return;
    };
    if !bbox.within_frame(frame_width, frame_height) {
        return;
    }
    let element_id = ElementId::new(id_prefix.clone());
    let element_type = raw
        .get("type")
        .and_then(Value::as_str)
        .map_or(ElementType::Unknown, parse_element_type);
    let state = raw.get("state").map_or_else(ElementState::default, parse_element_state);
    out.push(UIElement {
        element_id: element_id.clone(),
        element_type,
        bbox,
        text_refs: Vec::new(),
        label: raw.get("label").and_then(Value::as_str).map(ToString::to_string),
        interactable: raw.get("interactable").and_then(Value::as_bool).unwrap_or(false),
        state,
        parent_id: parent,
        children_ids: Vec::new(),
        z: 0,
        app_hint: raw.get("app_hint").and_then(Value::as_str).map(ToString::to_string),
    });
    if let Some(children) = raw.get("children").and_then(Value::as_array) {
        for (index, child) in children.iter().enumerate() {
            flatten_element(
                child,
                Some(element_id.clone()),
                out,
                format!("{id_prefix}.{index}"),
                frame_width,
                frame_height,
            );
        }
    }
    // Record children ids on the parent after flattening.
    let child_ids: Vec<ElementId> = out
        .iter()
        .filter(|el| el.parent_id.as_ref() == Some(&element_id))
        .map(|el| el.element_id.clone())
        .collect();
    if let Some(slot) = out.iter_mut().find(|el| el.element_id == element_id) {
        slot.children_ids = child_ids;
    }
}

/// Parses the element type label.
fn parse_element_type(label: &str) -> ElementType {
    match label {
        "button" => ElementType::Button,
        "textbox" => ElementType::Textbox,
        "checkbox" => ElementType::Checkbox,
        "radio" => ElementType::Radio,
        "dropdown" => ElementType::Dropdown,
        "tab" => ElementType::Tab,
        "menu" => ElementType::Menu,
        "icon" => ElementType::Icon,
        "table" => ElementType::Table,
        "grid" => ElementType::Grid,
        "chart" => ElementType::Chart,
        "code" => ElementType::Code,
        "window" => ElementType::Window,
        "scrollbar" => ElementType::Scrollbar,
        "cell" => ElementType::Cell,
        _ => ElementType::Unknown,
    }
}

/// Parses the element interaction state object.
fn parse_element_state(raw: &Value) -> ElementState {
    ElementState {
        enabled: raw.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        selected: raw.get("selected").and_then(Value::as_bool).unwrap_or(false),
        focused: raw.get("focused").and_then(Value::as_bool).unwrap_or(false),
        expanded: raw.get("expanded").and_then(Value::as_bool).unwrap_or(false),
    }
}

/// Attaches the nearest OCR tokens to each element by IoU ≥ 0.1.
fn attach_tokens(elements: &mut [UIElement], tokens: &[TextToken]) {
    for element in elements.iter_mut() {
        for token in tokens {
            if element.bbox.iou(&token.bbox) >= TOKEN_ATTACH_IOU
                || element.bbox.contains(&token.bbox)
            {
                element.text_refs.push(token.token_id.clone());
            }
        }
        element.text_refs.sort();
        element.text_refs.dedup();
    }
}

/// Assigns `z` by containment depth, then top-to-bottom order.
fn assign_z(elements: &mut [UIElement]) {
    let depths: Vec<u32> = elements
        .iter()
        .map(|element| {
            elements
                .iter()
                .filter(|other| {
                    other.element_id != element.element_id && other.bbox.contains(&element.bbox)
                })
                .count() as u32
        })
        .collect();
    let mut order: Vec<usize> = (0..elements.len()).collect();
    order.sort_by_key(|&i| (depths[i], elements[i].bbox.y1(), elements[i].bbox.x1()));
    for (rank, index) in order.into_iter().enumerate() {
        elements[index].z = rank as u32;
    }
}

/// Adds `contains` edges for direct parent linkage.
fn build_containment_edges(graph: &mut ElementGraph) {
    use state_tape_core::ElementEdge;
    use state_tape_core::ElementEdgeKind;
    for element in &graph.elements {
        if let Some(parent) = &element.parent_id {
            graph.edges.push(ElementEdge {
                src: parent.clone(),
                dst: element.element_id.clone(),
                kind: ElementEdgeKind::Contains,
            });
        }
    }
}
