// state-tape-extract/src/nodes/chart.rs
// ============================================================================
// Module: Chart Extraction Node
// Description: Plot-region and axis parsing with calibrated value mapping.
// Purpose: Emit chart structure always; values only when ticks calibrate.
// Dependencies: state-tape-core, state-tape-plugins
// ============================================================================

//! ## Overview
//! Chart regions come from parsed `chart` elements. Numeric tokens directly
//! below the region map to x-axis ticks and numeric tokens to its left map
//! to y-axis ticks. Pixel positions map to values only when at least two
//! numeric ticks are readable on an axis; otherwise the record keeps its
//! structural metadata and an empty `series` list. Values are never
//! invented.

// ============================================================================
// SECTION: Imports
// ============================================================================

use state_tape_core::AxisOrientation;
use state_tape_core::AxisTick;
use state_tape_core::Chart;
use state_tape_core::ChartAxis;
use state_tape_core::ElementGraph;
use state_tape_core::ElementType;
use state_tape_core::TextToken;
use state_tape_core::quantize_f64;
use state_tape_plugins::PluginContext;
use state_tape_plugins::PluginDescriptor;
use state_tape_plugins::PluginError;
use state_tape_plugins::PluginInputs;
use state_tape_plugins::PluginMetrics;
use state_tape_plugins::PluginOutput;
use state_tape_plugins::TapePlugin;

use crate::nodes::empty_config_schema;
use crate::nodes::node_descriptor;
use crate::nodes::object_schema;
use crate::nodes::parse_input;
use crate::nodes::to_items;
use crate::wire::KEY_CHARTS;
use crate::wire::KEY_ELEMENT_GRAPH;
use crate::wire::KEY_FRAME_NORMALIZED;
use crate::wire::KEY_LAYOUT_TOKENS;
use crate::wire::NormalizedFrame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Pixel margin around the region searched for tick labels.
const TICK_MARGIN_PX: i32 = 48;

// ============================================================================
// SECTION: Chart Node
// ============================================================================

/// `extract.chart` node.
pub struct ChartNode {
    /// Static descriptor.
    descriptor: PluginDescriptor,
}

impl ChartNode {
    /// Creates the node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: node_descriptor(
                "extract.chart",
                "ui_parse",
                &[KEY_FRAME_NORMALIZED, KEY_ELEMENT_GRAPH, KEY_LAYOUT_TOKENS],
                &[KEY_CHARTS],
                empty_config_schema(),
                object_schema(),
                &["/bbox/1", "/bbox/0"],
            ),
        }
    }
}

impl Default for ChartNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlugin for ChartNode {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        _ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let frame: NormalizedFrame = parse_input(inputs, KEY_FRAME_NORMALIZED)?;
        let graph: ElementGraph = parse_input(inputs, KEY_ELEMENT_GRAPH)?;
        let tokens: Vec<TextToken> = parse_input(inputs, KEY_LAYOUT_TOKENS)?;
        let gray = frame.gray().ok();
        let mut charts = Vec::new();
        for element in &graph.elements {
            if element.element_type != ElementType::Chart {
                continue;
            }
            charts.push(parse_chart(&frame, element.bbox, &tokens, gray.as_deref()));
        }
        Ok(PluginOutput {
            items: to_items(&charts)?,
            metrics: PluginMetrics {
                rows_in: tokens.len() as u64,
                rows_out: charts.len() as u64,
                model_calls: 0,
            },
            diagnostics: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses one chart region into axes and (when calibratable) series.
#[must_use]
pub fn parse_chart(
    frame: &NormalizedFrame,
    region: state_tape_core::BBox,
    tokens: &[TextToken],
    gray: Option<&[u8]>,
) -> Chart {
    let x_axis = parse_axis(
        AxisOrientation::X,
        tokens
            .iter()
            .filter(|token| {
                token.bbox.y1() >= region.y2()
                    && token.bbox.y1() <= region.y2() + TICK_MARGIN_PX
                    && token.bbox.x1() >= region.x1() - TICK_MARGIN_PX
                    && token.bbox.x2() <= region.x2() + TICK_MARGIN_PX
            })
            .collect::<Vec<_>>(),
    );
    let y_axis = parse_axis(
        AxisOrientation::Y,
        tokens
            .iter()
            .filter(|token| {
                token.bbox.x2() <= region.x1()
                    && token.bbox.x2() >= region.x1() - TICK_MARGIN_PX
                    && token.bbox.y1() >= region.y1() - TICK_MARGIN_PX
                    && token.bbox.y2() <= region.y2() + TICK_MARGIN_PX
            })
            .collect::<Vec<_>>(),
    );
    // Calibration requires at least two numeric ticks per mapped axis;
    // otherwise series stays empty and only structure persists.
    let calibrated = numeric_tick_count(&x_axis) >= 2 && numeric_tick_count(&y_axis) >= 2;
    let series = if calibrated {
        read_line_series(frame, &region, &x_axis, &y_axis, gray)
    } else {
        Vec::new()
    };
    let mut axes = Vec::new();
    if !x_axis.ticks.is_empty() {
        axes.push(x_axis);
    }
    if !y_axis.ticks.is_empty() {
        axes.push(y_axis);
    }
    Chart {
        frame_id: frame.frame_id.clone(),
        bbox: region,
        plot_bbox: Some(region),
        axes,
        series,
    }
}

/// Reads one line series by sampling the darkest pixel in each numeric
/// x-tick column and mapping both coordinates through the calibrated axes.
fn read_line_series(
    frame: &NormalizedFrame,
    region: &state_tape_core::BBox,
    x_axis: &ChartAxis,
    y_axis: &ChartAxis,
    gray: Option<&[u8]>,
) -> Vec<state_tape_core::ChartSeries> {
    let Some(gray) = gray else {
        return Vec::new();
    };
    let width = frame.width as i64;
    let mut points = Vec::new();
    for tick in x_axis.ticks.iter().filter(|tick| tick.value.is_some()) {
        let x = tick.pixel;
        if x < region.x1() || x >= region.x2() {
            continue;
        }
        let mut darkest_y = None;
        let mut darkest = u8::MAX;
        for y in region.y1().max(0)..region.y2().min(frame.height as i32) {
            if let Some(value) = gray.get((i64::from(y) * width + i64::from(x)) as usize) {
                if *value < darkest {
                    darkest = *value;
                    darkest_y = Some(y);
                }
            }
        }
        let (Some(y_pixel), Some(x_value)) = (darkest_y, tick.value) else {
            continue;
        };
        if let Some(y_value) = map_pixel_to_value(y_axis, y_pixel) {
            points.push(state_tape_core::ChartPoint { x: x_value, y: y_value });
        }
    }
    if points.is_empty() {
        return Vec::new();
    }
    vec![state_tape_core::ChartSeries { label: None, points }]
}

/// Maps a pixel position to an axis value using linear interpolation over
/// the two outermost numeric ticks. Returns `None` when the axis lacks two
/// numeric ticks; values are never invented.
#[must_use]
pub fn map_pixel_to_value(axis: &ChartAxis, pixel: i32) -> Option<f64> {
    let numeric: Vec<(&AxisTick, f64)> = axis
        .ticks
        .iter()
        .filter_map(|tick| tick.value.map(|value| (tick, value)))
        .collect();
    if numeric.len() < 2 {
        return None;
    }
    let (first, first_value) = numeric.first()?;
    let (last, last_value) = numeric.last()?;
    let pixel_span = f64::from(last.pixel - first.pixel);
    if pixel_span.abs() < f64::EPSILON {
        return None;
    }
    let fraction = f64::from(pixel - first.pixel) / pixel_span;
    Some(quantize_f64(first_value + fraction * (last_value - first_value)))
}

/// Parses tick labels for one axis from nearby tokens.
fn parse_axis(orientation: AxisOrientation, tokens: Vec<&TextToken>) -> ChartAxis {
    let mut ticks: Vec<AxisTick> = tokens
        .iter()
        .map(|token| {
            let pixel = match orientation {
                AxisOrientation::X => {
                    token.bbox.x1() + ((token.bbox.x2() - token.bbox.x1()) / 2)
                }
                AxisOrientation::Y => {
                    token.bbox.y1() + ((token.bbox.y2() - token.bbox.y1()) / 2)
                }
            };
            AxisTick {
                label: token.norm_text.clone(),
                value: parse_numeric_label(&token.norm_text),
                pixel,
            }
        })
        .collect();
    ticks.sort_by_key(|tick| tick.pixel);
    ChartAxis { orientation, ticks }
}

/// Counts the numeric ticks on an axis.
fn numeric_tick_count(axis: &ChartAxis) -> usize {
    axis.ticks.iter().filter(|tick| tick.value.is_some()).count()
}

/// Parses a tick label into a numeric value, tolerating thousands
/// separators and percent signs.
fn parse_numeric_label(label: &str) -> Option<f64> {
    let cleaned: String =
        label.chars().filter(|ch| !matches!(ch, ',' | '%' | '$' | ' ')).collect();
    cleaned.parse::<f64>().ok().map(quantize_f64)
}
