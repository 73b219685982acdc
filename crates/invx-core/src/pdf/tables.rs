//! Ruled ("lattice") table detection from PDF content streams.
//!
//! Stroked or filled rulings are collected per page, grouped into grids of
//! intersecting horizontal and vertical lines, and text runs are placed into
//! the grid cells by their starting point. Merged cells are not modelled:
//! every grid line splits the table.

use lopdf::content::Content;
use lopdf::Object;
use tracing::{debug, trace};

use super::{Result, TableDetector, load};
use crate::error::PdfError;
use crate::models::document::TableRow;

const TOLERANCE: f32 = 2.0;
const MIN_RULING: f32 = 5.0;

/// Detects bordered tables drawn with line or rectangle operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatticeTableDetector;

impl LatticeTableDetector {
    pub fn new() -> Self {
        Self
    }
}

impl TableDetector for LatticeTableDetector {
    fn detect(&self, data: &[u8]) -> Result<Vec<TableRow>> {
        let loaded = load(data)?;
        let doc = &loaded.document;

        let mut rows = Vec::new();
        for (page_number, page_id) in doc.get_pages() {
            let content = doc
                .get_page_content(page_id)
                .map_err(|e| PdfError::TableDetection(format!("page {}: {}", page_number, e)))?;
            let content = Content::decode(&content)
                .map_err(|e| PdfError::TableDetection(format!("page {}: {}", page_number, e)))?;

            let layout = PageLayout::from_content(&content);
            let page_rows = layout.table_rows(page_number);
            trace!(
                "Page {}: {} rulings, {} text runs, {} table rows",
                page_number,
                layout.rulings.len(),
                layout.runs.len(),
                page_rows.len()
            );
            rows.extend(page_rows);
        }

        debug!("Detected {} table row(s)", rows.len());
        Ok(rows)
    }
}

/// Affine transform in PDF row-vector convention `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self` applied first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (x * a + y * c + e, x * b + y * d + f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ruling {
    /// y, x-from, x-to
    Horizontal(f32, f32, f32),
    /// x, y-from, y-to
    Vertical(f32, f32, f32),
}

impl Ruling {
    fn from_segment((x1, y1): (f32, f32), (x2, y2): (f32, f32)) -> Option<Self> {
        if (y1 - y2).abs() <= TOLERANCE && (x1 - x2).abs() >= MIN_RULING {
            Some(Ruling::Horizontal((y1 + y2) / 2.0, x1.min(x2), x1.max(x2)))
        } else if (x1 - x2).abs() <= TOLERANCE && (y1 - y2).abs() >= MIN_RULING {
            Some(Ruling::Vertical((x1 + x2) / 2.0, y1.min(y2), y1.max(y2)))
        } else {
            None
        }
    }

    fn intersects(&self, other: &Ruling) -> bool {
        match (self, other) {
            (Ruling::Horizontal(y, x1, x2), Ruling::Vertical(x, y1, y2))
            | (Ruling::Vertical(x, y1, y2), Ruling::Horizontal(y, x1, x2)) => {
                *x >= x1 - TOLERANCE
                    && *x <= x2 + TOLERANCE
                    && *y >= y1 - TOLERANCE
                    && *y <= y2 + TOLERANCE
            }
            _ => false,
        }
    }
}

/// A shown text string and where it starts, in user space.
#[derive(Debug, Clone)]
struct TextRun {
    x: f32,
    y: f32,
    size: f32,
    text: String,
}

#[derive(Debug, Default)]
struct PageLayout {
    rulings: Vec<Ruling>,
    runs: Vec<TextRun>,
}

impl PageLayout {
    fn from_content(content: &Content) -> Self {
        let mut layout = PageLayout::default();

        let mut ctm = Matrix::IDENTITY;
        let mut stack: Vec<Matrix> = Vec::new();

        let mut path: Vec<((f32, f32), (f32, f32))> = Vec::new();
        let mut current: Option<(f32, f32)> = None;
        let mut subpath_start: Option<(f32, f32)> = None;

        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;
        let mut leading = 0.0f32;
        let mut font_size = 10.0f32;

        for op in &content.operations {
            let nums: Vec<f32> = op.operands.iter().filter_map(number).collect();
            match op.operator.as_str() {
                "q" => stack.push(ctm),
                "Q" => ctm = stack.pop().unwrap_or(Matrix::IDENTITY),
                "cm" if nums.len() == 6 => {
                    let m = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                    ctm = m.then(&ctm);
                }

                "m" if nums.len() == 2 => {
                    let p = ctm.apply(nums[0], nums[1]);
                    current = Some(p);
                    subpath_start = Some(p);
                }
                "l" if nums.len() == 2 => {
                    let p = ctm.apply(nums[0], nums[1]);
                    if let Some(from) = current {
                        path.push((from, p));
                    }
                    current = Some(p);
                }
                "h" => {
                    if let (Some(from), Some(start)) = (current, subpath_start) {
                        path.push((from, start));
                        current = Some(start);
                    }
                }
                "re" if nums.len() == 4 => {
                    let (x, y, w, h) = (nums[0], nums[1], nums[2], nums[3]);
                    let corners = [
                        ctm.apply(x, y),
                        ctm.apply(x + w, y),
                        ctm.apply(x + w, y + h),
                        ctm.apply(x, y + h),
                    ];
                    if w.abs() <= TOLERANCE || h.abs() <= TOLERANCE {
                        // A thin filled bar is a single ruling.
                        path.push((corners[0], corners[2]));
                    } else {
                        for i in 0..4 {
                            path.push((corners[i], corners[(i + 1) % 4]));
                        }
                    }
                    current = Some(corners[0]);
                    subpath_start = Some(corners[0]);
                }
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    layout
                        .rulings
                        .extend(path.drain(..).filter_map(|(a, b)| Ruling::from_segment(a, b)));
                    current = None;
                    subpath_start = None;
                }
                "n" => {
                    path.clear();
                    current = None;
                    subpath_start = None;
                }

                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "Tf" if op.operands.len() == 2 => {
                    if let Some(size) = number(&op.operands[1]) {
                        font_size = size;
                    }
                }
                "TL" if nums.len() == 1 => leading = nums[0],
                "Td" if nums.len() == 2 => {
                    tlm = Matrix::translate(nums[0], nums[1]).then(&tlm);
                    tm = tlm;
                }
                "TD" if nums.len() == 2 => {
                    leading = -nums[1];
                    tlm = Matrix::translate(nums[0], nums[1]).then(&tlm);
                    tm = tlm;
                }
                "Tm" if nums.len() == 6 => {
                    tlm = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                    tm = tlm;
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -leading).then(&tlm);
                    tm = tlm;
                }
                "Tj" | "TJ" | "'" | "\"" => {
                    if op.operator != "Tj" && op.operator != "TJ" {
                        tlm = Matrix::translate(0.0, -leading).then(&tlm);
                        tm = tlm;
                    }
                    let text: String = op
                        .operands
                        .iter()
                        .filter_map(|operand| decode_operand(operand))
                        .collect();
                    if !text.trim().is_empty() {
                        let (x, y) = tm.then(&ctm).apply(0.0, 0.0);
                        let scale = tm.then(&ctm).0[3].abs().max(f32::EPSILON);
                        layout.runs.push(TextRun {
                            x,
                            y,
                            size: font_size * scale,
                            text: text.trim().to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        layout
    }

    /// Group rulings into connected grids and read their cells.
    fn table_rows(&self, page: u32) -> Vec<TableRow> {
        let mut grids: Vec<Grid> = connected_components(&self.rulings)
            .into_iter()
            .filter_map(|component| Grid::from_rulings(&component))
            .collect();
        grids.sort_by(|a, b| b.ys[0].total_cmp(&a.ys[0]).then(a.xs[0].total_cmp(&b.xs[0])));

        let mut rows = Vec::new();
        for (table_index, grid) in grids.iter().enumerate() {
            let cells = grid.fill(&self.runs);
            let mut body: Vec<Vec<String>> = cells
                .into_iter()
                .filter(|row| row.iter().any(|cell| !cell.is_empty()))
                .collect();
            if body.is_empty() {
                continue;
            }

            let header = if body.len() > 1 { Some(body.remove(0)) } else { None };
            for values in body {
                rows.push(TableRow::from_values(page, table_index, header.as_deref(), values));
            }
        }
        rows
    }
}

fn connected_components(rulings: &[Ruling]) -> Vec<Vec<Ruling>> {
    let n = rulings.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if rulings[i].intersects(&rulings[j]) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<Ruling>> = std::collections::BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(rulings[i]);
    }
    groups.into_values().collect()
}

/// Cell boundaries of one table: `ys` top to bottom, `xs` left to right.
#[derive(Debug)]
struct Grid {
    ys: Vec<f32>,
    xs: Vec<f32>,
}

impl Grid {
    fn from_rulings(rulings: &[Ruling]) -> Option<Self> {
        let mut ys = Vec::new();
        let mut xs = Vec::new();
        for ruling in rulings {
            match ruling {
                Ruling::Horizontal(y, _, _) => ys.push(*y),
                Ruling::Vertical(x, _, _) => xs.push(*x),
            }
        }
        let mut ys = merge_close(ys);
        ys.reverse();
        let xs = merge_close(xs);
        if ys.len() < 2 || xs.len() < 2 {
            return None;
        }
        Some(Grid { ys, xs })
    }

    fn fill(&self, runs: &[TextRun]) -> Vec<Vec<String>> {
        let mut cells = vec![vec![String::new(); self.xs.len() - 1]; self.ys.len() - 1];
        for run in runs {
            // Sample slightly inside the glyph box, above the baseline.
            let px = run.x + 0.5;
            let py = run.y + run.size * 0.3;
            let col = self.xs.windows(2).position(|w| px >= w[0] && px < w[1]);
            let row = self.ys.windows(2).position(|w| py <= w[0] && py > w[1]);
            if let (Some(row), Some(col)) = (row, col) {
                let cell = &mut cells[row][col];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(&run.text);
            }
        }
        cells
    }
}

/// Sort and collapse coordinates closer than the tolerance.
fn merge_close(mut values: Vec<f32>) -> Vec<f32> {
    values.sort_by(|a, b| a.total_cmp(b));
    let mut merged: Vec<f32> = Vec::new();
    for value in values {
        match merged.last() {
            Some(last) if (value - last).abs() <= TOLERANCE => {}
            _ => merged.push(value),
        }
    }
    merged
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a string or TJ array operand: UTF-16BE with BOM, then UTF-8, then Latin-1.
fn decode_operand(operand: &Object) -> Option<String> {
    match operand {
        Object::String(bytes, _) => Some(decode_bytes(bytes)),
        Object::Array(items) => {
            let mut text = String::new();
            for item in items {
                match item {
                    Object::String(bytes, _) => text.push_str(&decode_bytes(bytes)),
                    // Large negative adjustments separate words.
                    Object::Integer(n) if *n < -100 => text.push(' '),
                    Object::Real(r) if (*r as f32) < -100.0 => text.push(' '),
                    _ => {}
                }
            }
            Some(text)
        }
        _ => None,
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&units) {
            return s;
        }
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{PageSpec, build_pdf, ruled_table};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detects_ruled_table_with_header() {
        let table = ruled_table(
            600.0,
            20.0,
            &[50.0, 250.0, 320.0, 420.0, 520.0],
            &[
                &["Description", "Qty", "Unit Price", "Total"],
                &["Widget", "2", "100.00", "200.00"],
                &["Gadget", "1", "50.00", "50.00"],
            ],
        );
        let data = build_pdf(vec![table]);
        let rows = LatticeTableDetector::new().detect(&data).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].page, 1);
        assert_eq!(
            rows[0].cells,
            vec![
                ("Description".to_string(), "Widget".to_string()),
                ("Qty".to_string(), "2".to_string()),
                ("Unit Price".to_string(), "100.00".to_string()),
                ("Total".to_string(), "200.00".to_string()),
            ]
        );
        assert_eq!(rows[1].get("Description"), Some("Gadget"));
    }

    #[test]
    fn test_single_row_table_uses_positional_columns() {
        let table = ruled_table(500.0, 20.0, &[50.0, 150.0, 250.0], &[&["A", "B"]]);
        let rows = LatticeTableDetector::new().detect(&build_pdf(vec![table])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("col_1"), Some("A"));
        assert_eq!(rows[0].get("col_2"), Some("B"));
    }

    #[test]
    fn test_plain_text_has_no_tables() {
        let data = build_pdf(vec![PageSpec::text(&["Invoice #1", "Total: 5.00"])]);
        assert!(LatticeTableDetector::new().detect(&data).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_pdf_is_error() {
        assert!(LatticeTableDetector::new().detect(b"%PDF-1.4 nope").is_err());
    }

    #[test]
    fn test_matrix_composition() {
        let m = Matrix::translate(10.0, 20.0).then(&Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]));
        assert_eq!(m.apply(0.0, 0.0), (20.0, 40.0));
    }

    #[test]
    fn test_decode_operand_variants() {
        assert_eq!(decode_operand(&Object::string_literal("abc")), Some("abc".to_string()));
        let utf16 = Object::String(vec![0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42], lopdf::StringFormat::Hexadecimal);
        assert_eq!(decode_operand(&utf16), Some("AB".to_string()));
        let tj = Object::Array(vec![
            Object::string_literal("Unit"),
            Object::Integer(-250),
            Object::string_literal("Price"),
        ]);
        assert_eq!(decode_operand(&tj), Some("Unit Price".to_string()));
    }
}
