use std::{fmt::Display, fs, io::Write, path::Path};

use tracing::info;

use crate::{
    config::ExportConfig,
    error::{Result, TraceError},
    types::{ArcShape, Circle, DetectionResult, Segment},
};

/// DXF version written to `$ACADVER` (R2000, the first with LWPOLYLINE)
pub const ACAD_VERSION: &str = "AC1015";

/// Pixel space to CAD space: Y flipped against the image height, then scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadTransform {
    image_height: f64,
    scale: f64,
}

impl CadTransform {
    /// Non-positive or non-finite scales fall back to 1.0
    pub fn new(image_height: u32, scale: f64) -> Self {
        Self {
            image_height: image_height as f64,
            scale: ExportConfig::default().with_scale(scale).effective_scale(),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn apply(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        [x * self.scale, (self.image_height - y) * self.scale]
    }

    pub fn length(&self, value: f64) -> f64 {
        value * self.scale
    }
}

/// Group-code/value pair writer that also hands out object handles
struct DxfWriter {
    out: String,
    next_handle: u32,
}

impl DxfWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            next_handle: 1,
        }
    }

    fn pair(&mut self, code: u16, value: impl Display) {
        self.out.push_str(&format!("{code}\n{value}\n"));
    }

    fn real(&mut self, code: u16, value: f64) {
        self.out.push_str(&format!("{code}\n{value:.6}\n"));
    }

    fn point(&mut self, base: u16, [x, y]: [f64; 2], with_z: bool) {
        self.real(base, x);
        self.real(base + 10, y);
        if with_z {
            self.real(base + 20, 0.0);
        }
    }

    /// Next free handle, as the hex string DXF stores
    fn handle(&mut self) -> String {
        let handle = format!("{:X}", self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn begin_section(&mut self, name: &str) {
        self.pair(0, "SECTION");
        self.pair(2, name);
    }

    fn end_section(&mut self) {
        self.pair(0, "ENDSEC");
    }

    /// Opens a symbol table and returns its handle
    fn begin_table(&mut self, name: &str, entries: usize) -> String {
        let handle = self.handle();
        self.pair(0, "TABLE");
        self.pair(2, name);
        self.pair(5, &handle);
        self.pair(330, 0);
        self.pair(100, "AcDbSymbolTable");
        self.pair(70, entries);
        handle
    }

    fn end_table(&mut self) {
        self.pair(0, "ENDTAB");
    }

    /// Common head of a table entry; returns the entry handle
    fn table_record(&mut self, kind: &str, table: &str, subclass: &str, name: &str) -> String {
        let handle = self.handle();
        self.pair(0, kind);
        // DIMSTYLE is the one record type that keeps its handle under 105
        self.pair(if kind == "DIMSTYLE" { 105 } else { 5 }, &handle);
        self.pair(330, table);
        self.pair(100, "AcDbSymbolTableRecord");
        self.pair(100, subclass);
        self.pair(2, name);
        self.pair(70, 0);
        handle
    }

    /// Common head of a graphical entity owned by `owner`
    fn entity(&mut self, kind: &str, owner: &str, layer: &str, subclass: &str) {
        let handle = self.handle();
        self.pair(0, kind);
        self.pair(5, handle);
        self.pair(330, owner);
        self.pair(100, "AcDbEntity");
        self.pair(8, layer);
        self.pair(100, subclass);
    }

    fn finish(mut self) -> String {
        self.pair(0, "EOF");
        self.out
    }
}

/// Handles of the block records that own entities
struct BlockRecords {
    model_space: String,
    paper_space: String,
}

/// Serializes a [`DetectionResult`] into an ASCII DXF R2000 drawing.
///
/// Lines become LINE, circles CIRCLE, and ellipses and polylines LWPOLYLINE
/// entities on a single layer. Primitives with non-finite coordinates are
/// skipped.
///
/// The drawing carries the object model R2000 readers expect: every object
/// has a handle and subclass markers, the symbol tables define the `0` and
/// output layers with the `CONTINUOUS` linetype, the model and paper space
/// blocks exist, and OBJECTS holds the root dictionary.
#[derive(Debug, Clone, Default)]
pub struct DxfExporter {
    config: ExportConfig,
}

impl DxfExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn export(&self, result: &DetectionResult) -> Result<String> {
        if result.is_empty() {
            return Err(TraceError::NothingToExport);
        }

        let transform = CadTransform::new(result.image_height, self.config.scale);
        let layer = self.config.layer.as_str();
        let extents = [
            transform.length(result.image_width as f64),
            transform.length(result.image_height as f64),
        ];

        // Everything after HEADER is written first so $HANDSEED is known
        let mut body = DxfWriter::new();
        body.begin_section("CLASSES");
        body.end_section();

        let records = write_tables(&mut body, layer, extents);
        write_blocks(&mut body, &records);

        body.begin_section("ENTITIES");
        let owner = records.model_space.as_str();
        let mut entities = 0usize;
        for line in &result.lines {
            entities += usize::from(write_line(&mut body, owner, layer, &transform, line));
        }
        for circle in &result.circles {
            entities += usize::from(write_circle(&mut body, owner, layer, &transform, circle));
        }
        for arc in &result.arcs {
            let (points, closed) = match arc {
                ArcShape::Ellipse(e) if e.is_valid() => {
                    (e.sample_points(self.config.ellipse_segments.max(3)), true)
                }
                ArcShape::Ellipse(_) => continue,
                ArcShape::Polyline(p) => (p.points.clone(), p.closed),
            };
            entities += usize::from(write_polyline(
                &mut body, owner, layer, &transform, &points, closed,
            ));
        }
        body.end_section();

        write_objects(&mut body);

        let mut dxf = DxfWriter::new();
        dxf.begin_section("HEADER");
        dxf.pair(9, "$ACADVER");
        dxf.pair(1, ACAD_VERSION);
        dxf.pair(9, "$HANDSEED");
        dxf.pair(5, format!("{:X}", body.next_handle));
        dxf.pair(9, "$INSUNITS");
        dxf.pair(70, 0);
        dxf.pair(9, "$EXTMIN");
        dxf.point(10, [0.0, 0.0], true);
        dxf.pair(9, "$EXTMAX");
        dxf.point(10, extents, true);
        dxf.end_section();
        dxf.out.push_str(&body.out);

        info!(
            "Exported {} DXF entities at scale {}",
            entities,
            transform.scale()
        );
        Ok(dxf.finish())
    }

    pub fn export_bytes(&self, result: &DetectionResult) -> Result<Vec<u8>> {
        self.export(result).map(String::into_bytes)
    }

    pub fn write_to<W: Write>(&self, result: &DetectionResult, mut writer: W) -> Result<()> {
        let text = self.export(result)?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Write the drawing to `path`. Nothing is created when export fails.
    pub fn save(&self, result: &DetectionResult, path: impl AsRef<Path>) -> Result<()> {
        let text = self.export(result)?;
        fs::write(path, text)?;
        Ok(())
    }
}

fn write_tables(dxf: &mut DxfWriter, layer: &str, extents: [f64; 2]) -> BlockRecords {
    dxf.begin_section("TABLES");

    let table = dxf.begin_table("VPORT", 1);
    dxf.table_record("VPORT", &table, "AcDbViewportTableRecord", "*ACTIVE");
    dxf.point(10, [0.0, 0.0], false);
    dxf.point(11, [1.0, 1.0], false);
    dxf.point(12, [extents[0] / 2.0, extents[1] / 2.0], false);
    dxf.real(40, extents[1].max(1.0));
    dxf.real(41, if extents[1] > 0.0 { extents[0] / extents[1] } else { 1.0 });
    dxf.end_table();

    let table = dxf.begin_table("LTYPE", 3);
    for name in ["ByBlock", "ByLayer"] {
        dxf.table_record("LTYPE", &table, "AcDbLinetypeTableRecord", name);
        dxf.pair(3, "");
        dxf.pair(72, 65);
        dxf.pair(73, 0);
        dxf.real(40, 0.0);
    }
    dxf.table_record("LTYPE", &table, "AcDbLinetypeTableRecord", "CONTINUOUS");
    dxf.pair(3, "Solid line");
    dxf.pair(72, 65);
    dxf.pair(73, 0);
    dxf.real(40, 0.0);
    dxf.end_table();

    let layers: Vec<&str> = if layer == "0" { vec!["0"] } else { vec!["0", layer] };
    let table = dxf.begin_table("LAYER", layers.len());
    for name in layers {
        dxf.table_record("LAYER", &table, "AcDbLayerTableRecord", name);
        dxf.pair(62, 7);
        dxf.pair(6, "CONTINUOUS");
    }
    dxf.end_table();

    let table = dxf.begin_table("STYLE", 1);
    dxf.table_record("STYLE", &table, "AcDbTextStyleTableRecord", "Standard");
    dxf.real(40, 0.0);
    dxf.real(41, 1.0);
    dxf.real(50, 0.0);
    dxf.pair(71, 0);
    dxf.real(42, 2.5);
    dxf.pair(3, "txt");
    dxf.pair(4, "");
    dxf.end_table();

    for name in ["VIEW", "UCS"] {
        dxf.begin_table(name, 0);
        dxf.end_table();
    }

    let table = dxf.begin_table("APPID", 1);
    dxf.table_record("APPID", &table, "AcDbRegAppTableRecord", "ACAD");
    dxf.end_table();

    let table = dxf.begin_table("DIMSTYLE", 1);
    dxf.pair(100, "AcDbDimStyleTable");
    dxf.table_record("DIMSTYLE", &table, "AcDbDimStyleTableRecord", "Standard");
    dxf.end_table();

    let table = dxf.begin_table("BLOCK_RECORD", 2);
    let records = BlockRecords {
        model_space: dxf.table_record("BLOCK_RECORD", &table, "AcDbBlockTableRecord", "*Model_Space"),
        paper_space: dxf.table_record("BLOCK_RECORD", &table, "AcDbBlockTableRecord", "*Paper_Space"),
    };
    dxf.end_table();

    dxf.end_section();
    records
}

fn write_blocks(dxf: &mut DxfWriter, records: &BlockRecords) {
    dxf.begin_section("BLOCKS");
    for (name, owner, paper) in [
        ("*Model_Space", records.model_space.as_str(), false),
        ("*Paper_Space", records.paper_space.as_str(), true),
    ] {
        let handle = dxf.handle();
        dxf.pair(0, "BLOCK");
        dxf.pair(5, handle);
        dxf.pair(330, owner);
        dxf.pair(100, "AcDbEntity");
        if paper {
            dxf.pair(67, 1);
        }
        dxf.pair(8, "0");
        dxf.pair(100, "AcDbBlockBegin");
        dxf.pair(2, name);
        dxf.pair(70, 0);
        dxf.point(10, [0.0, 0.0], true);
        dxf.pair(3, name);
        dxf.pair(1, "");

        let handle = dxf.handle();
        dxf.pair(0, "ENDBLK");
        dxf.pair(5, handle);
        dxf.pair(330, owner);
        dxf.pair(100, "AcDbEntity");
        if paper {
            dxf.pair(67, 1);
        }
        dxf.pair(8, "0");
        dxf.pair(100, "AcDbBlockEnd");
    }
    dxf.end_section();
}

/// Root dictionary with the empty group dictionary
fn write_objects(dxf: &mut DxfWriter) {
    let root = dxf.handle();
    let groups = dxf.handle();
    dxf.begin_section("OBJECTS");
    dxf.pair(0, "DICTIONARY");
    dxf.pair(5, &root);
    dxf.pair(330, 0);
    dxf.pair(100, "AcDbDictionary");
    dxf.pair(281, 1);
    dxf.pair(3, "ACAD_GROUP");
    dxf.pair(350, &groups);
    dxf.pair(0, "DICTIONARY");
    dxf.pair(5, &groups);
    dxf.pair(330, &root);
    dxf.pair(100, "AcDbDictionary");
    dxf.pair(281, 1);
    dxf.end_section();
}

fn finite(point: [f64; 2]) -> bool {
    point[0].is_finite() && point[1].is_finite()
}

fn write_line(
    dxf: &mut DxfWriter,
    owner: &str,
    layer: &str,
    transform: &CadTransform,
    line: &Segment,
) -> bool {
    if !finite(line.start) || !finite(line.end) || line.is_degenerate() {
        return false;
    }
    dxf.entity("LINE", owner, layer, "AcDbLine");
    dxf.point(10, transform.apply(line.start), true);
    dxf.point(11, transform.apply(line.end), true);
    true
}

fn write_circle(
    dxf: &mut DxfWriter,
    owner: &str,
    layer: &str,
    transform: &CadTransform,
    circle: &Circle,
) -> bool {
    if !finite(circle.center) || !(circle.radius.is_finite() && circle.radius > 0.0) {
        return false;
    }
    dxf.entity("CIRCLE", owner, layer, "AcDbCircle");
    dxf.point(10, transform.apply(circle.center), true);
    dxf.real(40, transform.length(circle.radius));
    true
}

fn write_polyline(
    dxf: &mut DxfWriter,
    owner: &str,
    layer: &str,
    transform: &CadTransform,
    points: &[[f64; 2]],
    closed: bool,
) -> bool {
    if points.len() < 2 || !points.iter().all(|&p| finite(p)) {
        return false;
    }
    dxf.entity("LWPOLYLINE", owner, layer, "AcDbPolyline");
    dxf.pair(90, points.len());
    dxf.pair(70, u8::from(closed));
    for &p in points {
        dxf.point(10, transform.apply(p), false);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ellipse, Polyline};
    use approx::assert_relative_eq;

    fn sample_result() -> DetectionResult {
        DetectionResult {
            lines: vec![Segment::new(10.0, 20.0, 110.0, 20.0)],
            circles: vec![Circle {
                center: [50.0, 50.0],
                radius: 5.0,
            }],
            arcs: vec![
                ArcShape::Ellipse(Ellipse {
                    center: [200.0, 200.0],
                    rx: 30.0,
                    ry: 20.0,
                    angle_deg: 0.0,
                }),
                ArcShape::Polyline(Polyline {
                    points: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
                    closed: false,
                }),
            ],
            ..DetectionResult::new(400, 500)
        }
    }

    /// (code, value) pairs of a DXF document
    fn pairs(dxf: &str) -> Vec<(String, String)> {
        let lines: Vec<&str> = dxf.lines().collect();
        lines
            .chunks(2)
            .map(|c| (c[0].trim().to_string(), c.get(1).unwrap_or(&"").trim().to_string()))
            .collect()
    }

    #[test]
    fn test_y_flip_and_scale() {
        let t = CadTransform::new(500, 2.0);
        let p = t.apply([10.0, 20.0]);
        assert_relative_eq!(p[0], 20.0);
        assert_relative_eq!(p[1], 960.0);
        assert_relative_eq!(t.length(5.0), 10.0);
    }

    #[test]
    fn test_invalid_scale_falls_back_to_one() {
        assert_relative_eq!(CadTransform::new(100, 0.0).scale(), 1.0);
        assert_relative_eq!(CadTransform::new(100, f64::INFINITY).scale(), 1.0);
    }

    /// Group pairs of every object of `kind`, up to the next `0` group
    fn objects(pairs: &[(String, String)], kind: &str) -> Vec<Vec<(String, String)>> {
        pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.0 == "0" && p.1 == kind)
            .map(|(i, _)| {
                pairs[i + 1..]
                    .iter()
                    .take_while(|p| p.0 != "0")
                    .cloned()
                    .collect()
            })
            .collect()
    }

    fn group<'a>(object: &'a [(String, String)], code: &str) -> Option<&'a str> {
        object.iter().find(|p| p.0 == code).map(|p| p.1.as_str())
    }

    #[test]
    fn test_line_entity_coordinates() {
        let dxf = DxfExporter::new(ExportConfig::default().with_scale(2.0))
            .export(&sample_result())
            .unwrap();
        assert!(dxf.contains(
            "100\nAcDbEntity\n8\nTRACED\n100\nAcDbLine\n10\n20.000000\n20\n960.000000\n30\n0.000000\n11\n220.000000\n21\n960.000000\n31\n0.000000\n"
        ));
        assert!(dxf.contains(
            "100\nAcDbEntity\n8\nTRACED\n100\nAcDbCircle\n10\n100.000000\n20\n900.000000\n30\n0.000000\n40\n10.000000\n"
        ));
    }

    #[test]
    fn test_sections_in_order() {
        let dxf = DxfExporter::default().export(&sample_result()).unwrap();
        let sections: Vec<String> = pairs(&dxf)
            .windows(2)
            .filter(|w| w[0] == ("0".to_string(), "SECTION".to_string()))
            .map(|w| w[1].1.clone())
            .collect();
        assert_eq!(
            sections,
            vec!["HEADER", "CLASSES", "TABLES", "BLOCKS", "ENTITIES", "OBJECTS"]
        );
        assert!(dxf.ends_with("0\nEOF\n"));
        assert!(dxf.contains("9\n$ACADVER\n1\nAC1015\n"));
    }

    #[test]
    fn test_r2000_object_model() {
        let dxf = DxfExporter::default().export(&sample_result()).unwrap();
        let pairs = pairs(&dxf);

        let table_objects = objects(&pairs, "TABLE");
        let tables: Vec<&str> = table_objects
            .iter()
            .filter_map(|t| group(t, "2"))
            .collect();
        assert_eq!(
            tables,
            vec!["VPORT", "LTYPE", "LAYER", "STYLE", "VIEW", "UCS", "APPID", "DIMSTYLE", "BLOCK_RECORD"]
        );

        // Every linetype a layer names is defined
        let ltype_objects = objects(&pairs, "LTYPE");
        let ltypes: Vec<&str> = ltype_objects
            .iter()
            .filter_map(|l| group(l, "2"))
            .collect();
        let layers = objects(&pairs, "LAYER");
        let layer_names: Vec<&str> = layers.iter().filter_map(|l| group(l, "2")).collect();
        assert_eq!(layer_names, vec!["0", "TRACED"]);
        for layer in &layers {
            assert!(ltypes.contains(&group(layer, "6").unwrap()));
        }

        let model_space = objects(&pairs, "BLOCK_RECORD")
            .into_iter()
            .find(|r| group(r, "2") == Some("*Model_Space"))
            .expect("Should define the model space record");
        let model_space = group(&model_space, "5").unwrap().to_string();

        let mut entity_count = 0;
        for kind in ["LINE", "CIRCLE", "LWPOLYLINE"] {
            for entity in objects(&pairs, kind) {
                entity_count += 1;
                assert!(group(&entity, "5").is_some(), "{kind} without handle");
                assert_eq!(group(&entity, "330"), Some(model_space.as_str()));
                let markers: Vec<&str> = entity
                    .iter()
                    .filter(|p| p.0 == "100")
                    .map(|p| p.1.as_str())
                    .collect();
                let subclass = match kind {
                    "LINE" => "AcDbLine",
                    "CIRCLE" => "AcDbCircle",
                    _ => "AcDbPolyline",
                };
                assert_eq!(markers, vec!["AcDbEntity", subclass]);
            }
        }
        assert_eq!(entity_count, 4);

        let root = objects(&pairs, "DICTIONARY");
        assert_eq!(root.len(), 2);
        assert_eq!(group(&root[0], "3"), Some("ACAD_GROUP"));
        assert_eq!(group(&root[0], "350"), group(&root[1], "5"));
    }

    #[test]
    fn test_handles_are_unique_and_below_seed() {
        let dxf = DxfExporter::default().export(&sample_result()).unwrap();
        let pairs = pairs(&dxf);

        let seed_at = pairs
            .iter()
            .position(|p| p.0 == "9" && p.1 == "$HANDSEED")
            .expect("Should write $HANDSEED");
        let seed = u32::from_str_radix(&pairs[seed_at + 1].1, 16).unwrap();

        let mut handles: Vec<u32> = pairs
            .iter()
            .skip(seed_at + 2)
            .filter(|p| p.0 == "5" || p.0 == "105")
            .map(|p| u32::from_str_radix(&p.1, 16).unwrap())
            .collect();
        let total = handles.len();
        handles.sort_unstable();
        handles.dedup();
        assert_eq!(handles.len(), total);
        assert!(handles.iter().all(|&h| h > 0 && h < seed));
    }

    #[test]
    fn test_layer_zero_is_not_declared_twice() {
        let config = ExportConfig {
            layer: "0".to_string(),
            ..ExportConfig::default()
        };
        let dxf = DxfExporter::new(config).export(&sample_result()).unwrap();
        let pairs = pairs(&dxf);
        assert_eq!(objects(&pairs, "LAYER").len(), 1);
    }

    #[test]
    fn test_polyline_entities() {
        let dxf = DxfExporter::default().export(&sample_result()).unwrap();
        let counts: Vec<(String, String)> = objects(&pairs(&dxf), "LWPOLYLINE")
            .iter()
            .map(|p| (group(p, "90").unwrap().to_string(), group(p, "70").unwrap().to_string()))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("60".to_string(), "1".to_string()),
                ("3".to_string(), "0".to_string())
            ]
        );
    }

    #[test]
    fn test_rotated_ellipse_is_rotated_before_flip() {
        let result = DetectionResult {
            arcs: vec![ArcShape::Ellipse(Ellipse {
                center: [100.0, 100.0],
                rx: 20.0,
                ry: 10.0,
                angle_deg: 30.0,
            })],
            ..DetectionResult::new(400, 500)
        };
        let config = ExportConfig {
            scale: 2.0,
            ellipse_segments: 4,
            ..ExportConfig::default()
        };
        let dxf = DxfExporter::new(config).export(&result).unwrap();

        let polylines = objects(&pairs(&dxf), "LWPOLYLINE");
        assert_eq!(polylines.len(), 1);
        let vertices: Vec<(&str, &str)> = polylines[0]
            .windows(2)
            .filter(|w| w[0].0 == "10" && w[1].0 == "20")
            .map(|w| (w[0].1.as_str(), w[1].1.as_str()))
            .collect();
        assert_eq!(
            vertices,
            vec![
                ("234.641016", "780.000000"),
                ("190.000000", "782.679492"),
                ("165.358984", "820.000000"),
                ("210.000000", "817.320508"),
            ]
        );
    }

    #[test]
    fn test_non_finite_primitives_are_skipped() {
        let mut result = sample_result();
        result.lines.push(Segment::new(f64::NAN, 0.0, 1.0, 1.0));
        let dxf = DxfExporter::default().export(&result).unwrap();
        assert_eq!(dxf.matches("0\nLINE\n").count(), 1);
        assert!(!dxf.contains("NaN"));
    }

    #[test]
    fn test_empty_result_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.dxf");
        let err = DxfExporter::default()
            .save(&DetectionResult::new(10, 10), &path)
            .unwrap_err();
        assert!(matches!(err, TraceError::NothingToExport));
        assert!(!path.exists());
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.dxf");
        let exporter = DxfExporter::default();
        exporter.save(&sample_result(), &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, exporter.export(&sample_result()).unwrap());
    }
}
