pub mod dxf;
pub mod json;
pub mod preview;

pub use dxf::{CadTransform, DxfExporter, ACAD_VERSION};
pub use preview::render_preview;
