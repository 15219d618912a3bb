pub mod page_marker;
pub mod renderer;

pub use page_marker::{LopdfPageMarker, PageMarker};
pub use renderer::{crop, CropImage, PageRenderer, PrerenderedPages, RasterPage};
