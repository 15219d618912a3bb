pub mod item;
pub mod job;
pub mod loaders;
pub mod outputs;
pub mod region;
pub mod result;
pub mod taxonomy;

pub use item::{ClassificationTag, DocumentPair, Item, ItemCollection, ItemWithLocations};
pub use job::ExtractionJob;
pub use loaders::{load_all_job_files, load_job_file};
pub use region::{PageGeometry, PixelRect, Rect, Region};
pub use result::{
    ClassificationLabel, ContentType, ItemResult, ItemStatus, PipelineResult, PipelineStatus,
    RegionResult, Stage, TerminationReason,
};
pub use taxonomy::{ClassificationContext, Taxonomy, TaxonomyEntry};
