pub mod artifact_writer;
pub mod classifier;
pub mod labelling_service;
pub mod lister;
pub mod llm_service;
pub mod markup_service;
pub mod page_annotator;
pub mod prompts;
pub mod region_refiner;
pub mod taxonomy_source;
pub mod usage_ledger;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact_writer::ArtifactWriter;
pub use classifier::{Classification, Classifier};
pub use labelling_service::LabellingService;
pub use lister::{ItemLister, LabelGrammar, ListingOutcome};
pub use llm_service::{LlmService, RetryPolicy};
pub use markup_service::{MarkupDraft, MarkupService};
pub use page_annotator::{AnnotationFailure, PageAnnotator};
pub use region_refiner::{RefinementOutcome, RegionRefiner};
pub use taxonomy_source::{TaxonomySource, TomlTaxonomySource};
pub use usage_ledger::{PricingTable, PricingTier, UsageLedger, UsageRecord, UsageSummary};
