//! Collaborator traits and the pipeline value that bundles them.

use bulkport_types::batch::ExtractedBatch;
use bulkport_types::error::StepError;
use bulkport_types::state::PipelineName;

use crate::context::Context;

/// Pulls one page of source records.
pub trait Extractor<R>: Send + Sync {
    /// Name recorded as the step class in logs and failure records.
    fn name(&self) -> &str;

    /// Extract the page that starts at `cursor` (`None` for the first page).
    ///
    /// Returning `Ok(None)` means there is nothing to import.
    ///
    /// # Errors
    ///
    /// Returns a [`StepError`]; network-classified errors may be retried.
    fn extract(
        &self,
        ctx: &Context,
        cursor: Option<&str>,
    ) -> Result<Option<ExtractedBatch<R>>, StepError>;
}

/// Maps one record. Returning `Ok(None)` drops the record.
pub trait Transformer<R>: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns a [`StepError`] when the record cannot be mapped.
    fn transform(&self, ctx: &Context, record: R) -> Result<Option<R>, StepError>;
}

/// Persists one transformed record into the target store.
pub trait Loader<R>: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns a [`StepError`]; partial writes are not rolled back.
    fn load(&self, ctx: &Context, record: R) -> Result<(), StepError>;
}

/// One extractor + transformer chain + loader unit for a resource type.
pub struct Pipeline<R> {
    pub(crate) name: PipelineName,
    pub(crate) extractor: Box<dyn Extractor<R>>,
    pub(crate) transformers: Vec<Box<dyn Transformer<R>>>,
    pub(crate) loader: Box<dyn Loader<R>>,
    pub(crate) abort_on_failure: bool,
}

impl<R> Pipeline<R> {
    #[must_use]
    pub fn new(
        name: impl Into<PipelineName>,
        extractor: Box<dyn Extractor<R>>,
        loader: Box<dyn Loader<R>>,
    ) -> Self {
        Self {
            name: name.into(),
            extractor,
            transformers: Vec::new(),
            loader,
            abort_on_failure: false,
        }
    }

    /// Append a transformer; transformers run in the order they were added.
    #[must_use]
    pub fn with_transformer(mut self, transformer: Box<dyn Transformer<R>>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// When set, a fatal step error also fails the owning entity.
    #[must_use]
    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    #[must_use]
    pub fn name(&self) -> &PipelineName {
        &self.name
    }

    #[must_use]
    pub fn aborts_on_failure(&self) -> bool {
        self.abort_on_failure
    }

    /// Step class names of the transformer chain, in order.
    #[must_use]
    pub fn transformer_names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }
}

impl<R> std::fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("extractor", &self.extractor.name())
            .field("transformers", &self.transformer_names())
            .field("loader", &self.loader.name())
            .field("abort_on_failure", &self.abort_on_failure)
            .finish()
    }
}
