//! The CI runtime seam: PipelineAgent
//!
//! Annotations, artifacts and dynamic pipeline injection. Key/value
//! metadata lives behind its own trait, [`crate::store::MetadataStore`],
//! because the resolver needs it without needing the rest.

use crate::error::DeployError;
use crate::types::AnnotationStyle;
use std::future::Future;
use std::path::Path;

pub trait PipelineAgent: Send + Sync {
    /// Post (or replace) the build annotation for `context`.
    fn annotate(
        &self,
        body: &str,
        style: AnnotationStyle,
        context: &str,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Upload a file as a build artifact.
    fn upload_artifact(&self, path: &Path) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// Inject steps into the running pipeline. `document` is pipeline YAML.
    fn upload_pipeline(&self, document: &str)
        -> impl Future<Output = Result<(), DeployError>> + Send;
}
