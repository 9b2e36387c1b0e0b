use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::{ExtractionError, ProcessErrorKind};
use super::extractor::{CredentialCheck, ExtractionRequest, Extractor, InvoiceData};
use crate::job::{AnalysisJob, Pipeline};
use crate::sanitize;

/// Outcome of one extraction attempt. Never carries unsanitized error text.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub extracted_data: Option<InvoiceData>,
    pub raw_response: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ProcessErrorKind>,
    pub requires_api_key: bool,
}

impl ExecutionResult {
    fn success(data: InvoiceData, raw_response: String) -> Self {
        Self {
            success: true,
            extracted_data: Some(data),
            raw_response: Some(raw_response),
            ..Default::default()
        }
    }

    fn failure(err: &ExtractionError) -> Self {
        Self {
            success: false,
            error: Some(sanitize::user_safe_error(&err.to_string())),
            error_kind: Some(err.kind()),
            requires_api_key: err.requires_api_key(),
            ..Default::default()
        }
    }
}

/// Runs the selected extractor with a deadline. Knows nothing about jobs'
/// lifecycle; callers own the reserve and commit around it.
pub struct ExtractionExecutor {
    local: Arc<dyn Extractor>,
    cloud: Arc<dyn Extractor>,
    credentials: Arc<dyn CredentialCheck>,
    timeout: Duration,
}

impl ExtractionExecutor {
    pub fn new(
        local: Arc<dyn Extractor>,
        cloud: Arc<dyn Extractor>,
        credentials: Arc<dyn CredentialCheck>,
        timeout: Duration,
    ) -> Self {
        Self {
            local,
            cloud,
            credentials,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(
        &self,
        job: &AnalysisJob,
        pipeline: Pipeline,
        page_paths: Vec<PathBuf>,
    ) -> ExecutionResult {
        match self.run(job, pipeline, page_paths).await {
            Ok((data, raw)) => {
                info!(job_id = %job.id, %pipeline, "Extraction succeeded");
                ExecutionResult::success(data, raw)
            }
            Err(e) => {
                // Full detail stays in the log; callers get the sanitized form.
                warn!(
                    job_id = %job.id,
                    %pipeline,
                    error = %sanitize::redact_secrets(&e.to_string()),
                    "Extraction failed"
                );
                ExecutionResult::failure(&e)
            }
        }
    }

    async fn run(
        &self,
        job: &AnalysisJob,
        pipeline: Pipeline,
        page_paths: Vec<PathBuf>,
    ) -> Result<(InvoiceData, String), ExtractionError> {
        let extractor = match pipeline {
            Pipeline::Local => &self.local,
            Pipeline::Cloud => {
                if !self.credentials.status().valid {
                    return Err(ExtractionError::MissingCredential);
                }
                &self.cloud
            }
        };

        let request = ExtractionRequest {
            job_id: job.id.clone(),
            original_filename: job.original_filename.clone(),
            page_paths,
            ocr: job.ocr_text_cache.clone(),
        };

        debug!(
            job_id = %job.id,
            pages = request.page_paths.len(),
            timeout_secs = self.timeout.as_secs(),
            "Invoking extractor"
        );

        let raw = tokio::time::timeout(self.timeout, extractor.extract(&request))
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout.as_secs()))??;

        let data = InvoiceData::from_value(raw.structured)?;
        Ok((data, raw.raw_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::fixtures::job;
    use crate::job::JobStatus;
    use crate::pipeline::extractor::{CredentialStatus, RawExtraction};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Ok(serde_json::Value),
        Fail(String),
        Reject,
        Hang,
    }

    struct FakeExtractor {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeExtractor {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(&self, _: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Ok(v) => Ok(RawExtraction {
                    structured: v.clone(),
                    raw_response: v.to_string(),
                }),
                Behavior::Fail(msg) => Err(ExtractionError::Failed(msg.clone())),
                Behavior::Reject => Err(ExtractionError::CredentialRejected("401".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    unreachable!()
                }
            }
        }
    }

    struct Key(bool);

    impl CredentialCheck for Key {
        fn status(&self) -> CredentialStatus {
            CredentialStatus {
                configured: self.0,
                valid: self.0,
            }
        }
    }

    fn executor(
        local: Arc<FakeExtractor>,
        cloud: Arc<FakeExtractor>,
        key_valid: bool,
        timeout: Duration,
    ) -> ExtractionExecutor {
        ExtractionExecutor::new(local, cloud, Arc::new(Key(key_valid)), timeout)
    }

    fn a_job() -> AnalysisJob {
        job("job-1", JobStatus::Processing, chrono::Duration::hours(1))
    }

    #[tokio::test]
    async fn test_local_success() {
        let local = FakeExtractor::new(Behavior::Ok(json!({ "provider": "ACME" })));
        let cloud = FakeExtractor::new(Behavior::Fail("unused".into()));
        let exec = executor(local.clone(), cloud.clone(), false, Duration::from_secs(5));

        let result = exec.execute(&a_job(), Pipeline::Local, vec![]).await;
        assert!(result.success);
        assert_eq!(
            result.extracted_data.unwrap().provider.as_deref(),
            Some("ACME")
        );
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cloud_without_key_never_calls_extractor() {
        let local = FakeExtractor::new(Behavior::Fail("unused".into()));
        let cloud = FakeExtractor::new(Behavior::Ok(json!({})));
        let exec = executor(local, cloud.clone(), false, Duration::from_secs(5));

        let result = exec.execute(&a_job(), Pipeline::Cloud, vec![]).await;
        assert!(!result.success);
        assert!(result.requires_api_key);
        assert_eq!(result.error_kind, Some(ProcessErrorKind::MissingCredential));
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_key_requires_api_key() {
        let local = FakeExtractor::new(Behavior::Fail("unused".into()));
        let cloud = FakeExtractor::new(Behavior::Reject);
        let exec = executor(local, cloud, true, Duration::from_secs(5));

        let result = exec.execute(&a_job(), Pipeline::Cloud, vec![]).await;
        assert!(result.requires_api_key);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_error_is_sanitized() {
        let local = FakeExtractor::new(Behavior::Fail(
            "bad key sk-ant-api03-SECRETSECRET\nstack trace follows".into(),
        ));
        let cloud = FakeExtractor::new(Behavior::Fail("unused".into()));
        let exec = executor(local, cloud, false, Duration::from_secs(5));

        let result = exec.execute(&a_job(), Pipeline::Local, vec![]).await;
        let error = result.error.unwrap();
        assert!(!error.contains("SECRETSECRET"));
        assert!(!error.contains("stack trace"));
        assert_eq!(result.error_kind, Some(ProcessErrorKind::ExtractionFailure));
    }

    #[tokio::test]
    async fn test_malformed_output_is_extraction_failure() {
        let local = FakeExtractor::new(Behavior::Ok(json!("just a string")));
        let cloud = FakeExtractor::new(Behavior::Fail("unused".into()));
        let exec = executor(local, cloud, false, Duration::from_secs(5));

        let result = exec.execute(&a_job(), Pipeline::Local, vec![]).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ProcessErrorKind::ExtractionFailure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let local = FakeExtractor::new(Behavior::Hang);
        let cloud = FakeExtractor::new(Behavior::Fail("unused".into()));
        let exec = executor(local, cloud, false, Duration::from_secs(2));

        let result = exec.execute(&a_job(), Pipeline::Local, vec![]).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ProcessErrorKind::Timeout));
        assert!(result.error.unwrap().contains("2 seconds"));
    }
}
