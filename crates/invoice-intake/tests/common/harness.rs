//! Test harness for isolated service execution.
//!
//! Each `TestHarness` owns a temp directory for artifacts, an in-memory
//! SQLite database for results and its own set of mock collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use invoice_intake::db::{Database, InvoiceStore};
use invoice_intake::job::MemoryJobStore;
use invoice_intake::service::{IntakeCollaborators, IntakeService, IntakeSettings};
use invoice_intake::storage::FsArtifactStore;

use super::mocks::{CountingPersister, MockAnalyzer, MockCredentials, MockExtractor};

pub struct HarnessOptions {
    pub analyzer: MockAnalyzer,
    pub local: MockExtractor,
    pub cloud: MockExtractor,
    pub cloud_key_valid: bool,
    pub ttl: chrono::Duration,
    pub extraction_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            analyzer: MockAnalyzer::clean(),
            local: MockExtractor::invoice(),
            cloud: MockExtractor::invoice(),
            cloud_key_valid: true,
            ttl: chrono::Duration::hours(1),
            extraction_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub service: IntakeService,
    pub store: Arc<MemoryJobStore>,
    pub artifacts: Arc<FsArtifactStore>,
    pub local: Arc<MockExtractor>,
    pub cloud: Arc<MockExtractor>,
    pub credentials: Arc<MockCredentials>,
    pub persister: Arc<CountingPersister>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");

        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(FsArtifactStore::new(temp_dir.path().join("temp")));
        let local = Arc::new(options.local);
        let cloud = Arc::new(options.cloud);
        let credentials = Arc::new(MockCredentials::new(options.cloud_key_valid));
        let persister = Arc::new(CountingPersister::new(InvoiceStore::new(db)));

        let settings = IntakeSettings {
            ttl: options.ttl,
            extraction_timeout: options.extraction_timeout,
            console_url: "https://console.example/keys".to_string(),
            ..IntakeSettings::default()
        };

        let service = IntakeService::new(
            IntakeCollaborators {
                analyzer: Arc::new(options.analyzer),
                local: local.clone(),
                cloud: cloud.clone(),
                credentials: credentials.clone(),
                persister: persister.clone(),
                store: store.clone(),
                artifacts: artifacts.clone(),
            },
            settings,
        );

        Self {
            temp_dir,
            service,
            store,
            artifacts,
            local,
            cloud,
            credentials,
            persister,
        }
    }

    /// Uploads a small fake PDF and returns its job id.
    pub async fn upload(&self) -> String {
        self.service
            .analyze(b"%PDF-1.4 fake".to_vec(), "facture.pdf")
            .await
            .expect("analysis should succeed")
            .job_id
    }
}
