pub mod artifacts;

pub use artifacts::{ArtifactCleanup, ArtifactStore, FsArtifactStore, TempStats};
