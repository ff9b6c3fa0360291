pub mod browser;
pub mod configuration;
pub mod nebula;
pub mod network;
pub mod snapshot;
pub mod telemetry;

// Re-exports for convenience
pub use browser::SystemBrowser;
pub use nebula::NebulaClient;
pub use snapshot::FileSnapshotStore;
