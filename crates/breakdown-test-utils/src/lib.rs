//! Stub services and fixtures shared by the Breakdown crates' tests.

mod completion;
mod memory;

pub use completion::{
    CountingCompletion, EchoCompletion, FailingCompletion, FlakyCompletion, JitterCompletion,
    RendezvousCompletion, ScriptedCompletion,
};
pub use memory::InMemoryStores;

/// A numbered list as a decomposition reply would format it.
pub fn numbered_breakdown(items: &[&str]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write `contents` to a `breakdown.toml` inside a fresh temp dir.
pub fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("breakdown.toml");
    std::fs::write(&path, contents).expect("write config");
    (dir, path)
}
