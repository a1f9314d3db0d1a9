use std::path::{Path, PathBuf};

use treemerge_core::{
    AuditLog, CompareMode, ContentDigest, ExceptionPolicy, FileEntry, MergeConfig, MergeDecision,
    MergeError, ProcessStats, RelativePath, ScanConfig,
};

#[test]
fn test_file_entry_from_metadata() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sub").join("a.txt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"hello").unwrap();

    let rel = RelativePath::between(dir.path(), &path).unwrap();
    let metadata = std::fs::metadata(&path).unwrap();
    let entry = FileEntry::from_metadata(&path, rel, &metadata);

    assert_eq!(entry.size, 5);
    assert!(entry.modified.is_some());
    assert!(entry.digest.is_none());
    assert_eq!(entry.relative_path.to_string(), Path::new("sub").join("a.txt").display().to_string());

    let entry = entry.with_digest(ContentDigest::new(vec![1, 2]));
    assert_eq!(entry.digest.unwrap().to_hex(), "0102");
}

#[test]
fn test_live_config_is_valid() {
    let config = MergeConfig::live();
    assert!(config.validate().is_ok());
    assert!(!config.is_dry_run());
    assert_eq!(config.compare, CompareMode::Content);
}

#[test]
fn test_config_from_toml_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("treemerge.toml");
    std::fs::write(
        &path,
        "perform_copy = true\nperform_delete = true\nsuppress_unknown_errors = true\n",
    )
    .unwrap();

    let config = MergeConfig::from_toml_file(&path).unwrap();
    assert!(config.perform_copy);
    assert!(config.perform_delete);
    assert!(!config.perform_cleanup);
    assert!(config.suppress_unknown_errors);
    assert_eq!(config.hash_threshold, 4096);

    let missing = MergeConfig::from_toml_file(&dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(MergeError::InvalidConfig { .. })));
}

#[test]
fn test_scan_config_serde_defaults() {
    let config: ScanConfig = serde_json::from_str(r#"{"roots": ["/data"]}"#).unwrap();
    assert_eq!(config.roots, vec![PathBuf::from("/data")]);
    assert!(config.include_hidden);
    assert_eq!(config.hash_threshold, 4096);
    assert!(config.log_missing_files);
}

#[test]
fn test_policy_from_config_drives_absorb() {
    let config = MergeConfig::builder()
        .suppress_unknown_errors(true)
        .build()
        .unwrap();
    let policy = ExceptionPolicy::from(&config);
    let failure = MergeError::DeleteFailed {
        path: PathBuf::from("/x"),
        source: std::io::Error::other("boom"),
    };

    let out = policy.absorb::<()>(Err(failure), &AuditLog::disabled());
    assert!(out.unwrap().is_none());
}

#[test]
fn test_stats_serialize() {
    let mut stats = ProcessStats::new();
    stats.record_processed(3);
    stats.record_decision(&MergeDecision::Copy, 3);
    stats.record_deleted(3);

    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["copied"]["count"], 1);
    assert_eq!(json["deleted"]["bytes"], 3);
}
