use super::*;

#[test]
fn test_xe_defaults() {
    let config = TargetConfig::xe();
    assert_eq!(config.name, "xe");
    assert_eq!(config.warp_size, 16);
    assert_eq!(config.num_warps, 4);
    assert_eq!(config.num_ctas, 1);
    assert_eq!(config.max_block_row_bytes, 64);
    assert_eq!(config.max_block_bytes, 2048);
    assert_eq!(config.max_vector_bits, 128);
    assert!(config.allow_emulated_atomics);
    assert_eq!(config.threads_per_cta(), 64);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_partial_toml_keeps_defaults() {
    let config = TargetConfig::parse_toml(
        r#"
[target]
name = "xe-hpc"
num_warps = 8

[atomics]
allow_emulation = false
"#,
    )
    .unwrap();
    assert_eq!(config.name, "xe-hpc");
    assert_eq!(config.num_warps, 8);
    assert_eq!(config.warp_size, 16);
    assert_eq!(config.max_block_bytes, 2048);
    assert!(!config.allow_emulated_atomics);
}

#[test]
fn test_parse_empty_is_xe() {
    assert_eq!(TargetConfig::parse_toml("").unwrap(), TargetConfig::xe());
}

#[test]
fn test_parse_rejects_unknown_key() {
    let err = TargetConfig::parse_toml("[target]\nlanes = 32\n").unwrap_err();
    assert!(err.is_error());
    assert!(err.message.contains("invalid target config"));
}

#[test]
fn test_parse_rejects_bad_warp_count() {
    let err = TargetConfig::parse_toml("[target]\nnum_warps = 6\n").unwrap_err();
    assert!(err.message.contains("num_warps"));
}

#[test]
fn test_parse_rejects_row_limit_above_block_limit() {
    let err = TargetConfig::parse_toml("[limits]\nmax_block_row_bytes = 4096\n").unwrap_err();
    assert!(err.message.contains("max_block_row_bytes"));
    assert!(err.help.is_some());
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xe.toml");
    std::fs::write(
        &path,
        r#"
[target]
name = "test_xe"
warp_size = 32
num_ctas = 2

[limits]
max_vector_bits = 64
"#,
    )
    .unwrap();

    let config = TargetConfig::load(&path).unwrap();
    assert_eq!(config.name, "test_xe");
    assert_eq!(config.warp_size, 32);
    assert_eq!(config.num_ctas, 2);
    assert_eq!(config.max_vector_bits, 64);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = TargetConfig::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(err.message.contains("cannot read target config"));
}

#[test]
fn test_load_error_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[target]\nwarp_size = 0\n").unwrap();
    let err = TargetConfig::load(&path).unwrap_err();
    assert!(err.message.contains("bad.toml"));
    assert!(err.message.contains("warp_size"));
}
