mod common;

use std::io::Write;

use common::{SR, melody_reference};
use syncfp::{ConfigLoadError, Pipeline, PipelineError, SyncFpConfig, demo_utils};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
version: "1.0"
name: "integration"
fingerprint:
  fft_size: 4096
  hop_size: 2048
  build_reverse_index: true
  resources:
    max_workers: 2
    direct_peak_threshold: 50
    target_peaks_per_chunk: 60
    min_peaks_per_chunk: 30
index:
  occurrence_ceiling: 40
matcher:
  min_confidence: 0.55
  min_cluster_matches: 4
"#;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn pipeline_runs_from_yaml_file() {
    let file = write_config(CONFIG);
    let p = Pipeline::from_file(file.path()).unwrap();

    let cfg = p.config();
    assert_eq!(cfg.name.as_deref(), Some("integration"));
    assert_eq!(cfg.fingerprint.resources.max_workers, 2);
    assert_eq!(cfg.fingerprint.peak_neighborhood_size, 10);
    assert_eq!(cfg.index.occurrence_ceiling, 40);
    assert_eq!(cfg.matcher.min_cluster_matches, 4);

    let reference = melody_reference(31);
    let built = p.build_reference(&reference, SR).unwrap();
    assert!(built.fingerprint.is_none());
    assert!(built.index.occurrence_ceiling() <= 40);

    let live = demo_utils::excerpt(&reference, SR, 15.0, 21.0);
    let result = p.match_excerpt(&built.index, &live, SR).unwrap();
    assert!(result.is_matched, "{result:?}");
    assert!((result.matched_offset_secs - 15).abs() <= 1, "{result:?}");
}

#[test]
fn invalid_resources_in_yaml_are_rejected() {
    let yaml = r#"
version: "1.0"
fingerprint:
  resources:
    max_workers: 0
"#;
    let err = SyncFpConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("max_workers"), "{err}");
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let file = write_config("version: [\n");
    let err = Pipeline::from_file(file.path()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Config(ConfigLoadError::YamlParse(_))
    ));
}

#[test]
fn unknown_version_is_rejected() {
    let err = SyncFpConfig::from_yaml("version: \"0.9\"\n").unwrap_err();
    assert!(matches!(err, ConfigLoadError::UnsupportedVersion(_)));
}
