//! Unit tests for profiling flags and outputs.

use super::helpers::Workspace;
use super::*;
use geoport_core::test_support::MemorySink;
use rstest::rstest;
use std::{fs, time::Duration};

#[rstest]
#[case("mem", "mem", DEFAULT_MEMPROFILE_INTERVAL)]
#[case("mem:30s", "mem", Duration::from_secs(30))]
#[case("mem:1m 30s", "mem", Duration::from_secs(90))]
#[case("/var/tmp/mem:500ms", "/var/tmp/mem", Duration::from_millis(500))]
#[case("mem:5m", "mem", Duration::from_secs(300))]
#[case("mem:2h", "mem", Duration::from_secs(7200))]
fn memprofile_values_are_parsed(
    #[case] raw: &str,
    #[case] dir: &str,
    #[case] interval: Duration,
) {
    let parsed = MemProfile::parse(raw).expect("valid memprofile");
    assert_eq!(parsed.dir, Utf8PathBuf::from(dir));
    assert_eq!(parsed.interval, interval);
}

#[rstest]
#[case("mem:")]
#[case("mem:0s")]
#[case("mem:fast")]
#[case("mem:10 fortnights")]
#[case("mem:45")]
#[case(":30s")]
#[case("")]
fn malformed_memprofile_values_are_rejected(#[case] raw: &str) {
    assert!(matches!(
        MemProfile::parse(raw),
        Err(CliError::InvalidMemProfile { .. })
    ));
}

#[rstest]
fn cpuprofile_reports_each_phase() {
    let workspace = Workspace::new();
    let report = workspace.root().join("profile/timings.tsv");
    let mut config = workspace.config(&["--read", "--write"]);
    config.profile.cpu = Some(report.clone());

    run_import(&config, &helpers::MemorySinkBuilder::new(&MemorySink::new()))
        .expect("import succeeds");

    let contents = fs::read_to_string(&report).expect("read timing report");
    let phases: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.split('\t').next())
        .collect();
    assert_eq!(phases, ["phase", "read", "write", "total"]);
}

#[rstest]
fn cpuprofile_is_written_when_a_phase_fails() {
    let workspace = Workspace::new();
    let report = workspace.root().join("timings.tsv");
    // No cache exists yet, so the write phase fails before it starts.
    let mut config = workspace.config(&["--write"]);
    config.profile.cpu = Some(report.clone());

    let result = run_import(&config, &helpers::MemorySinkBuilder::new(&MemorySink::new()));
    assert!(matches!(result, Err(CliError::MissingCache { .. })));
    let contents = fs::read_to_string(&report).expect("read timing report");
    assert!(contents.starts_with("phase\tmillis\n"));
    assert!(contents.contains("total\t"));
}

#[rstest]
fn memprofile_samples_into_its_directory() {
    let workspace = Workspace::new();
    let dir = workspace.root().join("mem");
    let mut config = workspace.config(&["--read"]);
    config.profile.memory = Some(MemProfile {
        dir: dir.clone(),
        interval: Duration::from_secs(3600),
    });

    run_import(&config, &helpers::MemorySinkBuilder::new(&MemorySink::new()))
        .expect("import succeeds");

    let samples: Vec<_> = fs::read_dir(&dir)
        .expect("list samples")
        .map(|entry| entry.expect("sample entry").file_name())
        .collect();
    assert_eq!(samples.len(), 1, "expected the initial sample, found {samples:?}");
    let name = samples
        .first()
        .and_then(|name| name.to_str())
        .expect("utf-8 sample name");
    assert!(name.starts_with("memprofile-") && name.ends_with(".tsv"));
    let sample = fs::read_to_string(dir.join(name)).expect("read sample");
    let mut lines = sample.lines();
    assert_eq!(lines.next(), Some("resident_bytes\tvirtual_bytes"));
    let resident: u64 = lines
        .next()
        .and_then(|line| line.split('\t').next())
        .and_then(|value| value.parse().ok())
        .expect("resident bytes");
    assert!(resident > 0);
}
