use std::fs;
use std::io::Write;

use cachesim_cc::*;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn loads_config_from_toml() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"
protocol = "dragon"
cores = 2

[cache]
block_offset = 4
set_bit = 2
cache_size_bit = 8

[timing]
mem_lat = 50
"#
    )
    .unwrap();
    let cfg = SystemConfig::load(f.path()).unwrap();
    assert_eq!(cfg.protocol, ProtocolKind::Dragon);
    assert_eq!(cfg.cores, 2);
    assert_eq!(cfg.cache.spec().assoc(), 4);
    assert_eq!(cfg.timing.mem_lat, 50);
    assert_eq!(cfg.timing.hit_lat, 1);
    let sys = System::new(cfg).unwrap();
    assert_eq!(sys.caches().len(), 2);
    assert_eq!(sys.caches()[1].protocol(), ProtocolKind::Dragon);
}

#[test]
fn config_errors_are_reported() {
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "protocol = \"moesi\"").unwrap();
    assert!(matches!(SystemConfig::load(f.path()), Err(ConfigError::Parse(_))));

    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(SystemConfig::load(&missing), Err(ConfigError::Io(_))));

    let cfg = SystemConfig { cores: 0, ..SystemConfig::default() };
    assert_eq!(System::new(cfg).err(), Some(ConfigError::NoCores));
}

#[test]
fn runs_trace_files_end_to_end() {
    let dir = tempdir().unwrap();
    // core 0 produces, core 1 waits and consumes
    fs::write(dir.path().join("pc_0.data"), "1 0x8000 2a\n1 0x8020\n0 0x8000\n").unwrap();
    fs::write(dir.path().join("pc_1.data"), "2 0x20\n0 0x8000\n0 0x8020\n").unwrap();
    fs::write(dir.path().join("other_0.data"), "0 0x0\n").unwrap();

    let traces = utils::read_testfiles(dir.path(), "pc").unwrap();
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0][1], Instr::Write(Addr(0x8020), 1));

    let cfg = SystemConfig { protocol: ProtocolKind::Mesi, cores: 2, ..SystemConfig::default() };
    let sys = System::new(cfg).unwrap();
    let report = sys.run(traces).unwrap();
    assert_eq!(report.cores[0].processor.store_count, 2);
    assert_eq!(report.cores[1].processor.load_count, 2);
    assert_eq!(report.cores[1].processor.other_count, 1);
    assert_eq!(report.cores[0].loaded, vec![(Addr(0x8000), 0x2a)]);
    assert!(report.total_cycles >= 0x20);

    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["protocol"], "mesi");
    assert_eq!(json["cores"][0]["processor"]["store_count"], 2);
    assert!(report.to_string().contains("protocol: MESI"));
}

#[test]
fn bad_trace_line_is_located() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t_0.data");
    fs::write(&path, "0 0x10\n0 zz\n").unwrap();
    let err = utils::read_trace(&path, 1).unwrap_err();
    assert!(matches!(err, CoherenceError::Trace { line: 2, .. }));
}

#[test]
fn default_store_values_cover_255_cores() {
    let dir = tempdir().unwrap();
    for i in 0..256 {
        fs::write(dir.path().join(format!("many_{i:03}.data")), "1 0x0\n").unwrap();
    }
    let err = utils::read_testfiles(dir.path(), "many").unwrap_err();
    assert!(matches!(err, CoherenceError::TooManyTraces(256)));

    fs::remove_file(dir.path().join("many_255.data")).unwrap();
    let traces = utils::read_testfiles(dir.path(), "many").unwrap();
    assert_eq!(traces.len(), 255);
    assert_eq!(traces[0][0], Instr::Write(Addr(0x0), 1));
    assert_eq!(traces[254][0], Instr::Write(Addr(0x0), 255));
}
