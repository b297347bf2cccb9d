//! Integration tests for sigflow-config.

use std::fs;

use sigflow_config::{Config, ConfigError, Experiment, ReadoutMode};
use sigflow_core::DataEntry;
use sigflow_exec::{Hooks, JitGraphExecutor};
use sigflow_hw::ConnectionOnExecutor;
use tempfile::TempDir;

const EXPERIMENT: &str = r#"
batch_size = 2

[[instances]]
connection = 0
runtime_us = 40
loopback = true
spikes = [{ time_us = 5.0, label = 7 }, { time_us = 12.0, label = 8, batch = 1 }]
cadc = { columns = [0, 1, 2], mode = "hagen", shift = 1 }

[[instances]]
connection = 1
runtime_us = 40
madc = { column = 3, sample_period = 50 }
after = 0
"#;

#[test]
fn config_round_trips_through_a_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sigflow.toml");

    let mut config = Config::default();
    config.simulator.connections = 4;
    config.executor.worker_threads = 2;
    config.logging.filter = "sigflow_exec=debug".into();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn saving_creates_missing_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("experiment.toml");

    let experiment = Experiment::from_toml(EXPERIMENT).unwrap();
    experiment.save(&path).unwrap();
    assert!(path.exists());

    let loaded = Experiment::load(&path).unwrap();
    assert_eq!(loaded, experiment);
    assert_eq!(loaded.instances[0].cadc.as_ref().unwrap().mode, ReadoutMode::Hagen);
}

#[test]
fn missing_and_malformed_files_are_reported() {
    let dir = TempDir::new().unwrap();
    let missing = Config::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(missing, ConfigError::ReadFile { .. }));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[simulator\nconnections = 1").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::TomlParse(_))));

    fs::write(&path, "[simulator]\nconnections = 0\n").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Validation(_))));
}

#[test]
fn experiments_run_on_configured_simulators() {
    let config = Config::from_toml("[simulator]\nconnections = 2\n").unwrap();
    let (connections, handles) = config.connect();
    assert_eq!(handles.len(), 2);
    let executor = JitGraphExecutor::new(connections).with_workers(2);

    let built = Experiment::from_toml(EXPERIMENT).unwrap().build().unwrap();
    assert!(executor.is_executable_on(&built.graph));
    let output = executor
        .run_graph(&built.graph, &built.configs, &built.input, &Hooks::new())
        .unwrap();
    let data = &output.snippets[0].data;

    let first = built.instances[0];
    let DataEntry::SpikesFromChip(spikes) = &data[&first.spikes.unwrap()] else {
        panic!("loopback spikes expected");
    };
    assert_eq!(spikes[0].len(), 1);
    assert_eq!(spikes[1].len(), 2);

    let DataEntry::Int8(cadc) = &data[&first.cadc.unwrap()] else {
        panic!("CADC samples expected");
    };
    assert_eq!(cadc.len(), 2);
    assert_eq!(cadc[0][0].data.len(), 3);

    let second = built.instances[1];
    let DataEntry::UInt5(rectified) = &data[&second.rectified.unwrap()] else {
        panic!("rectified values expected");
    };
    assert_eq!(rectified[0][0].data.len(), 3);
    assert!(rectified.iter().flatten().flat_map(|t| &t.data).all(|&v| v < 32));
    assert!(matches!(data[&second.madc.unwrap()], DataEntry::MadcSamples(_)));

    for handle in &handles {
        assert!(!handle.runs().is_empty());
    }
    assert!(executor.contained_connections().contains(&ConnectionOnExecutor(1)));
}
