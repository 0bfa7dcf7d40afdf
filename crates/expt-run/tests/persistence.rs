use std::fs;
use std::path::Path;

use chrono::{Local, TimeZone};
use expt_core::{data, ExptError, Value};
use expt_run::{
    backup_path, run_and_save, CallbackRegistry, Experiment, ExperimentConfig, ExportOptions,
    FileFormat, RunOptions, Snapshot, SNAPSHOT_SCHEMA,
};

const CONFIG: &str = r#"
filename: session.json
seed: 21
experimenter: ada
callbacks:
  run: answer
design:
  - name: block
    ordering: {name: ordering, number: 2}
  - name: trial
    ivs: {a: [1, 2, 3]}
    ordering: shuffle
"#;

fn registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register_run("answer", |session, _, context| {
        if context.get("block") == Some(&Value::Int(2)) && context.get("trial") == Some(&Value::Int(2)) {
            return Err(ExptError::quit("break requested"));
        }
        let options = session.options().unwrap_or("none").to_string();
        Ok(data([("answered", Value::from(true)), ("options", Value::from(options))]))
    });
    registry
}

fn configured() -> Experiment {
    let config = ExperimentConfig::from_yaml_str(CONFIG).expect("config");
    Experiment::from_config(config).expect("experiment")
}

fn backups(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with("-backup"))
        .collect();
    names.sort();
    names
}

#[test]
fn config_builds_a_seeded_experiment() {
    let config = ExperimentConfig::from_yaml_str(CONFIG).expect("config");
    assert_eq!(config.seed, Some(21));
    assert_eq!(config.callbacks.run.as_deref(), Some("answer"));
    assert_eq!(config.extra.get("experimenter"), Some(&Value::from("ada")));

    let first = configured();
    let second = configured();
    assert_eq!(first.root(), second.root(), "same seed realizes the same sections");
    assert_eq!(first.root().len(), 2);
    assert_eq!(first.root().child(1).expect("block").len(), 3);
    assert_eq!(first.persistent().get("experimenter"), Some(&Value::from("ada")));
    assert_eq!(first.filename().map(Path::to_path_buf), Some("session.json".into()));
}

#[test]
fn snapshot_round_trip_preserves_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["state.json", "state.yaml"] {
        let path = dir.path().join(name);
        let mut experiment = configured();
        experiment.bind(&registry()).expect("bind");
        experiment
            .run_section(&[0], &RunOptions::default())
            .expect("first block");
        experiment.save(&path).expect("save");

        let loaded = Experiment::load(&path, &registry()).expect("load");
        assert_eq!(loaded.root(), experiment.root());
        assert_eq!(loaded.persistent(), experiment.persistent());
        assert_eq!(loaded.callbacks(), experiment.callbacks());
        assert_eq!(loaded.seed(), 21);
        assert_eq!(loaded.filename(), Some(path.as_path()));
        assert!(loaded.is_bound());

        let snapshot = Snapshot::read(&path).expect("read");
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA);
        assert_eq!(snapshot.design_hash, experiment.design_hash().expect("hash"));
    }
    assert_eq!(FileFormat::from_path(Path::new("a.YML")), FileFormat::Yaml);
    assert_eq!(FileFormat::from_path(Path::new("a.json")), FileFormat::Json);
}

#[test]
fn loading_requires_registered_callbacks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    configured().save(&path).expect("save");

    let err = Experiment::load(&path, &CallbackRegistry::new()).expect_err("missing callback");
    assert_eq!(err.code(), "callback-missing");
    assert_eq!(
        err.info().and_then(|info| info.context.get("key")).map(String::as_str),
        Some("answer")
    );
}

#[test]
fn edited_design_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    configured().save(&path).expect("save");

    let mut raw: serde_json::Value =
        serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
    raw["design_hash"] = serde_json::Value::from("0000");
    fs::write(&path, serde_json::to_vec(&raw).expect("encode")).expect("write");
    let err = Snapshot::read(&path).expect_err("hash mismatch");
    assert_eq!(err.code(), "snapshot-design-hash");

    raw["schema_version"]["major"] = serde_json::Value::from(9);
    fs::write(&path, serde_json::to_vec(&raw).expect("encode")).expect("write");
    let err = Snapshot::read(&path).expect_err("schema");
    assert_eq!(err.code(), "snapshot-schema");
}

#[test]
fn backup_names_carry_the_timestamp() {
    let stamp = Local
        .with_ymd_and_hms(2024, 3, 9, 14, 5, 0)
        .single()
        .expect("timestamp");
    let path = backup_path(Path::new("data/session.json"), stamp);
    assert_eq!(path, Path::new("data/session.json.03-09-14-05-backup"));
}

#[test]
fn run_and_save_backs_up_on_quit_and_resumes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");
    configured().save(&path).expect("save");

    let err = run_and_save(
        &path,
        &registry(),
        |_| Ok(Vec::new()),
        false,
        &RunOptions::default(),
        Some("fast".to_string()),
    )
    .expect_err("quit");
    assert!(err.is_quit());
    assert_eq!(backups(dir.path()).len(), 1);

    let saved = Experiment::load(&path, &registry()).expect("load");
    let block = saved.root().child(2).expect("block 2");
    assert!(block.has_started() && !block.has_finished());
    let first = saved.root().at(&[1, 1]).expect("trial");
    assert_eq!(first.data().get("options"), Some(&Value::from("fast")));

    // Let block 2 trial 2 pass by answering through a second registry.
    let mut patient = CallbackRegistry::new();
    patient.register_run("answer", |_, _, _| Ok(data([("answered", true)])));
    let resumed = run_and_save(
        &path,
        &patient,
        |experiment| {
            experiment
                .root()
                .find_first_partially_run("_base")
                .ok_or_else(|| ExptError::quit("nothing to resume"))
        },
        true,
        &RunOptions::default(),
        None,
    )
    .expect("resume");
    assert!(resumed.root().has_finished());
    assert_eq!(backups(dir.path()).len(), 1);

    let reloaded = Experiment::load(&path, &patient).expect("reload");
    assert!(reloaded.root().has_finished());
    assert!(reloaded
        .root()
        .all_leaf_contexts()
        .iter()
        .all(|leaf| leaf.get("answered") == Some(&Value::from(true))));
}

#[test]
fn demo_runs_do_not_touch_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");
    configured().save(&path).expect("save");
    let before = fs::read(&path).expect("read");

    let demo = RunOptions {
        demo: true,
        ..RunOptions::default()
    };
    let experiment = run_and_save(&path, &registry(), |_| Ok(vec![0]), false, &demo, None)
        .expect("demo run");
    assert!(!experiment.root().child(1).expect("block").has_started());
    assert_eq!(fs::read(&path).expect("read"), before);
    assert!(backups(dir.path()).is_empty());
}

#[test]
fn export_options_shape_the_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut experiment = configured();
    experiment.bind(&registry()).expect("bind");
    experiment
        .run_section(&[0], &RunOptions::default())
        .expect("first block");

    let path = dir.path().join("results.tsv");
    let options = ExportOptions {
        skip_columns: vec!["options".to_string()],
        delimiter: b'\t',
        index_label: false,
        nan: "NA".to_string(),
    };
    let rows = experiment.export_csv(&path, &options).expect("export");
    assert_eq!(rows, 6);
    let body = fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = body.lines().collect();
    let header: Vec<&str> = lines[0].split('\t').map(|field| field.trim_matches('"')).collect();
    assert_eq!(header, vec!["", "", "a", "answered"]);
    let first_block: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(first_block[0], "1");
    assert_eq!(first_block[3], "true");
    let second_block: Vec<&str> = lines[4].split('\t').collect();
    assert_eq!(second_block[0], "2");
    assert_eq!(second_block[3], "NA");
}
