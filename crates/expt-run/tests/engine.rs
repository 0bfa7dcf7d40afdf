use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use expt_core::{data, Data, ErrorInfo, ExptError, RngHandle, Value, BASE_LEVEL};
use expt_design::{Design, DesignTree, Iv, Level, Ordering, COUNTERBALANCE_IV};
use expt_run::{CallbackRegistry, Experiment, ExportOptions, LevelBinding, RunOptions, Section};

type Log = Arc<Mutex<Vec<String>>>;

fn context_label(context: &Data) -> String {
    let block = context.get("block").map(Value::to_string).unwrap_or_default();
    let trial = context.get("trial").map(Value::to_string).unwrap_or_default();
    format!("{block}.{trial}")
}

/// Registry whose callbacks append to a shared log.
///
/// `record` stores the trial label as `response`; it quits on the label in
/// `quit_at` and fails with a callback error on the label in `fail_at`.
fn logging_registry(log: &Log, quit_at: Option<&str>, fail_at: Option<&str>) -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    let run_log = Arc::clone(log);
    let quit_at = quit_at.map(str::to_string);
    let fail_at = fail_at.map(str::to_string);
    registry.register_run("record", move |_, persistent, context| {
        let label = context_label(context);
        run_log.lock().expect("log").push(format!("run {label}"));
        if quit_at.as_deref() == Some(label.as_str()) {
            return Err(ExptError::quit(format!("stopped at {label}")));
        }
        if fail_at.as_deref() == Some(label.as_str()) {
            return Err(ExptError::Callback(ErrorInfo::new("trial-failed", "device error")));
        }
        let count = persistent.get("count").and_then(Value::as_i64).unwrap_or(0);
        persistent.insert("count".to_string(), Value::Int(count + 1));
        Ok(data([("response", label)]))
    });
    for hook in ["start", "inter", "end"] {
        let hook_log = Arc::clone(log);
        registry.register_level(hook, move |_, _, context| {
            hook_log
                .lock()
                .expect("log")
                .push(format!("{hook} {}", context_label(context)));
            Ok(())
        });
    }
    registry
}

fn hooks() -> LevelBinding {
    LevelBinding {
        start: Some("start".to_string()),
        inter: Some("inter".to_string()),
        end: Some("end".to_string()),
    }
}

fn two_blocks(trials: i64) -> Experiment {
    let mut ivs = BTreeMap::new();
    ivs.insert("trial".to_string(), vec![Iv::new("a", (1..=trials).collect::<Vec<i64>>())]);
    let mut orderings = BTreeMap::new();
    orderings.insert("block".to_string(), Ordering::identity(2).expect("ordering"));
    orderings.insert("trial".to_string(), Ordering::identity(1).expect("ordering"));
    Experiment::basic(&["block", "trial"], ivs, orderings, 5).expect("experiment")
}

fn bound(mut experiment: Experiment, registry: &CallbackRegistry, with_hooks: bool) -> Experiment {
    experiment.set_run_callback("record");
    if with_hooks {
        experiment.set_level_callbacks("block", hooks());
    }
    experiment.bind(registry).expect("bind");
    experiment
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().expect("log").clone()
}

#[test]
fn counterbalanced_blocks_run_and_export() {
    let mut experiment = Experiment::blocked(
        vec![Iv::new("a", vec![false, true])],
        vec![Iv::new("b", vec![0, 1, 2])],
        1,
        Some(Ordering::complete_counterbalance(1).expect("ordering")),
        Some(Ordering::shuffle(4, false).expect("ordering")),
        11,
    )
    .expect("experiment");

    // One participant per block order; keep the first two.
    assert_eq!(experiment.root().len(), 6);
    while experiment.root().len() > 2 {
        experiment.root_mut().remove_child(-1).expect("remove participant");
    }
    let blocks: usize = experiment.root().children().iter().map(Section::len).sum();
    assert_eq!(blocks, 6);
    let trials = experiment
        .root()
        .walk()
        .into_iter()
        .filter(|section| section.level() == "trial")
        .count();
    assert_eq!(trials, 48);

    for participant in experiment.root().children() {
        let mut order: Vec<i64> = participant
            .children()
            .iter()
            .filter_map(|block| block.data().get("b").and_then(Value::as_i64))
            .collect();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
    }

    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(experiment, &registry, false);
    experiment
        .run_section(&[], &RunOptions::default())
        .expect("run");

    let leaves = experiment.root().all_leaf_contexts();
    assert_eq!(leaves.len(), 48);
    for leaf in &leaves {
        assert!(leaf.contains_key("a"));
        assert!(leaf.contains_key("b"));
        assert!(leaf.contains_key(COUNTERBALANCE_IV));
        assert!(leaf.contains_key("response"));
    }
    assert!(experiment.root().walk().iter().all(|section| section.has_finished()));
    assert_eq!(experiment.persistent().get("count"), Some(&Value::Int(48)));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out").join("results.csv");
    let rows = experiment
        .export_csv(&path, &ExportOptions::default())
        .expect("export");
    assert_eq!(rows, 48);
    let body = std::fs::read_to_string(&path).expect("read export");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 49);
    assert!(lines[0].starts_with("participant,block,trial,"));
    assert!(lines[0].contains(COUNTERBALANCE_IV));
}

#[test]
fn from_section_skips_earlier_sections() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(8), &registry, false);
    let options = RunOptions {
        from_section: vec![2, 5],
        ..RunOptions::default()
    };
    experiment.run_section(&[], &options).expect("run");

    let root = experiment.root();
    let first = root.child(1).expect("block 1");
    assert!(!first.has_started());
    assert!(first.children().iter().all(|trial| !trial.has_started()));

    let second = root.child(2).expect("block 2");
    assert!(second.has_started());
    assert!(second.has_finished());
    for (idx, trial) in second.children().iter().enumerate() {
        if idx < 4 {
            assert!(!trial.has_started(), "trial {} ran", idx + 1);
        } else {
            assert!(trial.has_started() && trial.has_finished());
            assert!(trial.data().contains_key("response"));
        }
    }
    assert_eq!(
        entries(&log),
        vec!["run 2.5", "run 2.6", "run 2.7", "run 2.8"]
    );
}

#[test]
fn from_section_rejects_bad_positions() {
    let mut experiment = two_blocks(2);
    let zero = RunOptions {
        from_section: vec![0],
        ..RunOptions::default()
    };
    assert_eq!(
        experiment.run_section(&[], &zero).expect_err("zero").code(),
        "zero-index"
    );
    let beyond = RunOptions {
        from_section: vec![3],
        ..RunOptions::default()
    };
    assert_eq!(
        experiment.run_section(&[], &beyond).expect_err("beyond").code(),
        "from-section-out-of-range"
    );
}

#[test]
fn quit_leaves_sections_resumable() {
    let log = Log::default();
    let registry = logging_registry(&log, Some("1.3"), None);
    let mut experiment = bound(two_blocks(4), &registry, false);

    let err = experiment
        .run_section(&[], &RunOptions::default())
        .expect_err("quit");
    assert!(err.is_quit());
    assert_eq!(err.to_string(), "session quit: stopped at 1.3");

    let root = experiment.root();
    assert!(root.has_started() && !root.has_finished());
    let block = root.child(1).expect("block 1");
    assert!(block.has_started() && !block.has_finished());
    let trial = block.child(3).expect("trial 3");
    assert!(trial.has_started() && !trial.has_finished());
    assert!(!trial.data().contains_key("response"));
    assert!(block.child(1).expect("trial 1").has_finished());
    assert!(!block.child(4).expect("trial 4").has_started());
    assert!(root.child(2).expect("block 2").walk().iter().all(|section| !section.has_started()));

    assert_eq!(root.find_first_partially_run("block"), Some(vec![0]));
    assert_eq!(root.find_first_not_run("trial", false), Some(vec![0, 2]));
}

#[test]
fn resume_continues_after_quit() {
    let log = Log::default();
    let quitting = logging_registry(&log, Some("1.3"), None);
    let mut experiment = bound(two_blocks(4), &quitting, false);
    experiment
        .run_section(&[], &RunOptions::default())
        .expect_err("quit");
    log.lock().expect("log").clear();

    let steady = logging_registry(&log, None, None);
    experiment.bind(&steady).expect("rebind");
    experiment
        .resume_section(&[], &RunOptions::default())
        .expect("resume");
    assert_eq!(
        entries(&log),
        vec!["run 1.3", "run 1.4", "run 2.1", "run 2.2", "run 2.3", "run 2.4"]
    );
    assert!(experiment.root().has_finished());

    log.lock().expect("log").clear();
    let err = experiment
        .resume_section(&[], &RunOptions::default())
        .expect_err("finished");
    assert_eq!(err.code(), "resume-finished");
    assert!(entries(&log).is_empty());
}

#[test]
fn resume_preconditions() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(2), &registry, false);

    let fresh = experiment
        .resume_section(&[0], &RunOptions::default())
        .expect_err("not started");
    assert_eq!(fresh.code(), "resume-not-started");

    let bottom = experiment
        .resume_section(&[0, 0], &RunOptions::default())
        .expect_err("bottom level");
    assert_eq!(bottom.code(), "resume-bottom-level");
}

#[test]
fn hooks_wrap_children_and_ancestors() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(3), &registry, true);
    experiment
        .run_section(&[0], &RunOptions::default())
        .expect("run block");
    assert_eq!(
        entries(&log),
        vec![
            "start 1.", "run 1.1", "inter 1.", "run 1.2", "inter 1.", "run 1.3", "end 1."
        ]
    );

    log.lock().expect("log").clear();
    experiment
        .run_section(&[1, 1], &RunOptions::default())
        .expect("run trial");
    assert_eq!(entries(&log), vec!["start 2.", "run 2.2", "end 2."]);

    log.lock().expect("log").clear();
    let skip_parents = RunOptions {
        parent_callbacks: false,
        ..RunOptions::default()
    };
    experiment
        .run_section(&[1, 2], &skip_parents)
        .expect("run trial");
    assert_eq!(entries(&log), vec!["run 2.3"]);
}

#[test]
fn end_hooks_run_when_a_callback_fails() {
    let log = Log::default();
    let registry = logging_registry(&log, None, Some("1.2"));
    let mut experiment = two_blocks(3);
    experiment.set_run_callback("record");
    experiment.set_level_callbacks("block", hooks());
    experiment.set_level_callbacks(
        BASE_LEVEL,
        LevelBinding {
            start: Some("start".to_string()),
            inter: None,
            end: Some("end".to_string()),
        },
    );
    experiment.bind(&registry).expect("bind");

    let err = experiment
        .run_section(&[0, 1], &RunOptions::default())
        .expect_err("callback error");
    assert_eq!(err.code(), "trial-failed");
    assert_eq!(
        entries(&log),
        vec!["start .", "start 1.", "run 1.2", "end 1.", "end ."]
    );
    let trial = experiment.root().at(&[1, 2]).expect("trial");
    assert!(trial.has_started() && !trial.has_finished());
}

#[test]
fn demo_runs_record_nothing() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(2), &registry, false);
    let demo = RunOptions {
        demo: true,
        ..RunOptions::default()
    };
    experiment.run_section(&[], &demo).expect("demo run");
    assert_eq!(entries(&log).len(), 4);
    assert!(experiment
        .root()
        .walk()
        .iter()
        .all(|section| !section.has_started() && !section.has_finished()));
    assert!(experiment
        .root()
        .all_leaf_contexts()
        .iter()
        .all(|leaf| !leaf.contains_key("response")));
}

#[test]
fn parents_finish_when_every_child_finished() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(2), &registry, false);
    experiment.run_section(&[0, 0], &RunOptions::default()).expect("trial 1");
    assert!(!experiment.root().child(1).expect("block").has_finished());
    experiment.run_section(&[0, 1], &RunOptions::default()).expect("trial 2");
    assert!(experiment.root().child(1).expect("block").has_finished());
    assert!(!experiment.root().has_finished());
    experiment.run_section(&[1], &RunOptions::default()).expect("block 2");
    assert!(experiment.root().has_finished());

    experiment
        .append_child(&[1], data([("extra", true)]), false)
        .expect("append trial");
    assert!(!experiment.root().has_finished());
    assert!(!experiment.root().child(2).expect("block").has_finished());
    assert_eq!(experiment.root().child(2).expect("block").len(), 3);
}

#[test]
fn callbacks_must_be_bound() {
    let mut experiment = two_blocks(1);
    experiment.set_run_callback("record");
    assert!(!experiment.is_bound());
    let err = experiment
        .run_section(&[], &RunOptions::default())
        .expect_err("unbound");
    assert_eq!(err.code(), "callbacks-unbound");

    let err = experiment
        .bind(&CallbackRegistry::new())
        .expect_err("missing key");
    assert_eq!(err.code(), "callback-missing");
    assert_eq!(
        err.info().and_then(|info| info.context.get("key")).map(String::as_str),
        Some("record")
    );
}

#[test]
fn summary_counts_progress() {
    let log = Log::default();
    let registry = logging_registry(&log, None, None);
    let mut experiment = bound(two_blocks(3), &registry, false);
    experiment.run_section(&[0], &RunOptions::default()).expect("block 1");
    let summary = experiment.summary();
    assert_eq!(summary.levels.len(), 2);
    let blocks = &summary.levels[0];
    assert_eq!((blocks.level.as_str(), blocks.sections, blocks.started, blocks.finished), ("block", 2, 1, 1));
    let trials = &summary.levels[1];
    assert_eq!((trials.level.as_str(), trials.sections, trials.started, trials.finished), ("trial", 6, 3, 3));
    assert_eq!(summary.persistent_keys, vec!["count".to_string()]);
}

fn stimulus_branches() -> Experiment {
    let identity = || Ordering::identity(1).expect("ordering");
    let trunk = vec![Level::new(
        "session",
        Design::crossed(vec![Iv::new("design", vec!["words", "faces"])], identity())
            .expect("design"),
    )];
    let mut branches = BTreeMap::new();
    branches.insert(
        "words".to_string(),
        vec![Level::new(
            "word_trial",
            Design::crossed(vec![Iv::new("word", vec!["cat", "dog"])], identity())
                .expect("design"),
        )],
    );
    branches.insert(
        "faces".to_string(),
        vec![Level::new(
            "face_trial",
            Design::crossed(vec![Iv::new("face", vec![1, 2, 3])], identity()).expect("design"),
        )],
    );
    let tree =
        DesignTree::build(trunk, branches, &mut RngHandle::from_seed(2)).expect("branched tree");
    Experiment::new(tree, 8).expect("experiment")
}

#[test]
fn branches_are_realized_and_run_by_design_value() {
    let mut experiment = stimulus_branches();
    let root = experiment.root();
    assert_eq!(root.len(), 2);

    let words = root.child(1).expect("session 1");
    assert_eq!(words.data().get("design"), Some(&Value::from("words")));
    assert_eq!(words.local_levels(), vec!["word_trial".to_string()]);
    assert_eq!(words.len(), 2);

    let faces = root.child(2).expect("session 2");
    assert_eq!(faces.data().get("design"), Some(&Value::from("faces")));
    assert_eq!(faces.local_levels(), vec!["face_trial".to_string()]);
    assert_eq!(faces.len(), 3);

    let mut registry = CallbackRegistry::new();
    registry.register_run("respond", |_, _, context| {
        let design = context.get("design").map(Value::to_string).unwrap_or_default();
        Ok(data([("response", design)]))
    });
    experiment.set_run_callback("respond");
    experiment.bind(&registry).expect("bind");
    experiment
        .run_section(&[], &RunOptions::default())
        .expect("run");

    let leaves = experiment.root().all_leaf_contexts();
    assert_eq!(leaves.len(), 5);
    let from_words: Vec<&Data> = leaves
        .iter()
        .filter(|leaf| leaf.get("response") == Some(&Value::from("words")))
        .collect();
    assert_eq!(from_words.len(), 2);
    assert!(from_words.iter().all(|leaf| leaf.contains_key("word")));
    let from_faces: Vec<&Data> = leaves
        .iter()
        .filter(|leaf| leaf.get("response") == Some(&Value::from("faces")))
        .collect();
    assert_eq!(from_faces.len(), 3);
    assert!(from_faces.iter().all(|leaf| leaf.contains_key("face")));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("branches.csv");
    let rows = experiment
        .export_csv(&path, &ExportOptions::default())
        .expect("export");
    assert_eq!(rows, 5);
    let body = std::fs::read_to_string(&path).expect("read export");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with("session,word_trial,face_trial,"));
}
