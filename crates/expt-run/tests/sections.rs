use expt_core::{data, Data, RngHandle, Value, BASE_LEVEL};
use expt_design::{Design, DesignTree, Iv, Level, Ordering};
use expt_run::{Positions, Section};
use proptest::prelude::*;

fn two_level_tree(blocks: usize, trial_values: Vec<i64>) -> DesignTree {
    let levels = vec![
        Level::new(
            "block",
            Design::empty(Ordering::identity(blocks).expect("ordering")).expect("design"),
        ),
        Level::new(
            "trial",
            Design::crossed(
                vec![Iv::new("a", trial_values)],
                Ordering::identity(1).expect("ordering"),
            )
            .expect("design"),
        ),
    ];
    let mut tree = DesignTree::new(levels, &mut RngHandle::from_seed(3)).expect("tree");
    tree.add_base_level().expect("base level");
    tree
}

fn realized(blocks: usize, trial_values: Vec<i64>) -> Section {
    let tree = two_level_tree(blocks, trial_values);
    Section::realize(&tree, &mut RngHandle::from_seed(4)).expect("realize")
}

#[test]
fn realization_builds_every_level() {
    let root = realized(2, vec![1, 2, 3]);
    assert_eq!(root.level(), BASE_LEVEL);
    assert_eq!(root.child_level(), Some("block"));
    assert_eq!(root.len(), 2);
    for block in root.children() {
        assert_eq!(block.level(), "block");
        assert_eq!(block.len(), 3);
        assert!(block.children().iter().all(Section::is_bottom_level));
    }
    assert_eq!(root.levels(), vec!["block".to_string(), "trial".to_string()]);
    assert_eq!(root.local_levels(), vec!["block".to_string()]);
    assert_eq!(root.walk().len(), 1 + 2 + 6);
}

#[test]
fn siblings_are_numbered_from_one() {
    let root = realized(2, vec![10, 20, 30]);
    let numbers: Vec<i64> = root.children().iter().filter_map(Section::number).collect();
    assert_eq!(numbers, vec![1, 2]);
    let trial = root.at(&[2, 3]).expect("trial");
    assert_eq!(trial.number(), Some(3));
    assert_eq!(trial.description(), "trial 3");
    assert_eq!(trial.data().get("a"), Some(&Value::Int(30)));
}

#[test]
fn positions_are_one_based_and_negative_from_end() {
    let root = realized(3, vec![1, 2]);
    assert_eq!(root.child(1).expect("first").number(), Some(1));
    assert_eq!(root.child(-1).expect("last").number(), Some(3));
    assert_eq!(root.child(-3).expect("first").number(), Some(1));

    let zero = root.child(0).expect_err("zero is rejected");
    assert_eq!(zero.code(), "zero-index");
    let beyond = root.child(4).expect_err("out of range");
    assert_eq!(beyond.code(), "index-out-of-range");
    let before = root.child(-4).expect_err("out of range");
    assert_eq!(before.code(), "index-out-of-range");

    assert_eq!(root.path_of(&[2, -1]).expect("path"), vec![1, 1]);
}

#[test]
fn resolved_data_merges_ancestors() {
    let root = realized(2, vec![5, 6]);
    let context = root.resolved_data(&[1, 0]).expect("context");
    assert_eq!(context.get("block"), Some(&Value::Int(2)));
    assert_eq!(context.get("trial"), Some(&Value::Int(1)));
    assert_eq!(context.get("a"), Some(&Value::Int(5)));

    let parents = root.parents(&[1, 0]).expect("parents");
    let levels: Vec<&str> = parents.iter().map(|section| section.level()).collect();
    assert_eq!(levels, vec![BASE_LEVEL, "block"]);

    let missing = root.resolved_data(&[5]).expect_err("missing");
    assert_eq!(missing.code(), "section-not-found");
}

#[test]
fn edits_renumber_children() {
    let tree = two_level_tree(3, vec![1]);
    let mut root = Section::realize(&tree, &mut RngHandle::from_seed(1)).expect("realize");
    root.child_mut(2)
        .expect("block")
        .add_data(data([("tag", "middle")]));

    let removed = root.remove_child(1).expect("remove");
    assert_eq!(removed.number(), Some(1));
    assert_eq!(root.len(), 2);
    assert_eq!(root.child(1).expect("first").data().get("tag"), Some(&Value::from("middle")));
    assert_eq!(root.child(1).expect("first").number(), Some(1));

    root.swap_children(1, 2).expect("swap");
    assert_eq!(root.child(2).expect("second").data().get("tag"), Some(&Value::from("middle")));
    assert_eq!(root.child(2).expect("second").number(), Some(2));

    let cursor = tree.cursor().next(root.data()).expect("next").expect("block level");
    let mut rng = RngHandle::from_seed(9);
    root.append_child(data([("tag", "first")]), cursor, true, &Data::new(), &mut rng)
        .expect("append");
    assert_eq!(root.len(), 3);
    let first = root.child(1).expect("first");
    assert_eq!(first.data().get("tag"), Some(&Value::from("first")));
    assert_eq!(first.number(), Some(1));
    assert_eq!(first.len(), 1, "appended sections are realized below");
    let numbers: Vec<i64> = root.children().iter().filter_map(Section::number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn append_tree_rejects_own_level() {
    let tree = two_level_tree(1, vec![1]);
    let mut root = Section::realize(&tree, &mut RngHandle::from_seed(1)).expect("realize");
    let block = root.child_mut(1).expect("block");

    let same = DesignTree::new(
        vec![Level::new("block", Design::empty(Ordering::identity(1).expect("ordering")).expect("design"))],
        &mut RngHandle::from_seed(2),
    )
    .expect("tree");
    let err = block
        .append_tree(&same, false, &Data::new(), &mut RngHandle::from_seed(3))
        .expect_err("same level");
    assert_eq!(err.code(), "append-same-level");

    let extra = DesignTree::new(
        vec![Level::new(
            "trial",
            Design::crossed(vec![Iv::new("a", vec![7, 8])], Ordering::identity(1).expect("ordering"))
                .expect("design"),
        )],
        &mut RngHandle::from_seed(2),
    )
    .expect("tree");
    block
        .append_tree(&extra, false, &Data::new(), &mut RngHandle::from_seed(3))
        .expect("append tree");
    assert_eq!(block.len(), 3);
    let numbers: Vec<i64> = block.children().iter().filter_map(Section::number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(block.child(-1).expect("last").data().get("a"), Some(&Value::Int(8)));
}

#[test]
fn searches_use_resolved_data() {
    let root = realized(2, vec![1, 2, 3]);
    let path = root.locate(&[("block", 2), ("trial", 3)]).expect("locate");
    assert_eq!(path, vec![1, 2]);
    let section = root.subsection(&[("block", 2), ("trial", 3)]).expect("subsection");
    assert_eq!(section.description(), "trial 3");

    let missing = root.locate(&[("block", 9)]).expect_err("missing");
    assert_eq!(missing.code(), "subsection-not-found");

    let by_value = |_: &Section, context: &Data| context.get("a") == Some(&Value::Int(2));
    assert_eq!(root.breadth_first_search(&by_value), Some(vec![0, 1]));
    assert_eq!(root.depth_first_search(&by_value, None), Some(vec![0, 1]));

    let second_block_only = |section: &Section, context: &Data| {
        section.level() == BASE_LEVEL || context.get("block") == Some(&Value::Int(2))
    };
    assert_eq!(
        root.depth_first_search(&by_value, Some(&second_block_only)),
        Some(vec![1, 1])
    );
}

#[test]
fn all_subsections_selects_per_level() {
    let root = realized(3, vec![1, 2, 3, 4]);
    let picked = root
        .all_subsections(&[("block", Positions::from(vec![1, 3])), ("trial", Positions::from(-1))])
        .expect("subsections");
    assert_eq!(picked, vec![vec![0, 3], vec![2, 3]]);

    let every_second_trial = root
        .all_subsections(&[("trial", Positions::from(2))])
        .expect("subsections");
    assert_eq!(every_second_trial, vec![vec![0, 1], vec![1, 1], vec![2, 1]]);

    let err = root
        .all_subsections(&[("block", Positions::from(0))])
        .expect_err("zero");
    assert_eq!(err.code(), "zero-index");
}

#[test]
fn fresh_tree_has_nothing_run() {
    let root = realized(2, vec![1, 2]);
    assert_eq!(root.find_first_not_run("block", true), Some(vec![0]));
    assert_eq!(root.find_first_not_run("trial", false), Some(vec![0, 0]));
    assert_eq!(root.find_first_partially_run("block"), None);
}

proptest! {
    #[test]
    fn leaf_contexts_inherit_every_ancestor(blocks in 1usize..5, values in 1usize..5, seed in any::<u64>()) {
        let trial_values: Vec<i64> = (0..values as i64).collect();
        let tree = two_level_tree(blocks, trial_values);
        let root = Section::realize(&tree, &mut RngHandle::from_seed(seed)).expect("realize");
        let leaves = root.all_leaf_contexts();
        prop_assert_eq!(leaves.len(), blocks * values);
        for (idx, leaf) in leaves.iter().enumerate() {
            let block = (idx / values) as i64 + 1;
            let trial = (idx % values) as i64 + 1;
            prop_assert_eq!(leaf.get("block"), Some(&Value::Int(block)));
            prop_assert_eq!(leaf.get("trial"), Some(&Value::Int(trial)));
            prop_assert!(leaf.contains_key("a"));
        }
    }
}
