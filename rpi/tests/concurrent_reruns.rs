//! Back-to-back rerun requests for one feature execute one after the other.

use std::thread;
use std::time::Duration;

use chrono::Utc;

use rpi::core::types::{CommitStrategy, Stage};
use rpi::dispatch::{DispatchOutcome, dispatch};
use rpi::test_support::{
    FakeReviewHost, RecordingScm, ScriptedAgent, ScriptedReply, TestWorkspace, comment_event,
    label_event,
};

#[test]
fn two_reruns_for_one_feature_never_overlap() {
    let ws = TestWorkspace::new().expect("workspace");
    let agent = ScriptedAgent::outputs(&["# Research\n", "# Plan\n", "Done."])
        .with_delay(Duration::from_millis(50));
    let scm = RecordingScm::new();
    let review = FakeReviewHost::new();
    let controller = ws.controller(&agent, &scm, &review).expect("controller");

    dispatch(&controller, &label_event("3", "Cache tokens", "alice"), Utc::now())
        .expect("initial run");
    for output in ["# Plan A\n", "Done A.", "# Plan B\n", "Done B."] {
        agent.push(ScriptedReply::Output(output.to_string()));
    }

    let first = comment_event("42", "c1", "replan prefer redis", "alice");
    let second = comment_event("42", "c2", "replan prefer memcached", "alice");
    let outcomes = thread::scope(|scope| {
        let a = scope.spawn(|| dispatch(&controller, &first, Utc::now()));
        let b = scope.spawn(|| dispatch(&controller, &second, Utc::now()));
        [a.join().expect("join a"), b.join().expect("join b")]
    });

    for outcome in outcomes {
        match outcome.expect("rerun") {
            DispatchOutcome::Run(run) => assert_eq!(run.stage, Stage::Completed),
            other => panic!("expected run outcome, got {other:?}"),
        }
    }

    assert_eq!(agent.max_in_flight(), 1);
    assert_eq!(agent.remaining(), 0);
    let stages: Vec<Option<Stage>> = agent.requests().iter().map(|r| r.stage).collect();
    assert_eq!(
        stages[3..],
        [
            Some(Stage::Plan),
            Some(Stage::Implement),
            Some(Stage::Plan),
            Some(Stage::Implement)
        ]
    );

    // The queued rerun rewinds what the first one committed.
    let commits = scm.commits();
    assert_eq!(commits.len(), 7);
    assert_eq!(commits[3].replaces, Some(RecordingScm::sha(2)));
    assert_eq!(commits[5].replaces, Some(RecordingScm::sha(4)));
    assert!(commits[3..].iter().all(|c| c.strategy == CommitStrategy::Rewrite));

    let run = ws.runs().load("cache-tokens").expect("load").expect("run");
    assert_eq!(run.current_stage, Stage::Completed);
    assert_eq!(
        run.commit_for(Stage::Plan).map(|c| c.sha.clone()),
        Some(RecordingScm::sha(6))
    );
    assert_eq!(review.acks().len(), 2);
}
