use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use timetable_optimizer::layout::{assign_lanes, build_timetable};
use timetable_optimizer::mask::{occupied_masks, occupied_masks_from_arrays};
use timetable_optimizer::materialize::{JsonFilePersistence, load_best_schedule_cache};
use timetable_optimizer::worker::JobState;
use timetable_optimizer::{
    BestScheduleJob, CancelToken, CourseId, CourseTable, Day, EngineConfig, Notification,
    SaveJob, Selection, TaskHost, TimeMask,
};

fn catalog() -> CourseTable {
    let courses = json!([
        {"id": 10, "name": "C1", "credit": 2, "department": "Math", "slots": [{"day": "Mon", "period": 0}]},
        {"id": 20, "name": "C2", "credit": 3, "department": "General Education", "slots": [{"day": "Mon", "period": 1}]},
        {"id": 30, "name": "C3", "credit": 4, "department": "Math", "slots": [{"day": "Mon", "period": 0}]},
        {"id": 40, "name": "C4", "credit": null, "department": "Art", "slots": [{"day": "Mon", "period": 2}]},
        {"id": 50, "name": "C5 (evening)", "credit": 1.5, "department": "Art",
         "slots": [{"day": "Wed", "period": 11}, {"day": "Wed", "period": 12}]}
    ]);
    CourseTable::from_json(&courses.to_string()).unwrap()
}

fn selection() -> Selection {
    let mut selection = Selection::default();
    for id in [20, 10, 30, 40, 50] {
        selection.included.insert(id);
        selection.add_favorite(id);
    }
    selection.locked.insert(20);
    selection
}

fn job(token: u64, user_dir: &Path) -> BestScheduleJob {
    BestScheduleJob {
        token,
        user_dir: user_dir.to_path_buf(),
        username: "student".to_string(),
        selection: selection(),
        table: Some(Arc::new(catalog())),
        config: EngineConfig::default(),
    }
}

#[test]
fn occupied_masks_match_parallel_arrays() {
    let table = catalog();
    let cids: Vec<CourseId> = table.courses().iter().map(|c| c.id).collect();
    let lo: Vec<u64> = table.courses().iter().map(|c| c.mask.lo).collect();
    let hi: Vec<u64> = table.courses().iter().map(|c| c.mask.hi).collect();

    assert_eq!(&lo[..4], &[1, 2, 1, 4]);
    assert_eq!(occupied_masks_from_arrays(&lo, &hi, &cids, &[10, 20]), TimeMask::new(3, 0));
    assert_eq!(occupied_masks_from_arrays(&lo, &hi, &cids, &[99]), TimeMask::EMPTY);
    assert_eq!(occupied_masks(&table, &[10, 20]), TimeMask::new(3, 0));
}

#[test]
fn lanes_follow_conflicts() {
    let table = catalog();
    let conflicting = assign_lanes(&table, &[10, 30]);
    assert_eq!(conflicting.max_lane, 2);
    assert_ne!(conflicting.lane_of(10), conflicting.lane_of(30));

    let disjoint = assign_lanes(&table, &[10, 20]);
    assert_eq!(disjoint.max_lane, 1);
    assert_eq!(disjoint.lane_of(10), 1);
    assert_eq!(disjoint.lane_of(20), 1);
}

#[test]
fn timetable_renders_current_selection() {
    let table = catalog();
    let selection = selection();
    let tt = build_timetable(&table, &selection.included, &selection.locked, &[Day::Mon, Day::Wed]);
    assert_eq!(tt.day_lanes, vec![(Day::Mon, 2), (Day::Wed, 1)]);
    assert_eq!(tt.columns(), 3);
    assert!(tt.cell(1, 0).unwrap().locked);
    assert_eq!(tt.cell(11, 2).unwrap().text, "C5\n0050");
    assert_eq!(tt.cell(12, 2).unwrap().primary, Some(50));
}

#[test]
fn cancelling_before_start_reports_cancelled_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let seen = Mutex::new(Vec::new());
    let notify = |n: Notification| seen.lock().unwrap().push(n);

    let completion = job(3, dir.path()).run(&cancel, &JsonFilePersistence, &notify);

    assert!(completion.cancelled);
    assert!(!completion.succeeded);
    assert!(completion.files.is_empty());
    assert_eq!(completion.state(), JobState::Cancelled);
    let seen = seen.into_inner().unwrap();
    assert!(!seen.iter().any(|n| matches!(n, Notification::Progress { .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn host_runs_optimizer_and_writes_best_schedules() {
    let dir = tempfile::tempdir().unwrap();
    let (host, mut notifications) =
        TaskHost::new(tokio::runtime::Handle::current(), Arc::new(JsonFilePersistence));
    let token = host.next_token();
    let completion = host.dispatch_best_schedule(job(token, dir.path())).wait().await;

    assert!(completion.succeeded, "{}", completion.error);
    assert_eq!(completion.token, token);
    assert_eq!(completion.files.len(), 5);
    assert!(completion.files.iter().all(|f| f.exists()));

    // 20 locked (3) + 30 (4) + 50 (1.5); zero-credit 40 only raises the priority sum
    let best = completion.files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(best, "credits_8.5_priority_9.json");

    let mut percents = Vec::new();
    while let Ok(n) = notifications.try_recv() {
        assert_eq!(n.token(), token);
        if let Notification::Progress { percent, .. } = n {
            percents.push(percent);
        }
    }
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] < w[1]));

    let cache = load_best_schedule_cache(dir.path()).unwrap().unwrap();
    assert_eq!(cache.favorites, vec![10, 20, 30, 40, 50]);
    assert_eq!(cache.locked, vec![20]);
    assert_eq!(cache.files.len(), 5);
    assert_eq!(cache.files[0], best);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&completion.files[0]).unwrap()).unwrap();
    assert_eq!(saved["included"], json!([20, 30, 50]));
    assert_eq!(saved["locked"], json!([20]));
}

#[tokio::test]
async fn newer_request_supersedes_older() {
    let dir = tempfile::tempdir().unwrap();
    let (host, _notifications) =
        TaskHost::new(tokio::runtime::Handle::current(), Arc::new(JsonFilePersistence));
    let first = host.dispatch_best_schedule(job(host.next_token(), &dir.path().join("a")));
    let second = host.dispatch_best_schedule(job(host.next_token(), &dir.path().join("b")));

    assert!(!host.is_current(first.token));
    assert!(host.is_current(second.token));

    let first = first.wait().await;
    assert!(first.succeeded || first.cancelled);
    assert!(second.wait().await.succeeded);
}

#[tokio::test]
async fn save_job_reports_through_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("current.json");
    let (host, mut notifications) =
        TaskHost::new(tokio::runtime::Handle::current(), Arc::new(JsonFilePersistence));
    let token = host.next_token();
    let outcome = host
        .dispatch_save(SaveJob {
            token,
            path: path.clone(),
            username: "student".to_string(),
            selection: selection(),
            table: Arc::new(catalog()),
        })
        .await
        .unwrap();

    assert!(outcome.is_ok());
    assert!(path.exists());
    assert!(host.is_current(token));
    assert_eq!(
        notifications.recv().await,
        Some(Notification::SaveFinished {
            token,
            ok: true,
            error: String::new()
        })
    );
}

#[test]
fn unlocked_favorites_outside_inclusion_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = job(1, dir.path());
    job.selection.included = BTreeSet::from([20]);
    let completion = job.run(&CancelToken::new(), &JsonFilePersistence, &|_: Notification| {});
    assert!(completion.succeeded);
    assert_eq!(completion.files.len(), 1);
}
