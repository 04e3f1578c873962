use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use ulid::Ulid;

use timetable::calendar::{Calendar, CalendarFilter};
use timetable::engine::{audit, Scheduler, SchedulingError};
use timetable::model::*;
use timetable::policy::Actor;
use timetable::registry::MemoryCourseRegistry;
use timetable::store::{MemoryRepository, SessionFilter, SessionRepository};

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("timetable_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn t(h: u8, m: u8) -> TimeOfDay {
    TimeOfDay::new(h, m).unwrap()
}

fn register(registry: &MemoryCourseRegistry, teacher_id: TeacherId, class_group_id: ClassGroupId) -> CourseId {
    let id = Ulid::new();
    registry.register(Course {
        id,
        subject: "Physics".into(),
        teacher_id,
        class_group_id,
        term: "2025-S2".into(),
    });
    id
}

fn request(course_id: CourseId, weekday: Weekday, start: TimeOfDay, end: TimeOfDay, room: &str) -> NewSession {
    NewSession {
        course_id,
        weekday,
        start,
        end,
        format: SessionFormat::Tutorial,
        room: room.into(),
    }
}

fn build(repo: Arc<MemoryRepository>) -> (Arc<Scheduler>, Arc<MemoryCourseRegistry>) {
    let registry = Arc::new(MemoryCourseRegistry::new());
    (Arc::new(Scheduler::new(repo, registry.clone())), registry)
}

// ── Races ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_room_slot_commits_exactly_once() {
    let repo = Arc::new(MemoryRepository::new());
    let (scheduler, registry) = build(repo.clone());
    let admin = Actor::admin(Ulid::new());

    // Distinct teachers and groups: the room is the only shared resource.
    let courses: Vec<CourseId> = (0..16)
        .map(|_| register(&registry, Ulid::new(), Ulid::new()))
        .collect();

    let attempts = courses.iter().map(|&course| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .create(&admin, request(course, Weekday::Wednesday, t(10, 0), t(12, 0), "Amphi A"))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1);
    for r in &results {
        if let Err(e) = r {
            assert!(matches!(e, SchedulingError::Conflict(c) if c.len() == 1), "unexpected {e:?}");
        }
    }
    assert_eq!(repo.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_concurrent_load_keeps_invariants() {
    let repo = Arc::new(MemoryRepository::new());
    let (scheduler, registry) = build(repo.clone());
    let admin = Actor::admin(Ulid::new());

    let teachers: Vec<TeacherId> = (0..3).map(|_| Ulid::new()).collect();
    let groups: Vec<ClassGroupId> = (0..3).map(|_| Ulid::new()).collect();
    let mut courses = Vec::new();
    for teacher in &teachers {
        for group in &groups {
            courses.push(register(&registry, *teacher, *group));
        }
    }
    let rooms = ["Amphi A", "Amphi B", "Lab 1"];

    let mut tasks = Vec::new();
    for (i, &course) in courses.iter().enumerate() {
        for day in [Weekday::Monday, Weekday::Tuesday] {
            for hour in (8..16).step_by(2) {
                let scheduler = scheduler.clone();
                let room = rooms[(i + hour as usize) % rooms.len()];
                // Odd starts overlap the even grid by half an hour.
                let start = t(hour + (i % 2) as u8, 30 * (i % 2) as u8);
                let end = t(hour + 1 + (i % 2) as u8, 30 * (i % 2) as u8);
                tasks.push(tokio::spawn(async move {
                    scheduler.create(&admin, request(course, day, start, end, room)).await
                }));
            }
        }
    }
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) | Err(SchedulingError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let sessions = repo.query(&SessionFilter::all()).await.unwrap();
    assert!(!sessions.is_empty());
    assert!(audit(&sessions).is_empty());

    // Each teacher's Monday column has no overlapping pair.
    let calendar = Calendar::new(repo.clone());
    for teacher in teachers {
        let filter = CalendarFilter {
            weekday: Some(Weekday::Monday),
            teacher_id: Some(teacher),
            ..CalendarFilter::default()
        };
        let view = calendar.view(&filter).await.unwrap();
        for pair in view.as_slice().windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}

#[tokio::test]
async fn concurrent_deletes_of_one_session() {
    let repo = Arc::new(MemoryRepository::new());
    let (scheduler, registry) = build(repo.clone());
    let admin = Actor::admin(Ulid::new());
    let course = register(&registry, Ulid::new(), Ulid::new());
    let s = scheduler
        .create(&admin, request(course, Weekday::Friday, t(8, 0), t(9, 0), "B-101"))
        .await
        .unwrap();

    let results = join_all((0..4).map(|_| scheduler.delete(&admin, s.id))).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SchedulingError::NotFound(_))));
    assert!(repo.is_empty().await);
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn committed_schedule_survives_restart() {
    let dir = test_dir();
    let path = dir.join("timetable.wal");
    let admin = Actor::admin(Ulid::new());
    let teacher = Ulid::new();

    let (kept, moved) = {
        let repo = Arc::new(MemoryRepository::open(&path).unwrap());
        let (scheduler, registry) = build(repo.clone());
        let course = register(&registry, teacher, Ulid::new());

        let kept = scheduler
            .create(&admin, request(course, Weekday::Monday, t(8, 0), t(10, 0), "Amphi A"))
            .await
            .unwrap();
        let doomed = scheduler
            .create(&admin, request(course, Weekday::Monday, t(10, 0), t(12, 0), "Amphi A"))
            .await
            .unwrap();
        let moved = scheduler
            .update(&admin, doomed.id, SessionChanges::reschedule(t(13, 0), t(15, 0)))
            .await
            .unwrap();
        (kept, moved)
    };

    let repo = Arc::new(MemoryRepository::open(&path).unwrap());
    let calendar = Calendar::new(repo.clone());
    let view = calendar.for_actor(&Actor::teacher(teacher)).await.unwrap();
    assert_eq!(view.as_slice(), &[kept.clone(), moved.clone()]);

    // The restored grid still guards against collisions.
    let (scheduler, registry) = build(repo.clone());
    let other = register(&registry, Ulid::new(), Ulid::new());
    let clash = scheduler
        .create(&admin, request(other, Weekday::Monday, t(14, 0), t(16, 0), "Amphi A"))
        .await;
    match clash {
        Err(SchedulingError::Conflict(conflicts)) => assert_eq!(conflicts[0].session, moved),
        other => panic!("expected conflict, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}
