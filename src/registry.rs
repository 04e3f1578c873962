use dashmap::DashMap;

use crate::model::{Course, CourseId};

/// Synchronous course lookup. The registry owns courses; the scheduler only reads them.
pub trait CourseRegistry: Send + Sync {
    fn course(&self, id: CourseId) -> Option<Course>;
}

/// Course registry kept in memory, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCourseRegistry {
    courses: DashMap<CourseId, Course>,
}

impl MemoryCourseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a course. Returns the previous entry for that id.
    pub fn register(&self, course: Course) -> Option<Course> {
        self.courses.insert(course.id, course)
    }

    pub fn remove(&self, id: &CourseId) -> Option<Course> {
        self.courses.remove(id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

impl CourseRegistry for MemoryCourseRegistry {
    fn course(&self, id: CourseId) -> Option<Course> {
        self.courses.get(&id).map(|e| e.value().clone())
    }
}
