use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ClassGroupId, Session, UserId};

/// Role of an authenticated actor, resolved once by the front end and passed in explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
    Student { class_group_id: ClassGroupId },
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn admin(id: UserId) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn teacher(id: UserId) -> Self {
        Self { id, role: Role::Teacher }
    }

    pub fn student(id: UserId, class_group_id: ClassGroupId) -> Self {
        Self {
            id,
            role: Role::Student { class_group_id },
        }
    }

    pub fn other(id: UserId) -> Self {
        Self { id, role: Role::Other }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Cascade removal of every session owned by a course, teacher or class group.
    Release,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Release => "release",
        })
    }
}

/// Decide whether `actor` may perform `action` on `target`.
///
/// For `Update` and `Delete` the target must be the committed session, not the
/// proposed replacement: a teacher may only touch sessions of their own courses.
pub fn authorize(actor: &Actor, action: Action, target: &Session) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Teacher => action != Action::Release && target.teacher_id() == actor.id,
        Role::Student { .. } | Role::Other => false,
    }
}

/// Cascades have no single target session; only admins may run them.
pub fn authorize_release(actor: &Actor) -> bool {
    matches!(actor.role, Role::Admin)
}
