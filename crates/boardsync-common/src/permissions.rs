//! Role-based permission gate for board mutations.
//!
//! Permissions are never stored. They are a pure projection of the
//! subject's role, recomputed on every check:
//!
//! | Role     | view | edit | delete | create columns | delete columns | invite | manage project |
//! |----------|------|------|--------|----------------|----------------|--------|----------------|
//! | `admin`  | yes  | yes  | yes    | yes            | yes            | yes    | yes            |
//! | `editor` | yes  | yes  | no     | yes            | no             | no     | no             |
//! | `viewer` | yes  | no   | no     | no             | no             | no     | no             |
//!
//! Any role string that is not recognised maps to `viewer`.

use serde::{Deserialize, Serialize};

/// Role of the subject performing an action on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Admin,
    Editor,
    #[default]
    Viewer,
}

impl Role {
    /// Parse a role name, falling back to [`Role::Viewer`] for anything unknown.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "admin" => Role::Admin,
            "editor" => Role::Editor,
            _ => Role::Viewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::parse(&s)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Edit,
    Delete,
    CreateColumns,
    DeleteColumns,
    Invite,
    ManageProject,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::View,
        Action::Edit,
        Action::Delete,
        Action::CreateColumns,
        Action::DeleteColumns,
        Action::Invite,
        Action::ManageProject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::CreateColumns => "create_columns",
            Action::DeleteColumns => "delete_columns",
            Action::Invite => "invite",
            Action::ManageProject => "manage_project",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid action '{0}'. Valid values: view, edit, delete, create_columns, delete_columns, invite, manage_project")]
pub struct UnknownAction(pub String);

impl std::str::FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Everything a role may do, derived from [`Role`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_create_columns: bool,
    pub can_delete_columns: bool,
    pub can_invite: bool,
    pub can_manage_project: bool,
}

impl Permissions {
    pub fn for_role(role: Role) -> Self {
        let is_admin = role == Role::Admin;
        let can_edit = matches!(role, Role::Admin | Role::Editor);
        Self {
            can_view: true,
            can_edit,
            can_delete: is_admin,
            can_create_columns: can_edit,
            // Column removal stays admin-only even though editors may add columns.
            can_delete_columns: is_admin,
            can_invite: is_admin,
            can_manage_project: is_admin,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::View => self.can_view,
            Action::Edit => self.can_edit,
            Action::Delete => self.can_delete,
            Action::CreateColumns => self.can_create_columns,
            Action::DeleteColumns => self.can_delete_columns,
            Action::Invite => self.can_invite,
            Action::ManageProject => self.can_manage_project,
        }
    }
}

/// Decide whether `role` may perform `action`. Pure; never fails.
pub fn authorize(role: Role, action: Action) -> bool {
    Permissions::for_role(role).allows(action)
}
