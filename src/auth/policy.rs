use crate::error::{CmsError, Result};
use crate::models::{Role, User};

/// 已认证的请求方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}

/// 受保护的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListUsers,
    ViewUser,
    CreateUser,
    UpdateUser,
    /// 修改角色或启用状态
    AdministerUser,
    DeleteUser,
    CreatePost,
    UpdatePost,
    DeletePost,
    ViewRevisions,
    ManageTaxonomy,
    ModerateComments,
    ReplyComment,
    ViewMedia,
    UploadMedia,
    EditMedia,
    ManageSettings,
    ViewDashboard,
    ManageExtensions,
    Backup,
}

/// 一个操作的授权规则：`full` 中的角色无条件允许，`owner` 中的角色只能操作自己的资源
struct Rule {
    full: &'static [Role],
    owner: &'static [Role],
}

const EVERYONE: &[Role] = Role::ALL;
const ADMIN: &[Role] = &[Role::Admin];
const STAFF: &[Role] = &[Role::Admin, Role::Editor];
const WRITERS: &[Role] = &[Role::Admin, Role::Editor, Role::Author];
const AUTHOR: &[Role] = &[Role::Author];
const NONE: &[Role] = &[];

fn rule(action: Action) -> Rule {
    use Action::*;
    let (full, owner) = match action {
        ListUsers => (STAFF, NONE),
        ViewUser => (EVERYONE, NONE),
        CreateUser => (ADMIN, NONE),
        UpdateUser => (ADMIN, EVERYONE),
        AdministerUser => (ADMIN, NONE),
        DeleteUser => (ADMIN, NONE),
        CreatePost => (WRITERS, NONE),
        UpdatePost => (STAFF, AUTHOR),
        DeletePost => (STAFF, NONE),
        ViewRevisions => (STAFF, AUTHOR),
        ManageTaxonomy => (STAFF, NONE),
        ModerateComments => (STAFF, NONE),
        ReplyComment => (WRITERS, NONE),
        ViewMedia => (EVERYONE, NONE),
        UploadMedia => (EVERYONE, NONE),
        EditMedia => (STAFF, AUTHOR),
        ManageSettings => (ADMIN, NONE),
        ViewDashboard => (STAFF, NONE),
        ManageExtensions => (ADMIN, NONE),
        Backup => (ADMIN, NONE),
    };
    Rule { full, owner }
}

/// 角色检查：角色本身是否足以执行该操作
pub fn role_allows(role: Role, action: Action) -> bool {
    rule(action).full.contains(&role)
}

/// 所有权检查：资源属于请求方，且其角色享有所有者例外
pub fn owner_allows(actor: &Actor, action: Action, owner_id: Option<i64>) -> bool {
    owner_id == Some(actor.id) && rule(action).owner.contains(&actor.role)
}

/// 授权入口。`owner_id` 为目标资源的所有者（没有所有者概念的操作传 `None`）
pub fn authorize(actor: &Actor, action: Action, owner_id: Option<i64>) -> Result<()> {
    if role_allows(actor.role, action) || owner_allows(actor, action, owner_id) {
        Ok(())
    } else {
        Err(CmsError::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: i64, role: Role) -> Actor {
        Actor { id, role }
    }

    #[test]
    fn test_role_check() {
        assert!(role_allows(Role::Admin, Action::DeleteUser));
        assert!(!role_allows(Role::Editor, Action::DeleteUser));
        assert!(role_allows(Role::Editor, Action::ModerateComments));
        assert!(!role_allows(Role::Author, Action::ModerateComments));
        assert!(role_allows(Role::Subscriber, Action::UploadMedia));
    }

    #[test]
    fn test_owner_check_is_separate() {
        let author = actor(7, Role::Author);
        assert!(!role_allows(author.role, Action::UpdatePost));
        assert!(owner_allows(&author, Action::UpdatePost, Some(7)));
        assert!(!owner_allows(&author, Action::UpdatePost, Some(8)));
        // 投稿者没有所有者例外
        assert!(!owner_allows(&actor(7, Role::Contributor), Action::UpdatePost, Some(7)));
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(&actor(1, Role::Editor), Action::UpdatePost, Some(99)).is_ok());
        assert!(authorize(&actor(7, Role::Author), Action::UpdatePost, Some(7)).is_ok());
        let err = authorize(&actor(7, Role::Author), Action::UpdatePost, Some(8)).unwrap_err();
        assert!(matches!(err, CmsError::Forbidden(_)));
        assert!(authorize(&actor(3, Role::Subscriber), Action::UpdateUser, Some(3)).is_ok());
        assert!(authorize(&actor(3, Role::Subscriber), Action::UpdateUser, Some(4)).is_err());
        assert!(authorize(&actor(3, Role::Subscriber), Action::AdministerUser, Some(3)).is_err());
    }
}
