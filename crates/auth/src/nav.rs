use std::collections::BTreeSet;

use serde::Serialize;

use crate::Capabilities;

/// Settings area a member may be shown.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavCategory {
    Members,
    Departments,
    Roles,
    Reports,
}

/// Links every member sees regardless of grants.
pub const SHARED_LINKS: [&str; 4] = ["home", "manuals", "quizzes", "logout"];

/// Navigation derived from a user's capabilities in one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavLinks {
    pub is_admin: bool,
    pub show_scores: bool,
    pub categories: BTreeSet<NavCategory>,
    pub links: Vec<&'static str>,
}

impl NavLinks {
    pub fn for_capabilities(capabilities: &Capabilities) -> Self {
        let categories: BTreeSet<NavCategory> = if capabilities.is_admin {
            [
                NavCategory::Members,
                NavCategory::Departments,
                NavCategory::Roles,
                NavCategory::Reports,
            ]
            .into_iter()
            .collect()
        } else {
            capabilities
                .effective_grants()
                .into_iter()
                .filter_map(|g| g.nav_category())
                .collect()
        };

        // Admins manage the business and are not scored on quizzes.
        let show_scores = !capabilities.is_admin;

        let mut links: Vec<&'static str> = SHARED_LINKS[..3].to_vec();
        if show_scores {
            links.push("scores");
        }
        links.extend(categories.iter().map(|c| match c {
            NavCategory::Members => "members",
            NavCategory::Departments => "departments",
            NavCategory::Roles => "roles",
            NavCategory::Reports => "reports",
        }));
        links.push(SHARED_LINKS[3]);

        Self {
            is_admin: capabilities.is_admin,
            show_scores,
            categories,
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use onboard_core::{BusinessId, DepartmentId, UserId};

    use super::*;
    use crate::{Grant, PermissionFlags};

    fn capabilities(is_admin: bool, grants: &[Grant]) -> Capabilities {
        let mut caps = Capabilities::none(UserId::new(1), BusinessId::new(1));
        caps.is_admin = is_admin;
        caps.add_role(
            DepartmentId::new(5),
            PermissionFlags::from_grants(grants.iter().copied()),
        );
        caps
    }

    #[test]
    fn admins_see_every_category_and_no_scores() {
        let nav = NavLinks::for_capabilities(&capabilities(true, &[]));
        assert!(!nav.show_scores);
        assert_eq!(nav.categories.len(), 4);
        assert_eq!(
            nav.links,
            vec!["home", "manuals", "quizzes", "members", "departments", "roles", "reports", "logout"]
        );
    }

    #[test]
    fn plain_users_see_scores_only() {
        let nav = NavLinks::for_capabilities(&capabilities(false, &[]));
        assert!(nav.show_scores);
        assert!(nav.categories.is_empty());
        assert_eq!(nav.links, vec!["home", "manuals", "quizzes", "scores", "logout"]);
    }

    #[test]
    fn grants_unlock_their_categories() {
        let nav = NavLinks::for_capabilities(&capabilities(
            false,
            &[Grant::DeptAssignUsersToRole, Grant::DeptViewReports, Grant::DeptCrudResources],
        ));
        assert_eq!(
            nav.categories.into_iter().collect::<Vec<_>>(),
            vec![NavCategory::Members, NavCategory::Reports]
        );
    }
}
