use crate::db::Db;
use crate::domain::{Budget, Role};
use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("{user} is not a member of budget '{budget}'")]
    NotMember { user: String, budget: String },
    #[error("{user} is {actual} on budget '{budget}'; this needs {required} or higher")]
    InsufficientRole {
        user: String,
        budget: String,
        actual: Role,
        required: Role,
    },
}

/// Fails unless `user` belongs to `budget` with at least `required`. Returns the held role.
pub fn require_role(db: &Db, budget: &Budget, user: &str, required: Role) -> Result<Role> {
    let Some(actual) = db.member_role(budget.id, user)? else {
        tracing::debug!(budget = %budget.id, user, "access denied: not a member");
        return Err(AccessError::NotMember {
            user: user.to_string(),
            budget: budget.name.clone(),
        }
        .into());
    };

    if actual < required {
        tracing::debug!(budget = %budget.id, user, %actual, %required, "access denied: role");
        return Err(AccessError::InsufficientRole {
            user: user.to_string(),
            budget: budget.name.clone(),
            actual,
            required,
        }
        .into());
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn budget(db: &Db) -> Budget {
        let b = Budget {
            id: Uuid::new_v4(),
            name: "Casa".to_string(),
            cutoff_day: 1,
            currency: "USD".to_string(),
            created_by: "ana@example.com".to_string(),
            created_at: Utc::now(),
        };
        db.create_budget(&b).unwrap();
        b
    }

    #[test]
    fn owner_passes_every_check() {
        let db = Db::open_in_memory().unwrap();
        let b = budget(&db);
        for required in [Role::Viewer, Role::Editor, Role::Owner] {
            assert_eq!(
                require_role(&db, &b, "ana@example.com", required).unwrap(),
                Role::Owner
            );
        }
    }

    #[test]
    fn non_members_are_rejected() {
        let db = Db::open_in_memory().unwrap();
        let b = budget(&db);
        let err = require_role(&db, &b, "eve@example.com", Role::Viewer).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AccessError>(),
            Some(AccessError::NotMember { .. })
        ));
    }

    #[test]
    fn viewers_cannot_edit() {
        let db = Db::open_in_memory().unwrap();
        let b = budget(&db);
        db.accept_invitation(
            &crate::domain::Invitation {
                id: Uuid::new_v4(),
                budget_id: b.id,
                email: "luis@example.com".to_string(),
                role: Role::Viewer,
                invited_by: "ana@example.com".to_string(),
                status: crate::domain::InvitationStatus::Pending,
                created_at: Utc::now(),
            },
            Utc::now(),
        )
        .unwrap();

        assert!(require_role(&db, &b, "luis@example.com", Role::Viewer).is_ok());
        let err = require_role(&db, &b, "luis@example.com", Role::Editor).unwrap_err();
        assert_eq!(
            err.to_string(),
            "luis@example.com is viewer on budget 'Casa'; this needs editor or higher"
        );
    }
}
