use archivart_core::DeletionImpact;
use archivart_store::{NewModule, StoreError};
use archivart_test_utils::{
    bootstrapped_db, create_role_with, create_user, permissions_of, sample_media, seeded_db,
    user_with_permissions,
};
use pretty_assertions::assert_eq;

#[test]
fn test_action_delete_removes_permission_and_grants() {
    let db = seeded_db();
    let user = user_with_permissions(&db, "a@example.com", &["media.view", "media.delete"]);
    create_role_with(&db, "cleaner", &["media.delete"]);
    let media = db.modules().get_by_name("media").unwrap().unwrap();
    let delete = db
        .modules()
        .actions_of(media.id)
        .unwrap()
        .into_iter()
        .find(|a| a.name == "delete")
        .unwrap();

    let preview = db.cascade().action_impact(delete.id).unwrap();
    let removal = db.cascade().delete_action(delete.id).unwrap();
    assert_eq!(removal.impact, preview);
    assert_eq!(
        removal.impact,
        DeletionImpact {
            actions: 0,
            permissions: 1,
            role_permissions: 2,
            user_roles: 0,
        }
    );
    assert!(db.permissions().get_by_name("media.delete").unwrap().is_none());
    assert!(permissions_of(&db, user.id).contains("media.view"));
    assert!(!permissions_of(&db, user.id).contains("media.delete"));
}

#[test]
fn test_system_module_is_protected() {
    let db = seeded_db();
    let users = db.modules().get_by_name("users").unwrap().unwrap();
    let err = db.cascade().delete_module(users.id).unwrap_err();
    assert!(matches!(err, StoreError::Protected(_)));
    assert!(db.permissions().get_by_name("users.view").unwrap().is_some());
}

#[test]
fn test_custom_module_delete_cascades() {
    let db = seeded_db();
    let reports = db
        .modules()
        .create(&NewModule {
            name: "reports".into(),
            display_name: "Reports".into(),
            route: Some("/admin/reports".into()),
            ..NewModule::default()
        })
        .unwrap();
    let export = db
        .actions()
        .create(&archivart_store::NewAction::new(reports.id, "export", "Export"))
        .unwrap();
    let permission = db
        .permissions()
        .create(&archivart_store::NewPermission {
            name: None,
            display_name: "Reports Export".into(),
            description: None,
            module_id: reports.id,
            action_id: export.id,
            resource: None,
            is_system: false,
        })
        .unwrap();
    assert_eq!(permission.name, "reports.export");
    let user = user_with_permissions(&db, "r@example.com", &["reports.export"]);

    let removal = db.cascade().delete_module(reports.id).unwrap();
    assert_eq!(removal.impact.actions, 1);
    assert_eq!(removal.impact.permissions, 1);
    assert_eq!(removal.impact.role_permissions, 1);
    assert!(permissions_of(&db, user.id).is_empty());
    assert!(db.modules().get_by_name("reports").unwrap().is_none());
}

#[test]
fn test_role_delete_removes_memberships() {
    let db = seeded_db();
    let role = create_role_with(&db, "temp", &["dashboard.view", "users.view"]);
    let a = create_user(&db, "a@example.com");
    let b = create_user(&db, "b@example.com");
    db.users().assign_role(a.id, role.id).unwrap();
    db.users().assign_role(b.id, role.id).unwrap();

    let removal = db.cascade().delete_role(role.id).unwrap();
    assert_eq!(removal.impact.role_permissions, 2);
    assert_eq!(removal.impact.user_roles, 2);
    assert!(db.users().roles_of(a.id).unwrap().is_empty());
}

#[test]
fn test_user_delete_keeps_media_and_protects_admins() {
    let (db, admin) = bootstrapped_db();
    let user = create_user(&db, "uploader@example.com");
    let mut new = sample_media("mona", b"mona-bytes");
    new.uploaded_by = Some(user.id);
    let media = db.media().create(&new).unwrap();

    db.cascade().delete_user(user.id).unwrap();
    let kept = db.media().get(media.id).unwrap();
    assert_eq!(kept.uploaded_by, None);
    assert!(db.users().get(user.id).unwrap_err().is_not_found());

    let err = db.cascade().delete_user(admin.id).unwrap_err();
    assert!(err.is_protected());
}
