//! Subcommand implementations
//!
//! Each command writes its report to `out` so it can be checked in tests.

use anyhow::{bail, Context};
use archivart_core::{
    ActionId, DeletionImpact, ListQuery, ModuleId, Page, PermissionId, RoleId, User, UserId,
};
use archivart_store::seed;
use archivart_store::{Database, PermissionFilter, RoleFilter, UserFilter};
use clap::ValueEnum;
use serde_json::json;
use std::io::Write;

const PAGE_SIZE: u32 = 100;

/// Output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    /// Human readable lines
    Text,
    /// Pretty JSON
    Json,
}

/// Entities that can be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum EntityKind {
    Module,
    Action,
    Permission,
    Role,
    User,
}

/// Entities that can be listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ListKind {
    Modules,
    Actions,
    Permissions,
    Roles,
    Users,
}

fn write_json(out: &mut impl Write, value: &impl serde::Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Fetch every page of a listing
fn all_pages<T>(
    mut fetch: impl FnMut(&ListQuery) -> archivart_store::Result<Page<T>>,
) -> archivart_store::Result<Vec<T>> {
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(&ListQuery::new().with_page(page, PAGE_SIZE))?;
        let last = page >= batch.total_pages;
        items.extend(batch.items);
        if last {
            return Ok(items);
        }
        page += 1;
    }
}

pub(crate) fn setup(
    db: &Database,
    email: &str,
    password: &str,
    format: Format,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let admin = seed::bootstrap(db, email, password).context("bootstrapping admin account")?;
    let overview = db.stats().rbac_overview()?;
    match format {
        Format::Json => write_json(out, &json!({ "admin": admin, "rbac": overview }))?,
        Format::Text => {
            writeln!(out, "admin account {} ({}) is ready", admin.email, admin.id)?;
            writeln!(
                out,
                "rbac: {} roles, {} permissions, {} grants",
                overview.roles, overview.permissions, overview.role_permissions
            )?;
        }
    }
    Ok(())
}

pub(crate) fn reset_rbac(db: &Database, format: Format, out: &mut impl Write) -> anyhow::Result<()> {
    let summary = seed::reset_rbac_catalog(db)?;
    match format {
        Format::Json => write_json(out, &summary)?,
        Format::Text => writeln!(
            out,
            "catalog rebuilt: {} modules, {} actions, {} permissions, {} grants per system role",
            summary.modules, summary.actions, summary.permissions, summary.grants_per_role
        )?,
    }
    Ok(())
}

fn impact_of(db: &Database, kind: EntityKind, id: i64) -> archivart_store::Result<DeletionImpact> {
    let cascade = db.cascade();
    match kind {
        EntityKind::Module => cascade.module_impact(ModuleId(id)),
        EntityKind::Action => cascade.action_impact(ActionId(id)),
        EntityKind::Permission => cascade.permission_impact(PermissionId(id)),
        EntityKind::Role => cascade.role_impact(RoleId(id)),
        EntityKind::User => cascade.user_impact(UserId(id)),
    }
}

/// Delete one entity, returning its label and what went with it
fn remove(db: &Database, kind: EntityKind, id: i64) -> archivart_store::Result<(String, DeletionImpact)> {
    let cascade = db.cascade();
    Ok(match kind {
        EntityKind::Module => {
            let r = cascade.delete_module(ModuleId(id))?;
            (r.removed.name, r.impact)
        }
        EntityKind::Action => {
            let r = cascade.delete_action(ActionId(id))?;
            (r.removed.name, r.impact)
        }
        EntityKind::Permission => {
            let r = cascade.delete_permission(PermissionId(id))?;
            (r.removed.name, r.impact)
        }
        EntityKind::Role => {
            let r = cascade.delete_role(RoleId(id))?;
            (r.removed.name, r.impact)
        }
        EntityKind::User => {
            let r = cascade.delete_user(UserId(id))?;
            (r.removed.email, r.impact)
        }
    })
}

pub(crate) fn delete(
    db: &Database,
    kind: EntityKind,
    id: i64,
    dry_run: bool,
    format: Format,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let label = format!("{kind:?}").to_lowercase();
    if dry_run {
        let impact = impact_of(db, kind, id)?;
        match format {
            Format::Json => write_json(out, &json!({ "kind": label, "id": id, "impact": impact }))?,
            Format::Text => writeln!(out, "deleting {label} {id} would remove {impact}")?,
        }
        return Ok(());
    }
    let (name, impact) = remove(db, kind, id)?;
    match format {
        Format::Json => write_json(
            out,
            &json!({ "kind": label, "id": id, "name": name, "impact": impact }),
        )?,
        Format::Text => writeln!(out, "deleted {label} {name} ({id}): {impact}")?,
    }
    Ok(())
}

pub(crate) fn list(db: &Database, kind: ListKind, format: Format, out: &mut impl Write) -> anyhow::Result<()> {
    match kind {
        ListKind::Modules => {
            let modules = db.modules().list(None)?;
            if format == Format::Json {
                return write_json(out, &modules);
            }
            for m in &modules {
                writeln!(
                    out,
                    "{:>4}  {:<16} {:<28} actions={} permissions={}{}",
                    m.module.id,
                    m.module.name,
                    m.module.display_name,
                    m.action_count,
                    m.permission_count,
                    if m.module.is_system { "  [system]" } else { "" }
                )?;
            }
        }
        ListKind::Actions => {
            let actions = db.actions().list(None)?;
            if format == Format::Json {
                return write_json(out, &actions);
            }
            for a in &actions {
                let module = a.module_name.as_deref().unwrap_or("?");
                writeln!(out, "{:>4}  {:<28} {}", a.id, format!("{module}.{}", a.name), a.display_name)?;
            }
        }
        ListKind::Permissions => {
            let permissions = all_pages(|q| db.permissions().list(q, &PermissionFilter::default()))?;
            if format == Format::Json {
                return write_json(out, &permissions);
            }
            for p in &permissions {
                writeln!(
                    out,
                    "{:>4}  {:<28} {}{}",
                    p.id,
                    p.name,
                    p.display_name,
                    if p.is_active { "" } else { "  [inactive]" }
                )?;
            }
        }
        ListKind::Roles => {
            let roles = all_pages(|q| db.roles().list(q, &RoleFilter::default()))?;
            if format == Format::Json {
                return write_json(out, &roles);
            }
            for r in &roles {
                writeln!(
                    out,
                    "{:>4}  {:<20} users={} permissions={}{}",
                    r.role.id,
                    r.role.name,
                    r.user_count,
                    r.permission_count,
                    if r.role.is_system { "  [system]" } else { "" }
                )?;
            }
        }
        ListKind::Users => {
            let users = all_pages(|q| db.users().list(q, &UserFilter::default()))?;
            if format == Format::Json {
                return write_json(out, &users);
            }
            for u in &users {
                writeln!(
                    out,
                    "{:>4}  {:<32} {:<6} {}",
                    u.id,
                    u.email,
                    u.account_type.as_str(),
                    u.status().as_str()
                )?;
            }
        }
    }
    Ok(())
}

fn find_admin(db: &Database, email: &str) -> anyhow::Result<User> {
    let Some(user) = db.users().get_by_email(email)? else {
        bail!("no account with email {email}");
    };
    if !user.is_admin_account() {
        bail!("{email} is not an admin account");
    }
    Ok(user)
}

pub(crate) fn set_admin_password(
    db: &Database,
    email: &str,
    password: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let admin = find_admin(db, email)?;
    db.users().set_password(admin.id, password)?;
    tracing::info!("password replaced for admin {}", admin.id);
    writeln!(out, "password updated for {}", admin.email)?;
    Ok(())
}

pub(crate) fn check_admins(db: &Database, format: Format, out: &mut impl Write) -> anyhow::Result<()> {
    let admins = db.users().admins()?;
    let mut report = Vec::with_capacity(admins.len());
    for admin in admins {
        let roles: Vec<String> = db
            .users()
            .roles_of(admin.id)?
            .into_iter()
            .map(|r| r.role.name)
            .collect();
        report.push((admin, roles));
    }
    let usable = report
        .iter()
        .filter(|(admin, roles)| admin.can_sign_in() && roles.iter().any(|r| r == seed::SUPER_ADMIN_ROLE))
        .count();

    if format == Format::Json {
        let admins: Vec<_> = report
            .iter()
            .map(|(admin, roles)| json!({ "user": admin, "status": admin.status(), "roles": roles }))
            .collect();
        return write_json(out, &json!({ "admins": admins, "usable_super_admins": usable }));
    }

    if report.is_empty() {
        writeln!(out, "no admin accounts; run `archivart-admin setup`")?;
        return Ok(());
    }
    for (admin, roles) in &report {
        let last_login = admin
            .last_login_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        writeln!(
            out,
            "{:>4}  {:<32} {:<8} roles={} last_login={}",
            admin.id,
            admin.email,
            admin.status().as_str(),
            if roles.is_empty() { "-".to_string() } else { roles.join(",") },
            last_login
        )?;
    }
    if usable == 0 {
        writeln!(out, "warning: no active admin holds the {} role", seed::SUPER_ADMIN_ROLE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivart_test_utils::{bootstrapped_db, create_role_with, create_user, seeded_db};
    use pretty_assertions::assert_eq;

    fn text(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn setup_is_idempotent() {
        let db = seeded_db();
        let first = text(|out| setup(&db, "root@example.com", "Admin123!", Format::Text, out));
        assert!(first.starts_with("admin account root@example.com"));
        text(|out| setup(&db, "root@example.com", "Admin123!", Format::Text, out));
        assert_eq!(db.users().admins().unwrap().len(), 1);
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let (db, _) = bootstrapped_db();
        let role = create_role_with(&db, "editors", &["media.view", "media.update"]);
        let user = create_user(&db, "ed@example.com");
        db.users().assign_role(user.id, role.id).unwrap();

        let report = text(|out| delete(&db, EntityKind::Role, role.id.get(), true, Format::Text, out));
        assert_eq!(
            report,
            format!(
                "deleting role {} would remove 0 actions, 0 permissions, 2 role grants, 1 user roles\n",
                role.id
            )
        );
        assert!(db.roles().get(role.id).is_ok());

        text(|out| delete(&db, EntityKind::Role, role.id.get(), false, Format::Text, out));
        assert!(db.roles().get(role.id).unwrap_err().is_not_found());
    }

    #[test]
    fn protected_deletes_fail() {
        let (db, admin) = bootstrapped_db();
        let mut out = Vec::new();
        assert!(delete(&db, EntityKind::User, admin.id.get(), false, Format::Text, &mut out).is_err());
        let users = db.modules().get_by_name("users").unwrap().unwrap();
        assert!(delete(&db, EntityKind::Module, users.id.get(), false, Format::Text, &mut out).is_err());
    }

    #[test]
    fn lists_every_permission_across_pages() {
        let db = seeded_db();
        let report = text(|out| list(&db, ListKind::Permissions, Format::Text, out));
        assert_eq!(report.lines().count(), 17);
        assert!(report.contains("users.block"));
    }

    #[test]
    fn admin_password_only_for_admin_accounts() {
        let (db, admin) = bootstrapped_db();
        create_user(&db, "someone@example.com");
        let mut out = Vec::new();
        assert!(set_admin_password(&db, "someone@example.com", "Newpass1!", &mut out).is_err());
        set_admin_password(&db, &admin.email, "Newpass1!", &mut out).unwrap();
        let stored = db.users().get(admin.id).unwrap();
        assert!(archivart_core::verify_password("Newpass1!", stored.password_hash.as_deref().unwrap()));
    }

    #[test]
    fn check_admins_warns_without_super_admin() {
        let (db, admin) = bootstrapped_db();
        let report = text(|out| check_admins(&db, Format::Text, out));
        assert!(report.contains(&admin.email));
        assert!(report.contains(seed::SUPER_ADMIN_ROLE));
        assert!(!report.contains("warning"));

        db.users().set_blocked(admin.id, true).unwrap();
        let report = text(|out| check_admins(&db, Format::Text, out));
        assert!(report.contains("blocked"));
        assert!(report.contains("warning"));
    }
}
