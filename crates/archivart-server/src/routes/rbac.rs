//! `/api/rbac` routes
//!
//! Reads need `rbac.view`; writes need `rbac.create`, `rbac.update` or
//! `rbac.delete`. Every write goes through [`AppState::run_rbac`], which drops
//! cached permission sets once the change commits.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::authz::require;
use crate::reply::{self, Listing};
use crate::routes::{json_body, ListParams};
use crate::state::{with_state, AppState};
use archivart_core::{
    ActionId, Module, ModuleAction, ModuleId, Permission, PermissionId, RoleId, RoleSummary, UserId,
};
use archivart_store::{
    ActionUpdate, ModuleUpdate, NewAction, NewModule, NewPermission, NewRole, PermissionFilter,
    PermissionUpdate, RbacOverview, RoleFilter, RoleStat, RoleUpdate,
};
use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Rejection};

/// Full permission list for a role
#[derive(Debug, Deserialize)]
pub struct RolePermissionsRequest {
    /// Permissions to keep granted; everything else is revoked
    pub permission_ids: Vec<PermissionId>,
}

/// Role membership change
#[derive(Debug, Deserialize)]
pub struct UserRoleRequest {
    /// Account
    pub user_id: UserId,
    /// Role
    pub role_id: RoleId,
}

/// Permission name probe
#[derive(Debug, Deserialize)]
pub struct DuplicateQuery {
    /// Candidate `module.action` name
    pub name: String,
    /// Permission being edited, ignored in the check
    #[serde(default)]
    pub exclude_id: Option<PermissionId>,
}

/// Action list filter
#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    /// Only actions of this module
    #[serde(default)]
    pub module_id: Option<ModuleId>,
}

#[derive(Debug, Serialize)]
struct RbacDashboard {
    overview: RbacOverview,
    role_stats: Vec<RoleStat>,
    module_names: Vec<String>,
    action_names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ModuleDetail {
    #[serde(flatten)]
    module: Module,
    actions: Vec<ModuleAction>,
}

#[derive(Debug, Serialize)]
struct RoleDetail {
    #[serde(flatten)]
    role: RoleSummary,
    permissions: Vec<Permission>,
}

async fn dashboard(_: Principal, state: AppState) -> Result<Response, Rejection> {
    let dashboard = state
        .run(|db| {
            Ok(RbacDashboard {
                overview: db.stats().rbac_overview()?,
                role_stats: db.roles().role_stats()?,
                module_names: db.permissions().module_names()?,
                action_names: db.permissions().action_names()?,
            })
        })
        .await?;
    Ok(reply::ok(dashboard))
}

async fn stats(_: Principal, state: AppState) -> Result<Response, Rejection> {
    let overview = state.run(|db| db.stats().rbac_overview()).await?;
    Ok(reply::ok(overview))
}

// Roles

async fn list_roles(_: Principal, params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let query = params.query();
    let filter = RoleFilter {
        is_active: params.is_active,
    };
    let page = state.run(move |db| db.roles().list(&query, &filter)).await?;
    Ok(reply::ok(Listing::from(page)))
}

async fn get_role(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let id = RoleId(id);
    let detail = state
        .run(move |db| {
            Ok(RoleDetail {
                role: db.roles().get(id)?,
                permissions: db.roles().permissions_of(id)?,
            })
        })
        .await?;
    Ok(reply::ok(detail))
}

async fn create_role(principal: Principal, body: NewRole, state: AppState) -> Result<Response, Rejection> {
    let role = state.run_rbac(move |db| db.roles().create(&body)).await?;
    tracing::info!("{} created role {} ({})", principal.user.email, role.name, role.id);
    Ok(reply::created("Role created successfully", role))
}

async fn update_role(id: i64, _: Principal, body: RoleUpdate, state: AppState) -> Result<Response, Rejection> {
    let role = state.run_rbac(move |db| db.roles().update(RoleId(id), &body)).await?;
    Ok(reply::ok_with("Role updated successfully", role))
}

async fn role_impact(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let impact = state.run(move |db| db.cascade().role_impact(RoleId(id))).await?;
    Ok(reply::ok(impact))
}

async fn delete_role(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let removal = state.run_rbac(move |db| db.cascade().delete_role(RoleId(id))).await?;
    Ok(reply::ok_with("Role deleted successfully", removal))
}

async fn role_permissions(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let permissions = state.run(move |db| db.roles().permissions_of(RoleId(id))).await?;
    Ok(reply::ok(permissions))
}

async fn replace_role_permissions(
    id: i64,
    principal: Principal,
    body: RolePermissionsRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    let role = RoleId(id);
    let permissions = state
        .run_rbac(move |db| db.roles().replace_permissions(role, &body.permission_ids))
        .await?;
    tracing::info!(
        "{} set {} permissions on role {}",
        principal.user.email,
        permissions.len(),
        role
    );
    Ok(reply::ok_with("Role permissions updated successfully", permissions))
}

// Permissions

async fn list_permissions(_: Principal, params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let query = params.query();
    let filter = PermissionFilter {
        module: params.module,
        is_active: params.is_active,
    };
    let page = state.run(move |db| db.permissions().list(&query, &filter)).await?;
    Ok(reply::ok(Listing::from(page)))
}

async fn get_permission(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let permission = state.run(move |db| db.permissions().get(PermissionId(id))).await?;
    Ok(reply::ok(permission))
}

async fn check_duplicate(_: Principal, query: DuplicateQuery, state: AppState) -> Result<Response, Rejection> {
    let exists = state
        .run(move |db| db.permissions().name_exists(query.name.trim(), query.exclude_id))
        .await?;
    Ok(reply::ok(serde_json::json!({ "exists": exists })))
}

async fn create_permission(_: Principal, mut body: NewPermission, state: AppState) -> Result<Response, Rejection> {
    body.is_system = false;
    let permission = state.run_rbac(move |db| db.permissions().create(&body)).await?;
    Ok(reply::created("Permission created successfully", permission))
}

async fn update_permission(
    id: i64,
    _: Principal,
    body: PermissionUpdate,
    state: AppState,
) -> Result<Response, Rejection> {
    let permission = state
        .run_rbac(move |db| db.permissions().update(PermissionId(id), &body))
        .await?;
    Ok(reply::ok_with("Permission updated successfully", permission))
}

async fn permission_impact(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let impact = state
        .run(move |db| db.cascade().permission_impact(PermissionId(id)))
        .await?;
    Ok(reply::ok(impact))
}

async fn delete_permission(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let removal = state
        .run_rbac(move |db| db.cascade().delete_permission(PermissionId(id)))
        .await?;
    Ok(reply::ok_with("Permission deleted successfully", removal))
}

// Modules

async fn list_modules(_: Principal, params: ListParams, state: AppState) -> Result<Response, Rejection> {
    let modules = state
        .run(move |db| db.modules().list(params.search.as_deref()))
        .await?;
    Ok(reply::ok(modules))
}

async fn get_module(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let id = ModuleId(id);
    let detail = state
        .run(move |db| {
            Ok(ModuleDetail {
                module: db.modules().get(id)?,
                actions: db.modules().actions_of(id)?,
            })
        })
        .await?;
    Ok(reply::ok(detail))
}

async fn module_impact(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let impact = state.run(move |db| db.cascade().module_impact(ModuleId(id))).await?;
    Ok(reply::ok(impact))
}

async fn create_module(_: Principal, mut body: NewModule, state: AppState) -> Result<Response, Rejection> {
    body.is_system = false;
    let module = state.run_rbac(move |db| db.modules().create(&body)).await?;
    Ok(reply::created("Module created successfully", module))
}

async fn update_module(id: i64, _: Principal, body: ModuleUpdate, state: AppState) -> Result<Response, Rejection> {
    let module = state
        .run_rbac(move |db| db.modules().update(ModuleId(id), &body))
        .await?;
    Ok(reply::ok_with("Module updated successfully", module))
}

async fn delete_module(id: i64, principal: Principal, state: AppState) -> Result<Response, Rejection> {
    let removal = state
        .run_rbac(move |db| db.cascade().delete_module(ModuleId(id)))
        .await?;
    tracing::info!(
        "{} deleted module {}: {}",
        principal.user.email,
        removal.removed.name,
        removal.impact
    );
    Ok(reply::ok_with("Module deleted successfully", removal))
}

// Module actions

async fn list_actions(_: Principal, query: ActionQuery, state: AppState) -> Result<Response, Rejection> {
    let actions = state.run(move |db| db.actions().list(query.module_id)).await?;
    Ok(reply::ok(actions))
}

async fn get_action(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let action = state.run(move |db| db.actions().get_any(ActionId(id))).await?;
    Ok(reply::ok(action))
}

async fn create_action(_: Principal, body: NewAction, state: AppState) -> Result<Response, Rejection> {
    let action = state.run_rbac(move |db| db.actions().create(&body)).await?;
    Ok(reply::created("Module action created successfully", action))
}

async fn update_action(id: i64, _: Principal, body: ActionUpdate, state: AppState) -> Result<Response, Rejection> {
    let action = state
        .run_rbac(move |db| db.actions().update(ActionId(id), &body))
        .await?;
    Ok(reply::ok_with("Module action updated successfully", action))
}

async fn restore_action(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let action = state.run_rbac(move |db| db.actions().restore(ActionId(id))).await?;
    Ok(reply::ok_with("Module action restored successfully", action))
}

async fn action_impact(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let impact = state.run(move |db| db.cascade().action_impact(ActionId(id))).await?;
    Ok(reply::ok(impact))
}

async fn delete_action(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let removal = state
        .run_rbac(move |db| db.cascade().delete_action(ActionId(id)))
        .await?;
    Ok(reply::ok_with("Module action deleted successfully", removal))
}

// User roles

async fn user_roles(id: i64, _: Principal, state: AppState) -> Result<Response, Rejection> {
    let roles = state.run(move |db| db.users().roles_of(UserId(id))).await?;
    Ok(reply::ok(roles))
}

async fn assign_role(principal: Principal, body: UserRoleRequest, state: AppState) -> Result<Response, Rejection> {
    let UserRoleRequest { user_id, role_id } = body;
    state
        .run_rbac(move |db| db.users().assign_role(user_id, role_id))
        .await?;
    tracing::info!("{} assigned role {} to user {}", principal.user.email, role_id, user_id);
    Ok(reply::message("Role assigned successfully"))
}

async fn remove_role(_: Principal, body: UserRoleRequest, state: AppState) -> Result<Response, Rejection> {
    let removed = state
        .run_rbac(move |db| db.users().remove_role(body.user_id, body.role_id))
        .await?;
    if !removed {
        return Err(ApiError::NotFound("Role assignment not found".to_string()).into());
    }
    Ok(reply::message("Role removed successfully"))
}

async fn set_primary_role(_: Principal, body: UserRoleRequest, state: AppState) -> Result<Response, Rejection> {
    state
        .run_rbac(move |db| db.users().set_primary_role(body.user_id, body.role_id))
        .await?;
    Ok(reply::message("Primary role updated successfully"))
}

fn role_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "rbac" / "roles")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_roles);

    let get = warp::path!("api" / "rbac" / "roles" / i64)
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(get_role);

    let create = warp::path!("api" / "rbac" / "roles")
        .and(warp::post())
        .and(require(state, "rbac.create"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_role);

    let update = warp::path!("api" / "rbac" / "roles" / i64)
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_role);

    let impact = warp::path!("api" / "rbac" / "roles" / i64 / "deletion-impact")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(role_impact);

    let delete = warp::path!("api" / "rbac" / "roles" / i64)
        .and(warp::delete())
        .and(require(state, "rbac.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_role);

    let permissions = warp::path!("api" / "rbac" / "roles" / i64 / "permissions")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(role_permissions);

    let replace = warp::path!("api" / "rbac" / "roles" / i64 / "permissions")
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(replace_role_permissions);

    list.or(get)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(impact)
        .unify()
        .or(delete)
        .unify()
        .or(permissions)
        .unify()
        .or(replace)
        .unify()
        .boxed()
}

fn permission_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "rbac" / "permissions")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_permissions);

    let duplicate = warp::path!("api" / "rbac" / "permissions" / "check-duplicate")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(warp::query::<DuplicateQuery>())
        .and(with_state(state.clone()))
        .and_then(check_duplicate);

    let get = warp::path!("api" / "rbac" / "permissions" / i64)
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(get_permission);

    let create = warp::path!("api" / "rbac" / "permissions")
        .and(warp::post())
        .and(require(state, "rbac.create"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_permission);

    let update = warp::path!("api" / "rbac" / "permissions" / i64)
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_permission);

    let impact = warp::path!("api" / "rbac" / "permissions" / i64 / "deletion-impact")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(permission_impact);

    let delete = warp::path!("api" / "rbac" / "permissions" / i64)
        .and(warp::delete())
        .and(require(state, "rbac.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_permission);

    list.or(duplicate)
        .unify()
        .or(get)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(impact)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn module_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "rbac" / "modules")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(warp::query::<ListParams>())
        .and(with_state(state.clone()))
        .and_then(list_modules);

    let get = warp::path!("api" / "rbac" / "modules" / i64)
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(get_module);

    let impact = warp::path!("api" / "rbac" / "modules" / i64 / "deletion-impact")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(module_impact);

    let create = warp::path!("api" / "rbac" / "modules")
        .and(warp::post())
        .and(require(state, "rbac.create"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_module);

    let update = warp::path!("api" / "rbac" / "modules" / i64)
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_module);

    let delete = warp::path!("api" / "rbac" / "modules" / i64)
        .and(warp::delete())
        .and(require(state, "rbac.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_module);

    list.or(get)
        .unify()
        .or(impact)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn action_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "rbac" / "module-actions")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(warp::query::<ActionQuery>())
        .and(with_state(state.clone()))
        .and_then(list_actions);

    let get = warp::path!("api" / "rbac" / "module-actions" / i64)
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(get_action);

    let create = warp::path!("api" / "rbac" / "module-actions")
        .and(warp::post())
        .and(require(state, "rbac.create"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_action);

    let update = warp::path!("api" / "rbac" / "module-actions" / i64)
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_action);

    let restore = warp::path!("api" / "rbac" / "module-actions" / i64 / "restore")
        .and(warp::patch())
        .and(require(state, "rbac.update"))
        .and(with_state(state.clone()))
        .and_then(restore_action);

    let impact = warp::path!("api" / "rbac" / "module-actions" / i64 / "deletion-impact")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(action_impact);

    let delete = warp::path!("api" / "rbac" / "module-actions" / i64)
        .and(warp::delete())
        .and(require(state, "rbac.delete"))
        .and(with_state(state.clone()))
        .and_then(delete_action);

    list.or(get)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(restore)
        .unify()
        .or(impact)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn user_role_routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let list = warp::path!("api" / "rbac" / "users" / i64 / "roles")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(user_roles);

    let assign = warp::path!("api" / "rbac" / "users" / "roles")
        .and(warp::post())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(assign_role);

    let remove = warp::path!("api" / "rbac" / "users" / "roles")
        .and(warp::delete())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(remove_role);

    let primary = warp::path!("api" / "rbac" / "users" / "primary-role")
        .and(warp::put())
        .and(require(state, "rbac.update"))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(set_primary_role);

    list.or(assign)
        .unify()
        .or(remove)
        .unify()
        .or(primary)
        .unify()
        .boxed()
}

/// `/api/rbac` routes
pub fn routes(state: &AppState) -> BoxedFilter<(Response,)> {
    let dashboard = warp::path!("api" / "rbac" / "dashboard")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(dashboard);

    let stats = warp::path!("api" / "rbac" / "stats")
        .and(warp::get())
        .and(require(state, "rbac.view"))
        .and(with_state(state.clone()))
        .and_then(stats);

    dashboard
        .or(stats)
        .unify()
        .or(role_routes(state))
        .unify()
        .or(permission_routes(state))
        .unify()
        .or(module_routes(state))
        .unify()
        .or(action_routes(state))
        .unify()
        .or(user_role_routes(state))
        .unify()
        .boxed()
}
